//! Rewrite command - print or write the instrumented script

use super::{load_policy, read_script};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use warden_runtime::{rewrite_logged, RewriteLog, RewriteOptions};

pub struct RewriteArgs {
    pub file: PathBuf,
    pub policy: Option<PathBuf>,
    /// Locals the host binds before evaluation
    pub locals: Vec<String>,
    /// Log violations instead of stopping at the first one
    pub keep_going: bool,
    pub output: Option<PathBuf>,
}

pub fn run(args: RewriteArgs) -> Result<()> {
    let source = read_script(&args.file)?;
    let (policy, config) = load_policy(&args.file, args.policy.as_deref())?;

    let mut options = RewriteOptions::from_config(&config).with_locals(args.locals);
    if args.keep_going {
        options = options.keep_going();
    }

    let mut log = RewriteLog::new();
    let result = rewrite_logged(&source, &policy, &options, &mut log);
    let file_name = args.file.display().to_string();
    for message in &log.errors {
        eprintln!("{}: {}", file_name, message);
    }
    let code = result.with_context(|| format!("Failed to rewrite {}", file_name))?;

    match &args.output {
        Some(path) => {
            fs::write(path, &code)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            info!(
                event = "cli.rewrite_written",
                path = %path.display(),
                self_sends = log.self_sends.len()
            );
        }
        None => print!("{}", code),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_file(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "{}", text).unwrap();
        path
    }

    #[test]
    fn test_rewrite_to_output_file() {
        let dir = TempDir::new().unwrap();
        let script = write_file(&dir, "job.rb", "while busy\n  work\nend\n");
        let policy = write_file(&dir, "policy.toml", "[limits]\nmax_iterations = 10\n");
        let output = dir.path().join("job.out.rb");

        run(RewriteArgs {
            file: script,
            policy: Some(policy),
            locals: vec![],
            keep_going: false,
            output: Some(output.clone()),
        })
        .unwrap();

        let code = fs::read_to_string(output).unwrap();
        assert!(code.starts_with("_it_c_1 = 0; "));
        assert!(code.contains("::Warden.check_iteration_counter(_it_c_1)"));
    }

    #[test]
    fn test_rewrite_halts_on_violation() {
        let dir = TempDir::new().unwrap();
        let script = write_file(&dir, "job.rb", "class Job; end\n");
        let policy = write_file(&dir, "policy.toml", "[declarations]\ndeny = [\"class\"]\n");

        let result = run(RewriteArgs {
            file: script,
            policy: Some(policy),
            locals: vec![],
            keep_going: false,
            output: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_rewrite_keep_going_succeeds() {
        let dir = TempDir::new().unwrap();
        let script = write_file(&dir, "job.rb", "class Job; end\n");
        let policy = write_file(&dir, "policy.toml", "[declarations]\ndeny = [\"class\"]\n");
        let output = NamedTempFile::new().unwrap();

        run(RewriteArgs {
            file: script,
            policy: Some(policy),
            locals: vec![],
            keep_going: true,
            output: Some(output.path().to_path_buf()),
        })
        .unwrap();
        assert_eq!(fs::read_to_string(output.path()).unwrap(), "class Job; end\n");
    }
}
