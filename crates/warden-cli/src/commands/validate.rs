//! Validate command - check a script against a policy without rewriting it

use super::{load_policy, read_script};
use anyhow::{bail, Result};
use std::path::PathBuf;
use warden_runtime::{sort_diagnostics, validate_diagnostics, Diagnostic};

pub struct ValidateArgs {
    pub file: PathBuf,
    pub policy: Option<PathBuf>,
    pub json: bool,
}

/// Report every violation and syntax error in the script
///
/// Fails when anything was reported, so the exit code is 1.
pub fn run(args: ValidateArgs) -> Result<()> {
    let source = read_script(&args.file)?;
    let (policy, _) = load_policy(&args.file, args.policy.as_deref())?;
    let file_name = args.file.display().to_string();

    let mut diagnostics: Vec<Diagnostic> = validate_diagnostics(&source, &policy)
        .into_iter()
        .map(|diag| diag.with_file(file_name.clone()))
        .collect();
    sort_diagnostics(&mut diagnostics);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else if diagnostics.is_empty() {
        println!("{}: ok", file_name);
    } else {
        for diag in &diagnostics {
            println!("{}", format_diagnostic(diag));
        }
    }

    if !diagnostics.is_empty() {
        bail!("{} problem(s) found in {}", diagnostics.len(), file_name);
    }
    Ok(())
}

/// `file:line:col: level[CODE]: message`
fn format_diagnostic(diag: &Diagnostic) -> String {
    format!(
        "{}:{}:{}: {}[{}]: {}",
        diag.file, diag.line, diag.column, diag.level, diag.code, diag.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn script(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", text).unwrap();
        file
    }

    fn policy(text: &str) -> NamedTempFile {
        script(text)
    }

    #[test]
    fn test_validate_clean_script() {
        let file = script("total = [1, 2].sum\n");
        let policy = policy("");
        let args = ValidateArgs {
            file: file.path().to_path_buf(),
            policy: Some(policy.path().to_path_buf()),
            json: false,
        };
        assert!(run(args).is_ok());
    }

    #[test]
    fn test_validate_reports_denied_method() {
        let file = script("record.delete\n");
        let policy = policy("[invocations]\ndeny = [\"delete\"]\n");
        let args = ValidateArgs {
            file: file.path().to_path_buf(),
            policy: Some(policy.path().to_path_buf()),
            json: false,
        };
        let err = run(args).unwrap_err();
        assert!(err.to_string().contains("1 problem(s)"));
    }

    #[test]
    fn test_validate_missing_file() {
        let args = ValidateArgs {
            file: PathBuf::from("nonexistent.rb"),
            policy: None,
            json: false,
        };
        assert!(run(args).is_err());
    }

    #[test]
    fn test_format_diagnostic() {
        let diag = Diagnostic::error_with_code(
            "WD2002",
            "invoking method 'delete' is not allowed",
            warden_runtime::Span::new(7, 13),
        )
        .with_snippet_from("record.delete\n")
        .with_file("job.rb");
        assert_eq!(
            format_diagnostic(&diag),
            "job.rb:1:8: error[WD2002]: invoking method 'delete' is not allowed"
        );
    }
}
