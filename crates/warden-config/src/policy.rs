//! Policy Configuration (warden.toml)
//!
//! Declarative form of a sandbox policy. Predicate rules and per-instance
//! rules need live values and are only available through the runtime's
//! `PolicyBuilder`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Declaration kinds a policy can deny
pub const DECLARATION_KINDS: &[&str] = &[
    "constant", "class", "module", "def", "self", "yield", "return", "ivar", "cvar", "gvar",
];

/// Policy configuration from warden.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Turn the sandbox off: scripts are passed through unrewritten
    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub declarations: DeclarationsConfig,

    #[serde(default)]
    pub invocations: InvocationsConfig,

    #[serde(default)]
    pub constants: ConstantsConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Per-type rules, first match wins
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<TypeRuleConfig>,

    #[serde(default)]
    pub rewrite: RewriteConfig,
}

/// `[declarations]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DeclarationsConfig {
    /// Declaration kinds the script may not use (see [`DECLARATION_KINDS`])
    #[serde(default)]
    pub deny: Vec<String>,
}

/// `[invocations]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct InvocationsConfig {
    /// Methods callable on every value regardless of type rules
    #[serde(default)]
    pub allow: Vec<String>,

    /// Methods never callable
    #[serde(default)]
    pub deny: Vec<String>,
}

/// `[constants]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConstantsConfig {
    #[serde(default)]
    pub allow: Vec<String>,
}

/// `[limits]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Loop iterations per loop site
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u64>,

    /// Default invocation limit for every method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_invocations: Option<u64>,

    /// `[limits.invocations]` per-method invocation limits
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub invocations: BTreeMap<String, u64>,
}

/// `[[types]]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TypeRuleConfig {
    /// Type name, e.g. "String" or "Enumerable"
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
}

/// `[rewrite]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RewriteConfig {
    /// Stop at the first violation (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_on_error: Option<bool>,

    /// Locals the host binds before evaluating the script
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locals: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_counter_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoke_counter_prefix: Option<String>,
}

impl PolicyConfig {
    /// Load and validate a policy file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// Parse and validate policy TOML
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Self::parse(content, Path::new("<string>"))
    }

    fn parse(content: &str, file: &Path) -> ConfigResult<Self> {
        let config: PolicyConfig =
            toml::from_str(content).map_err(|error| ConfigError::TomlParseError {
                file: PathBuf::from(file),
                error,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Check names and kinds. Limits of 0 are accepted; the policy clamps
    /// them to 1.
    pub fn validate(&self) -> ConfigResult<()> {
        for kind in &self.declarations.deny {
            if !DECLARATION_KINDS.contains(&kind.as_str()) {
                return Err(ConfigError::UnknownDeclaration(kind.clone()));
            }
        }

        check_names("invocations.allow", &self.invocations.allow)?;
        check_names("invocations.deny", &self.invocations.deny)?;
        check_names("constants.allow", &self.constants.allow)?;
        check_names("rewrite.locals", &self.rewrite.locals)?;
        for name in self.limits.invocations.keys() {
            check_name("limits.invocations", name)?;
        }

        for (index, rule) in self.types.iter().enumerate() {
            let field = format!("types[{}]", index);
            check_name(&format!("{}.name", field), &rule.name)?;
            if rule.allow.is_none() && rule.deny.is_none() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "a type rule needs an allow or deny list".to_string(),
                });
            }
            if let Some(allow) = &rule.allow {
                check_names(&format!("{}.allow", field), allow)?;
            }
            if let Some(deny) = &rule.deny {
                check_names(&format!("{}.deny", field), deny)?;
            }
        }

        for (field, prefix) in [
            ("rewrite.iteration_counter_prefix", &self.rewrite.iteration_counter_prefix),
            ("rewrite.invoke_counter_prefix", &self.rewrite.invoke_counter_prefix),
        ] {
            if let Some(prefix) = prefix {
                if !is_local_identifier(prefix) {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("'{}' is not a valid local variable name", prefix),
                    });
                }
            }
        }

        Ok(())
    }

    /// Whether the script must stop at its first violation
    pub fn halt_on_error(&self) -> bool {
        self.rewrite.halt_on_error.unwrap_or(true)
    }
}

fn check_name(field: &str, name: &str) -> ConfigResult<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "names cannot be empty".to_string(),
        });
    }
    Ok(())
}

fn check_names(field: &str, names: &[String]) -> ConfigResult<()> {
    names.iter().try_for_each(|name| check_name(field, name))
}

/// Counter names are script locals: lowercase letter or `_`, then word chars
fn is_local_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_lowercase() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_empty_config_is_permissive() {
        let config = PolicyConfig::from_toml_str("").unwrap();
        assert_eq!(config, PolicyConfig::default());
        assert!(config.halt_on_error());
    }

    #[test]
    fn test_full_config() {
        let content = r#"
disabled = false

[declarations]
deny = ["class", "def", "gvar"]

[invocations]
allow = ["to_s"]
deny = ["delete", "system"]

[constants]
allow = ["Math"]

[limits]
max_iterations = 100
max_invocations = 10

[limits.invocations]
notify = 2

[[types]]
name = "String"
allow = ["length", "upcase"]

[rewrite]
halt_on_error = false
locals = ["record"]
"#;
        let config = PolicyConfig::from_toml_str(content).unwrap();
        assert_eq!(config.declarations.deny, vec!["class", "def", "gvar"]);
        assert_eq!(config.limits.max_iterations, Some(100));
        assert_eq!(config.limits.invocations.get("notify"), Some(&2));
        assert_eq!(config.types[0].name, "String");
        assert_eq!(config.types[0].allow.as_deref(), Some(&["length".to_string(), "upcase".to_string()][..]));
        assert!(!config.halt_on_error());
        assert_eq!(config.rewrite.locals, vec!["record"]);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = PolicyConfig::from_toml_str("[limits]\nmax_loops = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseError { .. }));
    }

    #[test]
    fn test_unknown_declaration_kind() {
        let err = PolicyConfig::from_toml_str("[declarations]\ndeny = [\"lambda\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDeclaration(kind) if kind == "lambda"));
    }

    #[rstest]
    #[case("[invocations]\ndeny = [\"\"]\n")]
    #[case("[[types]]\nname = \"String\"\n")]
    #[case("[[types]]\nname = \" \"\nallow = [\"length\"]\n")]
    #[case("[rewrite]\niteration_counter_prefix = \"Counter\"\n")]
    #[case("[rewrite]\ninvoke_counter_prefix = \"bad-name\"\n")]
    fn test_invalid_values(#[case] content: &str) {
        let err = PolicyConfig::from_toml_str(content).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "got {:?}", err);
    }

    #[test]
    fn test_zero_limit_is_accepted() {
        let config = PolicyConfig::from_toml_str("[limits]\nmax_iterations = 0\n").unwrap();
        assert_eq!(config.limits.max_iterations, Some(0));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PolicyConfig::default();
        config.declarations.deny.push("yield".to_string());
        config.limits.invocations.insert("notify".to_string(), 3);
        let text = config.to_toml_string().unwrap();
        assert_eq!(PolicyConfig::from_toml_str(&text).unwrap(), config);
    }
}
