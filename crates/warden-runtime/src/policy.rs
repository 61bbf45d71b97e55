//! Sandbox policy
//!
//! A [`Policy`] is built once through [`PolicyBuilder`] (or converted from a
//! [`PolicyConfig`]) and is read-only afterwards. The rewriter consults it
//! while instrumenting a script and the capability proxy consults it on every
//! call, so it is shared as `Arc<Policy>`.

use crate::value::{Identity, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use warden_config::PolicyConfig;

/// Runtime namespace every instrumented script refers to
pub const RUNTIME_CONSTANT: &str = "Warden";

/// Policy errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("Unknown declaration kind '{0}'")]
    UnknownDeclaration(String),

    #[error("Invalid policy field: {field} - {reason}")]
    InvalidField { field: String, reason: String },
}

/// Construct classes a policy can forbid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Constant,
    Class,
    Module,
    Def,
    SelfRef,
    Yield,
    Return,
    Ivar,
    Cvar,
    Gvar,
}

impl DeclarationKind {
    pub const ALL: [DeclarationKind; 10] = [
        DeclarationKind::Constant,
        DeclarationKind::Class,
        DeclarationKind::Module,
        DeclarationKind::Def,
        DeclarationKind::SelfRef,
        DeclarationKind::Yield,
        DeclarationKind::Return,
        DeclarationKind::Ivar,
        DeclarationKind::Cvar,
        DeclarationKind::Gvar,
    ];

    /// Name used in policy files
    pub fn as_str(self) -> &'static str {
        match self {
            DeclarationKind::Constant => "constant",
            DeclarationKind::Class => "class",
            DeclarationKind::Module => "module",
            DeclarationKind::Def => "def",
            DeclarationKind::SelfRef => "self",
            DeclarationKind::Yield => "yield",
            DeclarationKind::Return => "return",
            DeclarationKind::Ivar => "ivar",
            DeclarationKind::Cvar => "cvar",
            DeclarationKind::Gvar => "gvar",
        }
    }

    /// Violation message reported when the kind is denied
    pub fn message(self) -> &'static str {
        match self {
            DeclarationKind::Constant => "can not define (or override) constants",
            DeclarationKind::Class => "can not define classes",
            DeclarationKind::Module => "can not define modules",
            DeclarationKind::Def => "can not define methods",
            DeclarationKind::SelfRef => "can not access to self",
            DeclarationKind::Yield => "can not make yield calls",
            DeclarationKind::Return => "can not use return",
            DeclarationKind::Ivar => "can not access instance variables",
            DeclarationKind::Cvar => "can not access class variables",
            DeclarationKind::Gvar => "can not access global variables",
        }
    }
}

impl FromStr for DeclarationKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeclarationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PolicyError::UnknownDeclaration(s.to_string()))
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Predicate over (value, method name)
pub type Predicate = Arc<dyn Fn(&Value, &str) -> bool + Send + Sync>;

/// Method matcher of an access rule
#[derive(Clone)]
pub enum MethodMatcher {
    Names(HashSet<String>),
    Predicate(Predicate),
}

impl MethodMatcher {
    fn matches(&self, value: &Value, method: &str) -> bool {
        match self {
            MethodMatcher::Names(names) => names.contains(method),
            MethodMatcher::Predicate(predicate) => predicate(value, method),
        }
    }
}

impl fmt::Debug for MethodMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodMatcher::Names(names) => {
                let mut names: Vec<&String> = names.iter().collect();
                names.sort();
                f.debug_tuple("Names").field(&names).finish()
            }
            MethodMatcher::Predicate(_) => write!(f, "Predicate(<fn>)"),
        }
    }
}

/// Allow and deny matchers registered for one instance or type. Registering
/// the same side twice replaces it.
#[derive(Debug, Clone, Default)]
pub struct AccessRule {
    pub allow: Option<MethodMatcher>,
    pub deny: Option<MethodMatcher>,
}

impl AccessRule {
    /// Allow list: must be listed. Deny list: must not be listed.
    /// Allow predicate: must return true. Deny predicate: must return false.
    pub fn permits(&self, value: &Value, method: &str) -> bool {
        if let Some(allow) = &self.allow {
            if !allow.matches(value, method) {
                return false;
            }
        }
        if let Some(deny) = &self.deny {
            if deny.matches(value, method) {
                return false;
            }
        }
        true
    }
}

/// Enforcement configuration
#[derive(Debug, Clone, Default)]
pub struct Policy {
    denied_declarations: HashSet<DeclarationKind>,
    allowed_methods: HashSet<String>,
    denied_methods: HashSet<String>,
    allowed_constants: HashSet<String>,
    /// Keyed by identity; the value is kept so the identity stays valid
    instance_rules: Vec<(Identity, Value, AccessRule)>,
    /// In registration order
    type_rules: Vec<(String, AccessRule)>,
    maximum_iterations: Option<u64>,
    maximum_invocations: Option<u64>,
    maximum_invocations_of: HashMap<String, u64>,
    disabled: bool,
}

impl Policy {
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Nothing denied, no limits
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Convert a declarative policy file
    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        let mut builder = Policy::builder()
            .deny_invoke_of(config.invocations.deny.iter().cloned())
            .allow_invoke_of(config.invocations.allow.iter().cloned())
            .allowed_constants(config.constants.allow.iter().cloned())
            .disable(config.disabled);

        let kinds = config
            .declarations
            .deny
            .iter()
            .map(|kind| kind.parse())
            .collect::<Result<Vec<DeclarationKind>, _>>()?;
        builder = builder.deny_declarations_of(kinds);

        if let Some(max) = config.limits.max_iterations {
            builder = builder.maximum_iterations(max);
        }
        if let Some(max) = config.limits.max_invocations {
            builder = builder.maximum_invocations(max);
        }
        for (method, max) in &config.limits.invocations {
            builder = builder.maximum_invocations_of(method.clone(), *max);
        }

        for rule in &config.types {
            if rule.name.trim().is_empty() {
                return Err(PolicyError::InvalidField {
                    field: "types.name".to_string(),
                    reason: "type name cannot be empty".to_string(),
                });
            }
            if let Some(allow) = &rule.allow {
                builder = builder.allow_for(rule.name.clone(), allow.iter().cloned());
            }
            if let Some(deny) = &rule.deny {
                builder = builder.deny_for(rule.name.clone(), deny.iter().cloned());
            }
        }

        Ok(builder.build())
    }

    /// False only if the kind is explicitly denied
    pub fn can_declare(&self, kind: DeclarationKind) -> bool {
        !self.denied_declarations.contains(&kind)
    }

    /// False only if the method is globally denied
    pub fn allows_invocation(&self, method: &str) -> bool {
        !self.denied_methods.contains(method)
    }

    /// Whether `method` may be called on `value` with `argc` arguments
    ///
    /// The global deny set blocks; the global allow set skips the rule stage;
    /// otherwise the value's instance rule applies, or failing that the first
    /// matching type rule. A permitted call must finally be one the value
    /// natively implements.
    pub fn instance_response_to(&self, value: &Value, method: &str, argc: usize) -> bool {
        self.permits(value, method) && value.raw().responds_to(method, argc)
    }

    /// The rule stages of [`Policy::instance_response_to`], without the
    /// native arity check
    pub fn permits(&self, value: &Value, method: &str) -> bool {
        let value = value.raw();
        if self.denied_methods.contains(method) {
            return false;
        }
        if self.allowed_methods.contains(method) {
            return true;
        }
        self.rule_for(value)
            .map_or(true, |rule| rule.permits(value, method))
    }

    fn rule_for(&self, value: &Value) -> Option<&AccessRule> {
        let identity = value.identity();
        self.instance_rules
            .iter()
            .find(|(id, _, _)| *id == identity)
            .map(|(_, _, rule)| rule)
            .or_else(|| self.type_rule_for(value))
    }

    fn type_rule_for(&self, value: &Value) -> Option<&AccessRule> {
        let ancestors = value.ancestors();
        self.type_rules
            .iter()
            .find(|(type_name, _)| ancestors.iter().any(|ancestor| ancestor == type_name))
            .map(|(_, rule)| rule)
    }

    /// Whether some type rule covers the value's type
    pub fn has_type_rule_for(&self, value: &Value) -> bool {
        self.type_rule_for(value.raw()).is_some()
    }

    /// The runtime namespace is always allowed
    pub fn allowed_constant(&self, name: &str) -> bool {
        let name = name.trim_start_matches("::");
        name == RUNTIME_CONSTANT || self.allowed_constants.contains(name)
    }

    pub fn maximum_iterations(&self) -> Option<u64> {
        self.maximum_iterations
    }

    /// Per-method limit, else the global default
    pub fn maximum_invocations_of(&self, method: &str) -> Option<u64> {
        self.maximum_invocations_of
            .get(method)
            .copied()
            .or(self.maximum_invocations)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Copy of the policy with the disable switch off
    pub fn enforcing(&self) -> Policy {
        Policy {
            disabled: false,
            ..self.clone()
        }
    }

    pub fn denied_declarations(&self) -> impl Iterator<Item = DeclarationKind> + '_ {
        self.denied_declarations.iter().copied()
    }
}

/// Builder for [`Policy`]
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    pub fn deny_declarations_of(mut self, kinds: impl IntoIterator<Item = DeclarationKind>) -> Self {
        self.policy.denied_declarations.extend(kinds);
        self
    }

    pub fn allow_invoke_of<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy
            .allowed_methods
            .extend(methods.into_iter().map(Into::into));
        self
    }

    pub fn deny_invoke_of<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy
            .denied_methods
            .extend(methods.into_iter().map(Into::into));
        self
    }

    pub fn allowed_constants<I, S>(mut self, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.allowed_constants.extend(
            constants
                .into_iter()
                .map(|c| c.into().trim_start_matches("::").to_string()),
        );
        self
    }

    /// Only the listed methods may be called on this instance
    pub fn allow_on<I, S>(self, value: &Value, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instance_rule(value, |rule| rule.allow = Some(names(methods)))
    }

    pub fn deny_on<I, S>(self, value: &Value, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instance_rule(value, |rule| rule.deny = Some(names(methods)))
    }

    pub fn allow_on_if(
        self,
        value: &Value,
        predicate: impl Fn(&Value, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.instance_rule(value, |rule| {
            rule.allow = Some(MethodMatcher::Predicate(Arc::new(predicate)))
        })
    }

    pub fn deny_on_if(
        self,
        value: &Value,
        predicate: impl Fn(&Value, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.instance_rule(value, |rule| {
            rule.deny = Some(MethodMatcher::Predicate(Arc::new(predicate)))
        })
    }

    /// Only the listed methods may be called on instances of the type
    pub fn allow_for<I, S>(self, type_name: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_rule(type_name.into(), |rule| rule.allow = Some(names(methods)))
    }

    pub fn deny_for<I, S>(self, type_name: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_rule(type_name.into(), |rule| rule.deny = Some(names(methods)))
    }

    pub fn allow_for_if(
        self,
        type_name: impl Into<String>,
        predicate: impl Fn(&Value, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.type_rule(type_name.into(), |rule| {
            rule.allow = Some(MethodMatcher::Predicate(Arc::new(predicate)))
        })
    }

    pub fn deny_for_if(
        self,
        type_name: impl Into<String>,
        predicate: impl Fn(&Value, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.type_rule(type_name.into(), |rule| {
            rule.deny = Some(MethodMatcher::Predicate(Arc::new(predicate)))
        })
    }

    /// Limits are clamped to at least 1
    pub fn maximum_iterations(mut self, max: u64) -> Self {
        self.policy.maximum_iterations = Some(max.max(1));
        self
    }

    pub fn maximum_invocations(mut self, max: u64) -> Self {
        self.policy.maximum_invocations = Some(max.max(1));
        self
    }

    pub fn maximum_invocations_of(mut self, method: impl Into<String>, max: u64) -> Self {
        self.policy
            .maximum_invocations_of
            .insert(method.into(), max.max(1));
        self
    }

    pub fn disable(mut self, disabled: bool) -> Self {
        self.policy.disabled = disabled;
        self
    }

    pub fn build(self) -> Policy {
        self.policy
    }

    fn instance_rule(mut self, value: &Value, update: impl FnOnce(&mut AccessRule)) -> Self {
        let raw = value.unwrapped();
        let identity = raw.identity();
        match self
            .policy
            .instance_rules
            .iter_mut()
            .find(|(id, _, _)| *id == identity)
        {
            Some((_, _, rule)) => update(rule),
            None => {
                let mut rule = AccessRule::default();
                update(&mut rule);
                self.policy.instance_rules.push((identity, raw, rule));
            }
        }
        self
    }

    fn type_rule(mut self, type_name: String, update: impl FnOnce(&mut AccessRule)) -> Self {
        let type_name = type_name.trim_start_matches("::").to_string();
        match self
            .policy
            .type_rules
            .iter_mut()
            .find(|(name, _)| *name == type_name)
        {
            Some((_, rule)) => update(rule),
            None => {
                let mut rule = AccessRule::default();
                update(&mut rule);
                self.policy.type_rules.push((type_name, rule));
            }
        }
        self
    }
}

fn names<I, S>(methods: I) -> MethodMatcher
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    MethodMatcher::Names(methods.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("constant", DeclarationKind::Constant)]
    #[case("self", DeclarationKind::SelfRef)]
    #[case("gvar", DeclarationKind::Gvar)]
    fn test_declaration_kind_names(#[case] name: &str, #[case] kind: DeclarationKind) {
        assert_eq!(name.parse::<DeclarationKind>().unwrap(), kind);
        assert_eq!(kind.to_string(), name);
    }

    #[test]
    fn test_unknown_declaration_kind() {
        assert_eq!(
            "lambda".parse::<DeclarationKind>().unwrap_err(),
            PolicyError::UnknownDeclaration("lambda".to_string())
        );
    }

    #[test]
    fn test_permissive_policy() {
        let policy = Policy::permissive();
        assert!(DeclarationKind::ALL.iter().all(|kind| policy.can_declare(*kind)));
        assert!(policy.allows_invocation("delete"));
        assert_eq!(policy.maximum_iterations(), None);
        assert_eq!(policy.maximum_invocations_of("notify"), None);
        assert!(policy.instance_response_to(&Value::string("x"), "upcase", 0));
    }

    #[test]
    fn test_runtime_constant_always_allowed() {
        let policy = Policy::builder().allowed_constants(["::Math"]).build();
        assert!(policy.allowed_constant("Warden"));
        assert!(policy.allowed_constant("::Warden"));
        assert!(policy.allowed_constant("Math"));
        assert!(!policy.allowed_constant("File"));
    }

    #[test]
    fn test_limits_are_clamped() {
        let policy = Policy::builder()
            .maximum_iterations(0)
            .maximum_invocations(5)
            .maximum_invocations_of("notify", 0)
            .build();
        assert_eq!(policy.maximum_iterations(), Some(1));
        assert_eq!(policy.maximum_invocations_of("notify"), Some(1));
        assert_eq!(policy.maximum_invocations_of("other"), Some(5));
    }

    #[test]
    fn test_global_deny_beats_everything() {
        let policy = Policy::builder()
            .deny_invoke_of(["delete"])
            .allow_invoke_of(["delete"])
            .build();
        assert!(!policy.allows_invocation("delete"));
        assert!(!policy.instance_response_to(&Value::array(vec![]), "delete", 1));
    }

    #[test]
    fn test_type_allow_list() {
        let policy = Policy::builder()
            .allow_for("String", ["length", "upcase"])
            .build();
        let s = Value::string("abc");
        assert!(policy.instance_response_to(&s, "length", 0));
        assert!(policy.instance_response_to(&s, "upcase", 0));
        assert!(!policy.instance_response_to(&s, "reverse", 0));
        // Native arity still applies
        assert!(!policy.instance_response_to(&s, "length", 1));
        assert!(policy.has_type_rule_for(&s));
        assert!(!policy.has_type_rule_for(&Value::Integer(1)));
    }

    #[test]
    fn test_global_allow_skips_rules() {
        let policy = Policy::builder()
            .allow_for("String", ["length"])
            .allow_invoke_of(["to_s"])
            .build();
        assert!(policy.instance_response_to(&Value::string("a"), "to_s", 0));
    }

    #[test]
    fn test_first_matching_type_rule_wins() {
        let policy = Policy::builder()
            .allow_for("Comparable", ["length"])
            .deny_for("String", ["length"])
            .build();
        assert!(policy.instance_response_to(&Value::string("a"), "length", 0));
    }

    #[test]
    fn test_instance_rule_beats_type_rule() {
        let special = Value::array(vec![Value::Integer(1)]);
        let policy = Policy::builder()
            .deny_for("Array", ["first"])
            .allow_on(&special, ["first"])
            .build();
        assert!(policy.instance_response_to(&special, "first", 0));
        assert!(!policy.instance_response_to(&Value::array(vec![]), "first", 0));
    }

    #[test]
    fn test_predicates() {
        let policy = Policy::builder()
            .deny_for_if("Hash", |_, method| method.ends_with('='))
            .allow_for_if("Integer", |value, _| *value != Value::Integer(13))
            .build();
        let hash = Value::hash(vec![]);
        assert!(!policy.instance_response_to(&hash, "[]=", 2));
        assert!(policy.instance_response_to(&hash, "[]", 1));
        assert!(!policy.instance_response_to(&Value::Integer(13), "succ", 0));
        assert!(policy.instance_response_to(&Value::Integer(12), "succ", 0));
    }

    #[test]
    fn test_allow_and_deny_on_same_type_combine() {
        let policy = Policy::builder()
            .allow_for("Array", ["first", "last"])
            .deny_for("Array", ["last"])
            .build();
        let items = Value::array(vec![]);
        assert!(policy.instance_response_to(&items, "first", 0));
        assert!(!policy.instance_response_to(&items, "last", 0));
    }

    #[test]
    fn test_from_config() {
        let config = PolicyConfig::from_toml_str(
            r#"
disabled = true

[declarations]
deny = ["class", "ivar"]

[invocations]
deny = ["delete"]

[limits]
max_iterations = 0

[limits.invocations]
notify = 2

[[types]]
name = "String"
allow = ["length"]
"#,
        )
        .unwrap();
        let policy = Policy::from_config(&config).unwrap();

        assert!(!policy.can_declare(DeclarationKind::Class));
        assert!(!policy.can_declare(DeclarationKind::Ivar));
        assert!(policy.can_declare(DeclarationKind::Def));
        assert!(!policy.allows_invocation("delete"));
        assert_eq!(policy.maximum_iterations(), Some(1));
        assert_eq!(policy.maximum_invocations_of("notify"), Some(2));
        assert_eq!(policy.maximum_invocations_of("save"), None);
        assert!(!policy.instance_response_to(&Value::string("x"), "upcase", 0));
        assert!(policy.is_disabled());
    }

    #[test]
    fn test_from_config_rejects_unknown_kind() {
        let mut config = PolicyConfig::default();
        config.declarations.deny.push("lambda".to_string());
        assert!(matches!(
            Policy::from_config(&config),
            Err(PolicyError::UnknownDeclaration(_))
        ));
    }
}
