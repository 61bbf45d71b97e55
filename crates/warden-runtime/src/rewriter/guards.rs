//! Resource guard snippets
//!
//! Generated text that counts loop iterations and limited invocations. Each
//! loop site gets its own counter (`_it_c_1`, `_it_c_2`, ...); invocation
//! counters are shared per method name. Counters are locals, zeroed by the
//! initializer line placed at the top of the rewritten script.

use crate::policy::RUNTIME_CONSTANT;

pub const DEFAULT_ITERATION_PREFIX: &str = "_it_c";
pub const DEFAULT_INVOKE_PREFIX: &str = "_invk_c";

/// Counter names of operator methods
const OPERATOR_NAMES: &[(&str, &str)] = &[
    ("**", "0exp"),
    ("+", "0add"),
    ("-", "0sub"),
    ("!", "0neg"),
    ("~", "0reg"),
    ("*", "0mult"),
    ("/", "0div"),
    ("%", "0mod"),
    ("<<", "0lshift"),
    (">>", "0rshift"),
    ("&", "0bitwise_and"),
    ("|", "0bitwise_or"),
    ("^", "0bitwise_xor"),
    (">", "0gt"),
    (">=", "0gte"),
    ("<", "0lt"),
    ("<=", "0lte"),
    ("==", "0eq"),
    ("===", "0rship"),
    ("<=>", "0comp"),
    ("!=", "0neq"),
    ("=~", "0regex_eq"),
    ("!~", "0not_regex"),
    ("[]", "0index"),
    ("[]=", "0index_assign"),
    ("-@", "0uminus"),
    ("+@", "0uplus"),
];

/// Counter allocation for one rewrite
#[derive(Debug, Clone)]
pub struct GuardCounters {
    iteration_prefix: String,
    invoke_prefix: String,
    iteration_sites: usize,
    limited_methods: Vec<String>,
}

impl Default for GuardCounters {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATION_PREFIX, DEFAULT_INVOKE_PREFIX)
    }
}

impl GuardCounters {
    pub fn new(iteration_prefix: impl Into<String>, invoke_prefix: impl Into<String>) -> Self {
        Self {
            iteration_prefix: iteration_prefix.into(),
            invoke_prefix: invoke_prefix.into(),
            iteration_sites: 0,
            limited_methods: Vec::new(),
        }
    }

    /// Allocate a counter for a new loop site and return its snippet
    pub fn iteration_snippet(&mut self) -> String {
        self.iteration_sites += 1;
        let counter = self.iteration_counter(self.iteration_sites);
        format!(
            " ;{counter} += 1; ::{RUNTIME_CONSTANT}.check_iteration_counter({counter}); "
        )
    }

    /// Snippet counting one call of `method`
    pub fn invocation_snippet(&mut self, method: &str) -> String {
        if !self.limited_methods.iter().any(|m| m == method) {
            self.limited_methods.push(method.to_string());
        }
        let counter = self.invocation_counter(method);
        format!(
            " ;{counter} += 1; ::{RUNTIME_CONSTANT}.check_invocation_counter(:{method}, {counter}); "
        )
    }

    fn iteration_counter(&self, site: usize) -> String {
        format!("{}_{}", self.iteration_prefix, site)
    }

    /// Local variable counting calls of `method`
    ///
    /// `0` marks what is not part of the name: operator names start with it,
    /// `?`, `!` and `=` suffixes become `0query`, `0bang` and `0assign`, and
    /// a literal `0` is doubled. Distinct methods get distinct counters.
    pub fn invocation_counter(&self, method: &str) -> String {
        let name = match OPERATOR_NAMES.iter().find(|(op, _)| *op == method) {
            Some((_, name)) => (*name).to_string(),
            None => {
                let (stem, suffix) = match method.as_bytes().last() {
                    Some(b'?') => (&method[..method.len() - 1], "0query"),
                    Some(b'!') => (&method[..method.len() - 1], "0bang"),
                    Some(b'=') => (&method[..method.len() - 1], "0assign"),
                    _ => (method, ""),
                };
                format!("{}{}", stem.replace('0', "00"), suffix)
            }
        };
        format!("{}_{}", self.invoke_prefix, name)
    }

    pub fn iteration_sites(&self) -> usize {
        self.iteration_sites
    }

    pub fn limited_methods(&self) -> &[String] {
        &self.limited_methods
    }

    /// Zero-initializers for every allocated counter: loop sites first, then
    /// limited methods in discovery order
    pub fn initializers(&self) -> String {
        let iterations = (1..=self.iteration_sites).map(|site| self.iteration_counter(site));
        let invocations = self
            .limited_methods
            .iter()
            .map(|method| self.invocation_counter(method));
        iterations
            .chain(invocations)
            .map(|counter| format!("{} = 0; ", counter))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_iteration_snippets_number_sites() {
        let mut counters = GuardCounters::default();
        assert_eq!(
            counters.iteration_snippet(),
            " ;_it_c_1 += 1; ::Warden.check_iteration_counter(_it_c_1); "
        );
        assert!(counters.iteration_snippet().contains("_it_c_2 += 1"));
        assert_eq!(counters.iteration_sites(), 2);
    }

    #[test]
    fn test_invocation_counters_are_shared_per_method() {
        let mut counters = GuardCounters::default();
        let first = counters.invocation_snippet("notify");
        let second = counters.invocation_snippet("notify");
        assert_eq!(first, second);
        assert_eq!(
            first,
            " ;_invk_c_notify += 1; ::Warden.check_invocation_counter(:notify, _invk_c_notify); "
        );
        assert_eq!(counters.limited_methods(), &["notify".to_string()]);
    }

    #[rstest]
    #[case("save", "_invk_c_save")]
    #[case("+", "_invk_c_0add")]
    #[case("[]=", "_invk_c_0index_assign")]
    #[case("valid?", "_invk_c_valid0query")]
    #[case("save!", "_invk_c_save0bang")]
    #[case("name=", "_invk_c_name0assign")]
    #[case("save_query", "_invk_c_save_query")]
    #[case("v0query?", "_invk_c_v00query0query")]
    fn test_counter_names(#[case] method: &str, #[case] expected: &str) {
        assert_eq!(GuardCounters::default().invocation_counter(method), expected);
    }

    #[test]
    fn test_counter_names_do_not_collide() {
        let counters = GuardCounters::default();
        let methods = [
            "save?", "save_query", "save0query", "save!", "save_bang", "name=", "name_assign",
            "+", "add", "0add", "[]=", "index_assign",
        ];
        let names: std::collections::HashSet<String> =
            methods.iter().map(|m| counters.invocation_counter(m)).collect();
        assert_eq!(names.len(), methods.len());
    }

    #[test]
    fn test_initializers_order() {
        let mut counters = GuardCounters::new("it", "inv");
        counters.invocation_snippet("b");
        counters.iteration_snippet();
        counters.invocation_snippet("a");
        counters.iteration_snippet();
        assert_eq!(
            counters.initializers(),
            "it_1 = 0; it_2 = 0; inv_b = 0; inv_a = 0; "
        );
        assert_eq!(GuardCounters::default().initializers(), "");
    }
}
