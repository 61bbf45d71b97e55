//! Rewriter behavior on whole scripts

use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;
use warden_runtime::{
    rewrite, rewrite_logged, validate, DeclarationKind, Policy, RewriteError, RewriteLog,
    RewriteOptions, RubyParser, ScriptParser, SelfLinker, SelfSendPrefixer, Span, Violation,
};

const ITERATION_CHECK: &str = " ;_it_c_1 += 1; ::Warden.check_iteration_counter(_it_c_1); ";

fn permissive(source: &str) -> String {
    rewrite(source, &Policy::permissive(), &RewriteOptions::default()).unwrap()
}

// === Capability wrapping ===

#[test]
fn test_receivers_and_assigned_values_are_wrapped() {
    assert_eq!(
        permissive("x = y.length"),
        "x = ::Warden.handle(::Warden.handle(::Warden.handle(self).y).length)"
    );
}

#[test]
fn test_scalar_literals_stay_raw() {
    assert_eq!(
        permissive("a = 1\nb = a + 2"),
        "a = 1\nb = ::Warden.handle(::Warden.handle(a) + 2)"
    );
}

#[test]
fn test_literal_receiver_wrapped_under_type_rule() {
    let policy = Policy::builder().allow_for("String", ["length"]).build();
    let code = rewrite("\"abc\".length", &policy, &RewriteOptions::default()).unwrap();
    assert_eq!(code, "::Warden.handle(\"abc\").length");
}

#[test]
fn test_arguments_and_container_elements_are_unwrapped() {
    assert_eq!(
        permissive("a = 1\nputs([a, 2])"),
        "a = 1\n::Warden.handle(self).puts([(a).warden_raw, 2])"
    );
    assert_eq!(
        permissive("a = 1\nh = { key: a }"),
        "a = 1\nh = ::Warden.handle({ key: (a).warden_raw })"
    );
}

#[test]
fn test_constants_are_checked() {
    assert_eq!(
        permissive("Math.sqrt(4)"),
        "::Warden.handle(Math, constant: true).sqrt(4)"
    );
    assert_eq!(
        permissive("puts Math"),
        "::Warden.handle(self).puts (::Warden.handle(Math, constant: true)).warden_raw"
    );
}

#[rstest]
#[case::parenthesized(
    "(File).delete('a')",
    "::Warden.handle((::Warden.handle(File, constant: true))).delete('a')"
)]
#[case::or_operand(
    "y = x || File",
    "y = ::Warden.handle(::Warden.handle(self).x || ::Warden.handle(File, constant: true))"
)]
#[case::assigned("y = File", "y = ::Warden.handle(File, constant: true)")]
#[case::path("A::B.run", "::Warden.handle(A::B, constant: true).run")]
#[case::top_level("::File.read", "::Warden.handle(::File, constant: true).read")]
fn test_every_constant_read_is_checked(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(permissive(source), expected);
}

#[test]
fn test_declared_names_are_not_checked() {
    assert_eq!(permissive("class Job < Base\nend"), "class Job < Base\nend");
    assert_eq!(permissive("A::LIMIT = 3"), "A::LIMIT = 3");
}

#[test]
fn test_locals_are_declared_before_the_script() {
    let options = RewriteOptions::default().with_locals(["record"]);
    let code = rewrite("record.save", &Policy::permissive(), &options).unwrap();
    assert_eq!(code, "record ||= nil\n::Warden.handle(record).save");
}

#[test]
fn test_default_parameters_are_rewritten() {
    assert_eq!(
        permissive("def add(a, b = x)\n  a + b\nend"),
        "def add(a, b = ::Warden.handle(::Warden.handle(self).x))\n  ::Warden.handle(a) + (b).warden_raw\nend"
    );
    assert_eq!(
        permissive("def scale(n, by: 2)\nend"),
        "def scale(n, by: 2)\nend"
    );
}

// === Symbol blocks ===

#[test]
fn test_symbol_block_pass_becomes_block() {
    assert_eq!(
        permissive("[1, 2].map(&:to_s)"),
        "::Warden.handle([1, 2]).map() { |item| ::Warden.handle(item).to_s }"
    );
}

#[test]
fn test_inject_symbol_becomes_block() {
    assert_eq!(
        permissive("[1, 2].inject(0, :+)"),
        "::Warden.handle([1, 2]).inject(0) { |memo, item| ::Warden.handle(memo) + (item).warden_raw }"
    );
}

#[test]
fn test_denied_symbol_method_is_reported() {
    let policy = Policy::builder().deny_invoke_of(["destroy"]).build();
    let errors = validate("items.each(&:destroy)", &policy);
    assert_eq!(errors, vec!["invoking method 'destroy' is not allowed"]);
}

// === Resource guards ===

#[test]
fn test_block_iterations_are_counted() {
    let policy = Policy::builder().maximum_iterations(3).build();
    let code = rewrite("items.each do |i|\n  i\nend", &policy, &RewriteOptions::default()).unwrap();
    assert_eq!(
        code,
        format!(
            "_it_c_1 = 0; ::Warden.handle(::Warden.handle(self).items).each {{ |i|{}\n  i\n}}",
            ITERATION_CHECK
        )
    );
}

#[test]
fn test_command_call_keeps_do_block() {
    let policy = Policy::builder().maximum_iterations(3).build();
    let code = rewrite("each_page 5 do |page|\nend", &policy, &RewriteOptions::default()).unwrap();
    assert!(code.contains("each_page 5 do |page|"));
    assert!(code.ends_with("\nend"));
}

#[test]
fn test_while_loop_iterations_are_counted() {
    let policy = Policy::builder().maximum_iterations(10).build();
    let code = rewrite(
        "x = 0\nwhile x < 3\n  x += 1\nend",
        &policy,
        &RewriteOptions::default(),
    )
    .unwrap();
    assert!(code.starts_with("_it_c_1 = 0; x = 0\n"));
    assert!(code.contains(&format!("while ::Warden.handle(x) < 3{}", ITERATION_CHECK)));
}

#[test]
fn test_modifier_while_body_is_parenthesized() {
    let policy = Policy::builder().maximum_iterations(10).build();
    let code = rewrite("x = 0\nx += 1 while x < 10", &policy, &RewriteOptions::default()).unwrap();
    assert_eq!(
        code,
        format!(
            "_it_c_1 = 0; x = 0\n({}x += 1) while ::Warden.handle(x) < 10",
            ITERATION_CHECK
        )
    );
}

#[test]
fn test_begin_while_counts_inside_begin() {
    let policy = Policy::builder().maximum_iterations(10).build();
    let code = rewrite(
        "x = 0\nbegin\n  x += 1\nend while x < 10",
        &policy,
        &RewriteOptions::default(),
    )
    .unwrap();
    assert!(code.contains(&format!("begin{}\n  x += 1\nend while", ITERATION_CHECK)));
    assert!(!code.contains("_it_c_2"));
}

#[test]
fn test_every_loop_site_gets_a_counter() {
    let policy = Policy::builder().maximum_iterations(10).build();
    let code = rewrite(
        "for i in [1, 2] do\n  [3].each { |j| j }\nend",
        &policy,
        &RewriteOptions::default(),
    )
    .unwrap();
    assert!(code.starts_with("_it_c_1 = 0; _it_c_2 = 0; "));
    assert!(code.contains("::Warden.check_iteration_counter(_it_c_1)"));
    assert!(code.contains("::Warden.check_iteration_counter(_it_c_2)"));
}

#[test]
fn test_limited_invocations_are_counted_before_statement() {
    let policy = Policy::builder().maximum_invocations_of("notify", 2).build();
    let code = rewrite("notify(1)\nnotify(2)", &policy, &RewriteOptions::default()).unwrap();
    let check = " ;_invk_c_notify += 1; ::Warden.check_invocation_counter(:notify, _invk_c_notify); ";
    assert_eq!(
        code,
        format!(
            "_invk_c_notify = 0; {check}::Warden.handle(self).notify(1)\n{check}::Warden.handle(self).notify(2)"
        )
    );
}

#[test]
fn test_invocation_inside_block_is_counted_in_block() {
    let policy = Policy::builder().maximum_invocations_of("notify", 2).build();
    let code = rewrite("items.each { |i| notify(i) }", &policy, &RewriteOptions::default()).unwrap();
    assert!(code.contains(
        "{ |i| ;_invk_c_notify += 1; ::Warden.check_invocation_counter(:notify, _invk_c_notify);  ::Warden.handle(self).notify((i).warden_raw) }"
    ));
}

#[test]
fn test_custom_counter_prefixes() {
    let policy = Policy::builder()
        .maximum_iterations(1)
        .maximum_invocations_of("save!", 1)
        .build();
    let options = RewriteOptions {
        iteration_counter_prefix: "loops".to_string(),
        invoke_counter_prefix: "calls".to_string(),
        ..RewriteOptions::default()
    };
    let code = rewrite("x = 1\nloop { x.save! }", &policy, &options).unwrap();
    assert!(code.starts_with("loops_1 = 0; calls_save0bang = 0; "));
    assert!(code.contains("::Warden.check_invocation_counter(:save!, calls_save0bang)"));
}

#[test]
fn test_permissive_policy_adds_no_guards() {
    let code = permissive("x = 0\nwhile x < 3\n  x += 1\nend\n[1].each { |i| i }");
    assert!(!code.contains("check_iteration_counter"));
    assert!(!code.contains("check_invocation_counter"));
}

#[rstest]
#[case("x = y.length")]
#[case("items.each do |i|\n  puts i\nend")]
#[case("x = 0\nx += 1 while x < 10")]
#[case("if ready? then go else stop end")]
#[case("x = 1\na = x ? 1 : 2")]
#[case("[1, 2].inject(:+)")]
#[case("def helper(a)\n  return a.name\nend")]
#[case("def add(a, b = x.size, scale: 2)\n  a + b * scale\nend")]
#[case("y = (File) || A::B")]
fn test_rewritten_code_parses(#[case] source: &str) {
    let policy = Policy::builder()
        .maximum_iterations(100)
        .maximum_invocations(100)
        .build();
    let code = rewrite(source, &policy, &RewriteOptions::default()).unwrap();
    assert!(RubyParser.parse(&code).is_ok(), "unparseable output: {}", code);
}

// === Validation ===

#[test]
fn test_validate_reports_each_denied_construct() {
    let policy = Policy::builder()
        .deny_declarations_of([DeclarationKind::Class, DeclarationKind::Gvar])
        .build();
    assert_eq!(
        validate("class Foo; end\nputs $stdout", &policy),
        vec!["can not define classes", "can not access global variables"]
    );
}

#[test]
fn test_validate_clean_script() {
    let policy = Policy::builder()
        .deny_declarations_of([DeclarationKind::Def])
        .deny_invoke_of(["system"])
        .build();
    assert!(validate("x = [1, 2].map { |i| i * 2 }", &policy).is_empty());
}

#[test]
fn test_validate_ignores_disable_switch() {
    let policy = Policy::builder()
        .deny_invoke_of(["system"])
        .disable(true)
        .build();
    assert_eq!(
        validate("system(\"ls\")", &policy),
        vec!["invoking method 'system' is not allowed"]
    );
}

#[test]
fn test_validate_syntax_error() {
    let errors = validate("foo(1,", &Policy::permissive());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("syntax error: "));
}

#[test]
fn test_halt_on_first_violation() {
    let policy = Policy::builder()
        .deny_declarations_of([DeclarationKind::Ivar])
        .build();
    let err = rewrite("x = 1\n@y = 2", &policy, &RewriteOptions::default()).unwrap_err();
    assert_eq!(
        err,
        RewriteError::Violation(Violation::DeniedDeclaration {
            kind: DeclarationKind::Ivar,
            span: Span::new(6, 12),
        })
    );
    assert_eq!(err.to_string(), "can not access instance variables");
}

#[test]
fn test_keep_going_logs_and_rewrites() {
    let policy = Policy::builder()
        .deny_declarations_of([DeclarationKind::Ivar])
        .deny_invoke_of(["shutdown"])
        .build();
    let mut log = RewriteLog::new();
    let code = rewrite_logged(
        "@y = 2\nshutdown",
        &policy,
        &RewriteOptions::default().keep_going(),
        &mut log,
    )
    .unwrap();
    assert_eq!(code, "@y = 2\n::Warden.handle(self).shutdown");
    assert_eq!(
        log.errors,
        vec!["can not access instance variables", "invoking method 'shutdown' is not allowed"]
    );
    assert_eq!(log.diagnostics[1].line, 2);
}

#[test]
fn test_disabled_policy_leaves_source_alone() {
    let policy = Policy::builder()
        .maximum_iterations(1)
        .deny_invoke_of(["exit"])
        .disable(true)
        .build();
    let source = "loop { exit }";
    assert_eq!(rewrite(source, &policy, &RewriteOptions::default()).unwrap(), source);
}

// === Self sends ===

struct Known(&'static [&'static str]);

impl SelfLinker for Known {
    fn link(&self, method: &str) -> bool {
        self.0.contains(&method)
    }
}

struct HostPrefix;

impl SelfSendPrefixer for HostPrefix {
    fn prefix(&self, method: &str, linker: Option<&dyn SelfLinker>) -> String {
        match linker {
            Some(linker) if linker.link(method) => "host_".to_string(),
            _ => String::new(),
        }
    }
}

#[test]
fn test_unlinked_self_send_is_reported() {
    let options = RewriteOptions::default()
        .keep_going()
        .with_self_linker(Arc::new(Known(&["notify"])));
    let mut log = RewriteLog::new();
    rewrite_logged("notify(1)\nexec(2)", &Policy::permissive(), &options, &mut log).unwrap();
    assert_eq!(log.errors, vec!["error linking exec"]);
    assert_eq!(
        log.self_sends.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["exec", "notify"]
    );
}

#[test]
fn test_self_send_prefixer() {
    let options = RewriteOptions::default()
        .with_self_linker(Arc::new(Known(&["notify"])))
        .with_self_send_prefixer(Arc::new(HostPrefix));
    let code = rewrite("notify(1)", &Policy::permissive(), &options).unwrap();
    assert_eq!(code, "::Warden.handle(self).host_notify(1)");
}
