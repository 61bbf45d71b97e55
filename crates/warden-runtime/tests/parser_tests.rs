//! Parser acceptance over the script dialect

use rstest::rstest;
use warden_runtime::{error_codes, RubyParser, ScriptParser};

fn first_kind(source: &str) -> &'static str {
    let program = RubyParser
        .parse(source)
        .unwrap_or_else(|err| panic!("{:?} failed to parse: {}", source, err));
    let last = program.statements.last().expect("no statements");
    last.kind_name()
}

#[rstest]
#[case::integer("42", "int")]
#[case::float("3.14", "float")]
#[case::string("\"a\\n\"", "str")]
#[case::symbol(":name", "sym")]
#[case::operator_symbol(":+", "sym")]
#[case::array("[1, :a, 'b']", "array")]
#[case::hash("{ a: 1, 'b' => 2 }", "hash")]
#[case::range("(1..3)", "begin")]
#[case::local("x = 1\nx", "lvar")]
#[case::call("foo", "send")]
#[case::safe_nav("x = nil\nx&.name", "csend")]
#[case::index_assign("h = {}\nh[:a] = 1", "send")]
#[case::op_asgn("x = 1\nx += 2", "op_asgn")]
#[case::or_asgn("x ||= 2", "op_asgn")]
#[case::ivasgn("@a = 1", "ivasgn")]
#[case::gvar("$stdout", "gvar")]
#[case::const_path("A::B", "const")]
#[case::casgn("LIMIT = 3", "casgn")]
#[case::block("[1].each { |i| i }", "block")]
#[case::do_block("[1].each do |i|\n  i\nend", "block")]
#[case::block_pass("[1].map(&:to_s)", "send")]
#[case::modifier_if("go if ready", "if")]
#[case::unless("unless done\n  go\nend", "if")]
#[case::ternary("x = 1\nx ? 1 : 2", "if")]
#[case::elsif("if a\n  1\nelsif b\n  2\nelse\n  3\nend", "if")]
#[case::while_loop("while busy do\n  work\nend", "while")]
#[case::until_modifier("work until done", "until")]
#[case::for_loop("for i in [1, 2]\n  i\nend", "for")]
#[case::kwbegin("begin\n  1\nend", "kwbegin")]
#[case::def("def add(a, b = 1)\n  a + b\nend", "def")]
#[case::class("class Job < Base\n  def run; end\nend", "class")]
#[case::module("module Tasks; end", "module")]
#[case::and_or("a and b or c", "or")]
#[case::not("not ready", "send")]
fn test_dialect_construct(#[case] source: &str, #[case] kind: &str) {
    assert_eq!(first_kind(source), kind);
}

#[rstest]
#[case::unclosed_call("foo(1, 2", error_codes::UNEXPECTED_EOF)]
#[case::unclosed_block("[1].each do |i|\n", error_codes::UNEXPECTED_EOF)]
#[case::case_expression("case x\nwhen 1 then 2\nend", error_codes::UNSUPPORTED_SYNTAX)]
#[case::rescue("begin\n  x\nrescue\n  y\nend", error_codes::UNSUPPORTED_SYNTAX)]
fn test_rejected_source(#[case] source: &str, #[case] code: &str) {
    let err = RubyParser.parse(source).unwrap_err();
    assert_eq!(err.diagnostic.code, code, "{}", err);
}
