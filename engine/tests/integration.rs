use std::collections::HashMap;
use std::io::Write;

use engine::context::Frame;
use engine::reader::{SourcePath, SourceReader};
use engine::{EngineError, Machine, ReadError, ReaderRegistry, Value};

/// In-memory reader over a fixed reference → content map.
struct MapReader {
    files: HashMap<String, String>,
}

impl MapReader {
    fn new(entries: &[(&str, &str)]) -> Self {
        MapReader {
            files: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl SourceReader for MapReader {
    fn supports(&self, reference: &str) -> bool {
        self.files.contains_key(reference)
    }

    fn read(&self, reference: &str) -> Result<String, ReadError> {
        self.files
            .get(reference)
            .cloned()
            .ok_or_else(|| ReadError::NotFound {
                reference: reference.to_string(),
                detail: "no such entry".to_string(),
            })
    }

    fn parse_path(&self, reference: &str) -> SourcePath {
        match reference.rsplit_once('/') {
            Some((dir, file)) => SourcePath {
                file: file.to_string(),
                path: dir.to_string(),
            },
            None => SourcePath {
                file: reference.to_string(),
                path: String::new(),
            },
        }
    }
}

fn machine() -> Machine {
    Machine::new(ReaderRegistry::new())
}

fn machine_with(entries: &[(&str, &str)]) -> Machine {
    let mut registry = ReaderRegistry::new();
    registry.register(Box::new(MapReader::new(entries)));
    Machine::new(registry)
}

fn run(source: &str) -> String {
    machine().execute(source).expect("execution failed")
}

fn run_trimmed(source: &str) -> String {
    run(source).trim().to_string()
}

fn run_err(source: &str) -> EngineError {
    machine().execute(source).expect_err("expected failure")
}

// ---------------------------------------------------------------------------
// Verbatim output
// ---------------------------------------------------------------------------

#[test]
fn directive_free_input_is_unchanged() {
    let input = "fn main() {\n    println!(\"hi\");\n}\n";
    assert_eq!(run(input), input);
}

#[test]
fn directive_free_input_without_trailing_newline() {
    let input = "one\ntwo";
    assert_eq!(run(input), input);
}

#[test]
fn expanded_output_reexecutes_unchanged() {
    let expanded = run("@set x 1\nvalue @{x}\n");
    assert_eq!(run(&expanded), expanded);
}

// ---------------------------------------------------------------------------
// Inline expressions
// ---------------------------------------------------------------------------

#[test]
fn inline_arithmetic() {
    assert_eq!(run_trimmed("@{156*4+3}"), "627");
    assert_eq!(run_trimmed("@{(256-128)/2}"), "64");
    assert_eq!(run_trimmed("@{10 % 3}"), "1");
}

#[test]
fn operator_precedence() {
    assert_eq!(run_trimmed("@{2 + 3 * 4}"), "14");
    assert_eq!(run_trimmed("@{(2 + 3) * 4}"), "20");
    assert_eq!(run_trimmed("@{true || false && false}"), "true");
}

#[test]
fn unary_operators() {
    assert_eq!(run_trimmed("@{-5 + 10}"), "5");
    assert_eq!(run_trimmed("@{!false}"), "true");
    assert_eq!(run_trimmed("@{!0}"), "true");
}

#[test]
fn ternary_short_circuit() {
    assert_eq!(run_trimmed("@{1 ? 100 : undefinedVar}"), "100");
    assert_eq!(run_trimmed("@{0 ? undefinedVar : 7}"), "7");
}

#[test]
fn string_concatenation() {
    assert_eq!(run_trimmed("@{\"a\" + 1}"), "a1");
    assert_eq!(run_trimmed("@{1 + \"a\"}"), "1a");
    assert_eq!(run_trimmed("@{'x' + 'y'}"), "xy");
}

#[test]
fn number_literals_with_exponent() {
    assert_eq!(run_trimmed("@{1E6}"), "1000000");
    assert_eq!(run_trimmed("@{1e-6 * 1e6}"), "1");
    assert_eq!(run_trimmed("@{1.567}"), "1.567");
}

#[test]
fn equality_semantics() {
    assert_eq!(run_trimmed("@{null == null}"), "true");
    assert_eq!(run_trimmed("@{1 == \"1\"}"), "false");
    assert_eq!(run_trimmed("@{\"ab\" == \"ab\"}"), "true");
    assert_eq!(run_trimmed("@{1 != 2}"), "true");
}

#[test]
fn undefined_identifier_is_null() {
    assert_eq!(run_trimmed("@{missing}"), "null");
    assert_eq!(run_trimmed("@{missing.field}"), "null");
}

#[test]
fn array_literals_and_indexing() {
    assert_eq!(run_trimmed("@{[10, 20, 30][1]}"), "20");
    assert_eq!(run_trimmed("@{[1, 2, 3]}"), "1,2,3");
    assert_eq!(run_trimmed("@{[1, 2][9]}"), "null");
}

#[test]
fn member_access_on_object_context() {
    let mut conf = HashMap::new();
    conf.insert("port".to_string(), Value::Number(8080.0));
    let mut context = Frame::new();
    context.insert("conf".to_string(), Value::Object(conf));

    let mut m = machine();
    assert_eq!(
        m.execute_with("@{conf.port}", context.clone()).unwrap(),
        "8080"
    );
    assert_eq!(m.execute_with("@{conf.missing}", context).unwrap(), "null");
}

// ---------------------------------------------------------------------------
// Expression errors
// ---------------------------------------------------------------------------

#[test]
fn division_by_zero() {
    let err = run_err("@{1/0}");
    assert!(err.to_string().contains("Division by zero"), "{}", err);
    let err = run_err("@{1 % 0}");
    assert!(err.to_string().contains("Division by zero"), "{}", err);
}

#[test]
fn expression_errors_cite_file_and_line() {
    let err = run_err("line one\n@{1/0}\n");
    assert!(err.to_string().contains("(main:2)"), "{}", err);
}

#[test]
fn min_max_arity() {
    let err = run_err("@{min()}");
    assert!(
        err.to_string().contains("Wrong number of arguments for min()"),
        "{}",
        err
    );
    let err = run_err("@{max()}");
    assert!(
        err.to_string().contains("Wrong number of arguments for max()"),
        "{}",
        err
    );
}

#[test]
fn builtin_numerics() {
    assert_eq!(run_trimmed("@{min(3, 1, 2)}"), "1");
    assert_eq!(run_trimmed("@{max(3, 1, 2)}"), "3");
    assert_eq!(run_trimmed("@{abs(-5)}"), "5");
}

#[test]
fn defined_builtin() {
    assert_eq!(run_trimmed("@{defined(nope)}"), "false");
    assert_eq!(run_trimmed("@set x 1\n@{defined(x)}"), "true");
    assert_eq!(run_trimmed("@{defined(min)}"), "true");

    let err = run_err("@{defined(\"str\")}");
    assert!(err.to_string().contains("defined()"), "{}", err);
}

#[test]
fn backtick_string_is_rejected() {
    let err = run_err("@{`abc`}");
    assert!(err.to_string().contains("Unexpected \"`\""), "{}", err);
}

#[test]
fn this_keyword_is_rejected() {
    let err = run_err("@{this}");
    assert!(
        err.to_string().contains("`this` keyword is not supported"),
        "{}",
        err
    );
}

// ---------------------------------------------------------------------------
// @set and the global context
// ---------------------------------------------------------------------------

#[test]
fn set_with_and_without_equals() {
    assert_eq!(run_trimmed("@set x 42\n@{x}"), "42");
    assert_eq!(run_trimmed("@set x = 5\n@{x + 1}"), "6");
}

#[test]
fn set_is_visible_at_any_nesting_depth() {
    let mut m = machine_with(&[("inc", "@set fromInc 7\n")]);
    let output = m.execute("@include \"inc\"\n@{fromInc}\n").unwrap();
    assert_eq!(output, "7\n");
}

#[test]
fn set_inside_macro_is_visible_after_expansion() {
    let source = "@macro INIT()\n@set ready true\n@end\n@include INIT()\n@{ready}\n";
    assert_eq!(run_trimmed(source), "true");
}

#[test]
fn caller_context_is_visible_to_expressions() {
    let mut context = Frame::new();
    context.insert("DEBUG".to_string(), Value::Bool(true));
    let mut m = machine();
    let output = m
        .execute_with("@if DEBUG\non\n@endif\n", context)
        .unwrap();
    assert_eq!(output, "on\n");
}

// ---------------------------------------------------------------------------
// Conditionals
// ---------------------------------------------------------------------------

#[test]
fn conditional_branches() {
    assert_eq!(run_trimmed("@if true\nyes\n@else\nno\n@endif"), "yes");
    assert_eq!(run_trimmed("@if false\nyes\n@else\nno\n@endif"), "no");
    assert_eq!(
        run_trimmed("@if false\na\n@elseif true\nb\n@else\nc\n@endif"),
        "b"
    );
    assert_eq!(run_trimmed("@if false\na\n@endif"), "");
}

#[test]
fn elseif_chain_short_circuits() {
    // The chain stops at the first truthy test; later tests are not evaluated.
    let source = "@if false\na\n@elseif true\nb\n@elseif 1/0\nc\n@endif\n";
    assert_eq!(run(source), "b\n");
}

#[test]
fn nested_conditionals() {
    let source = "@if true\n@if false\ninner\n@else\nouter\n@endif\n@endif\n";
    assert_eq!(run(source), "outer\n");
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

#[test]
fn while_loop() {
    let source = "@set i 0\n@while i < 3\n@{i}\n@set i = i + 1\n@endwhile\n";
    assert_eq!(run(source), "0\n1\n2\n");
}

#[test]
fn repeat_loop_with_loop_context() {
    let source = "@repeat 3\n@{loop.index}:@{loop.iteration}\n@endrepeat\n";
    assert_eq!(run(source), "0:1\n1:2\n2:3\n");
}

#[test]
fn repeat_zero_iterations() {
    assert_eq!(run("@repeat 0\nbody\n@endrepeat\n"), "");
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[test]
fn macro_directive_inclusion() {
    let source = "@macro GREET(name)\nHello @{name}!\n@end\n@include GREET(\"world\")\n";
    assert_eq!(run(source), "Hello world!\n");
}

#[test]
fn macro_missing_parameters_bind_null() {
    let source = "@macro GREET(name)\nHello @{name}!\n@end\n@include GREET()\n";
    assert_eq!(run(source), "Hello null!\n");
}

#[test]
fn macro_excess_arguments_are_discarded() {
    let source = "@macro GREET(name)\nHello @{name}!\n@end\n@include GREET(\"a\", \"b\", \"c\")\n";
    assert_eq!(run(source), "Hello a!\n");
}

#[test]
fn macro_as_expression_function() {
    let source = "@macro TWICE(x)\n@{x * 2}\n@end\n@{TWICE(21)}\n";
    assert_eq!(run_trimmed(source), "42");
}

#[test]
fn macro_parameters_shadow_globals() {
    let source = "@set x 1\n@macro SHOW(x)\n@{x}\n@end\n@include SHOW(9)\n@{x}\n";
    assert_eq!(run(source), "9\n1\n");
}

#[test]
fn macro_redeclaration_cites_both_sites() {
    let err = run_err("@macro FOO()\n@end\n@macro FOO()\n@end\n");
    assert!(
        matches!(err, EngineError::MacroAlreadyDeclared { .. }),
        "{:?}",
        err
    );
    let message = err.to_string();
    assert!(message.contains("main:1"), "{}", message);
    assert!(message.contains("main:3"), "{}", message);
}

#[test]
fn macro_body_carries_declaration_provenance() {
    // __FILE__ inside a macro body names the file where the macro was
    // declared, not where it was called.
    let mut m = machine_with(&[("lib", "@macro WHERE()\n@{__FILE__}\n@end\n")]);
    let output = m.execute("@include \"lib\"\n@include WHERE()\n").unwrap();
    assert_eq!(output, "lib\n");
}

// ---------------------------------------------------------------------------
// Inclusion
// ---------------------------------------------------------------------------

#[test]
fn include_once_reads_each_source_once() {
    let mut m = machine_with(&[("a", "a\n"), ("b", "b\n"), ("c", "c\n")]);
    let source = "@include \"a\"\n@include once \"b\"\n@include once \"a\"\n@include once \"b\"\n@include once \"c\"\n";
    assert_eq!(m.execute(source).unwrap(), "a\nb\nc\n");
}

#[test]
fn include_reference_may_be_an_expression() {
    let mut m = machine_with(&[("part", "included\n")]);
    let output = m.execute("@set which \"part\"\n@include which\n").unwrap();
    assert_eq!(output, "included\n");
}

#[test]
fn include_unsupported_reference() {
    let err = machine()
        .execute("@include \"nope\"\n")
        .expect_err("expected failure");
    assert!(matches!(err, EngineError::SourceInclusion { .. }), "{:?}", err);
    assert!(
        err.to_string().contains("Source \"nope\" is not supported"),
        "{}",
        err
    );
}

#[test]
fn include_inline_builtin() {
    let mut m = machine_with(&[("snippet", "hello\n")]);
    assert_eq!(m.execute("@{include(\"snippet\")}\n").unwrap(), "hello\n");
}

#[test]
fn cyclic_inclusion_hits_depth_limit() {
    let mut m = machine_with(&[("a", "@include \"b\"\n"), ("b", "@include \"a\"\n")]);
    let err = m.execute("@include \"a\"\n").expect_err("expected failure");
    assert!(
        matches!(err, EngineError::MaxExecutionDepthReached { .. }),
        "{:?}",
        err
    );
}

#[test]
fn self_inclusion_hits_depth_limit() {
    let mut m = machine_with(&[("self", "@include \"self\"\n")]);
    let err = m.execute("@include \"self\"\n").expect_err("expected failure");
    assert!(
        matches!(err, EngineError::MaxExecutionDepthReached { .. }),
        "{:?}",
        err
    );
}

#[test]
fn included_file_provenance() {
    let mut m = machine_with(&[("dir/part.sg", "@{__FILE__} in @{__PATH__}\n")]);
    let output = m.execute("@include \"dir/part.sg\"\n").unwrap();
    assert_eq!(output, "part.sg in dir\n");
}

#[test]
fn include_from_filesystem() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let lib_path = dir.path().join("lib.sg");
    let mut lib_file = std::fs::File::create(&lib_path).unwrap();
    write!(lib_file, "@set shared 3\nfrom lib\n").unwrap();

    let mut m = Machine::new(ReaderRegistry::with_defaults(dir.path()));
    let output = m.execute("@include \"lib.sg\"\n@{shared}\n").unwrap();
    assert_eq!(output, "from lib\n3\n");
}

// ---------------------------------------------------------------------------
// Reserved context identifiers
// ---------------------------------------------------------------------------

#[test]
fn line_tracks_current_instruction() {
    assert_eq!(run("a\n@{__LINE__}\n"), "a\n2\n");
}

#[test]
fn file_defaults_to_main() {
    assert_eq!(run_trimmed("@{__FILE__}"), "main");
}

// ---------------------------------------------------------------------------
// @error / @warning
// ---------------------------------------------------------------------------

#[test]
fn error_directive_fails_with_evaluated_message() {
    let err = run_err("@error \"fail \" + 42\n");
    assert!(matches!(err, EngineError::UserDefined { .. }), "{:?}", err);
    assert_eq!(err.to_string(), "fail 42");
}

#[test]
fn warning_directive_is_collected_out_of_band() {
    let mut m = machine();
    let output = m.execute("@warning \"beware\"\ntext\n").unwrap();
    assert_eq!(output, "text\n");
    let warnings = m.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "beware");
    assert_eq!(warnings[0].line, 1);
}

// ---------------------------------------------------------------------------
// Line control statements
// ---------------------------------------------------------------------------

#[test]
fn line_control_at_file_boundaries() {
    let mut m = machine_with(&[("inc", "inner\n")]);
    m.generate_line_control = true;
    let output = m.execute("top\n@include \"inc\"\nafter\n").unwrap();
    assert_eq!(
        output,
        "#line 1 \"main\"\ntop\n#line 1 \"inc\"\ninner\n#line 3 \"main\"\nafter\n"
    );
}

#[test]
fn line_control_escapes_embedded_quotes() {
    let mut m = machine_with(&[("fi\"le", "x\n")]);
    m.generate_line_control = true;
    let output = m.execute("@include \"fi\\\"le\"\n").unwrap();
    assert!(output.contains("#line 1 \"fi\\\"le\"\n"), "{}", output);
}

#[test]
fn line_control_suppressed_in_inline_mode() {
    let mut m = machine();
    m.generate_line_control = true;
    let output = m.execute("@macro M()\nx\n@end\n@{M()}\n").unwrap();
    assert_eq!(output, "#line 4 \"main\"\nx\n");
}

#[test]
fn line_control_disabled_by_default() {
    let mut m = machine_with(&[("inc", "inner\n")]);
    let output = m.execute("top\n@include \"inc\"\n").unwrap();
    assert_eq!(output, "top\ninner\n");
}

// ---------------------------------------------------------------------------
// Directive comments
// ---------------------------------------------------------------------------

#[test]
fn comments_are_stripped_from_operands() {
    assert_eq!(run_trimmed("@set x 5 // the answer\n@{x}"), "5");
    assert_eq!(run_trimmed("@if true /* always */\nok\n@endif"), "ok");
}

#[test]
fn comment_markers_inside_strings_survive() {
    assert_eq!(run_trimmed("@set url \"http://x\"\n@{url}"), "http://x");
}
