//! Compiler behaviour observed through the public API

use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use serde_json::json;

use trellis::parser::Node;
use trellis::{
    context_from_json, register_builtins, CompileError, Compiler, FunctionRegistry, Template,
};

fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    register_builtins(&mut registry).expect("Should register builtins");
    registry
}

fn compile(text: &str) -> Result<Template, CompileError> {
    Compiler::new(&registry()).compile(text)
}

#[test]
fn test_compiling_twice_is_deterministic() {
    let text = "@foreach(users as i => user if user.active)\n{{ i }}: {{ user.name|title }}\n@endforeach";
    let data = context_from_json(json!({ "users": [{ "name": "a", "active": true }] }));
    let registry = registry();
    let first = Compiler::new(&registry).compile_with(text, &data).unwrap();
    let second = Compiler::new(&registry).compile_with(text, &data).unwrap();
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    assert_eq!(Template::from_json(&first.to_json().unwrap()).unwrap(), first);
}

#[test]
fn test_single_endforeach_closes_filtered_loop() {
    let template = compile("@foreach(xs as x if x)[{{ x }}]@endforeach").unwrap();
    let [Node::Foreach(each)] = template.body.as_slice() else {
        panic!("expected one loop, got {:?}", template.body);
    };
    assert!(matches!(each.body.as_slice(), [Node::If { .. }]));
}

#[test]
fn test_unclosed_block() {
    assert_snapshot!(
        compile("@foreach(xs as x){{ x }}").unwrap_err(),
        @"unbalanced @foreach: @foreach is never closed; expected @endforeach"
    );
}

#[test]
fn test_stray_terminator() {
    let err = compile("text@endif").unwrap_err();
    assert!(matches!(err, CompileError::UnbalancedBlock { .. }), "{err:?}");
}

#[test]
fn test_unknown_directive() {
    let err = compile("hello @frobnicate(1)").unwrap_err();
    assert_snapshot!(err, @"unknown directive @frobnicate");
    assert_eq!(err.span(), &(6..20));
}

#[test]
fn test_unknown_function() {
    let err = compile("{{ shuffle(xs) }}").unwrap_err();
    assert!(matches!(err, CompileError::UnknownFunction { .. }), "{err:?}");
}

#[test]
fn test_dotted_path_needs_declared_root() {
    let err = compile("{{ user.name }}").unwrap_err();
    assert!(matches!(err, CompileError::UndefinedVariable { .. }), "{err:?}");

    let data = context_from_json(json!({ "user": { "name": "Ann" } }));
    assert!(Compiler::new(&registry()).compile_with("{{ user.name }}", &data).is_ok());
}

#[test]
fn test_member_of_scalar_is_inaccessible() {
    let data = context_from_json(json!({ "count": 3 }));
    let err = Compiler::new(&registry())
        .compile_with("{{ count.value }}", &data)
        .unwrap_err();
    assert!(matches!(err, CompileError::InaccessibleMember { .. }), "{err:?}");
}

#[test]
fn test_malformed_loop_header() {
    let err = compile("@foreach(xs)x@endforeach").unwrap_err();
    assert!(matches!(err, CompileError::DirectiveSyntax { .. }), "{err:?}");
}

#[test]
fn test_unterminated_comment() {
    let err = compile("a {* never closed").unwrap_err();
    assert!(matches!(err, CompileError::Syntax { .. }), "{err:?}");
}

#[test]
fn test_diagnostic_names_the_file() {
    let source = "line one\n@if(a)\nno end";
    let err = compile(source).unwrap_err();
    let report = err.format(source, "pages/home.tpl");
    assert!(report.contains("pages/home.tpl"), "{report}");
    assert!(report.contains("@if is never closed"), "{report}");
}
