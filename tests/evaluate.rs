use std::{
    collections::{BTreeMap, HashMap},
    fs,
    sync::Arc,
};

use indexmap::IndexMap;
use neval::{
    evaluate, parser::parse_fragment, stdlib, Bindings, DiagnosticKind, EvalOptions, Evaluator,
    Namespace, NevalError, RegistryConfig, SourceRegistry, SourceUnit, Value, ValueKind,
};
use pretty_assertions::assert_eq;

fn scope(entries: &[(&str, i64)]) -> IndexMap<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), Value::int(*value)))
        .collect()
}

fn int(value: Option<Value>) -> Option<i64> {
    value.and_then(|value| value.as_int())
}

fn isolated(persistent: bool) -> Evaluator {
    Evaluator::new()
        .with_registry(Arc::new(SourceRegistry::default()))
        .with_options(EvalOptions {
            persistent_diagnostics: persistent,
        })
}

fn diagnostic(err: &NevalError) -> &neval::Diagnostic {
    err.diagnostic().expect("error should carry a diagnostic")
}

#[test]
fn returns_the_trailing_expression() {
    assert_eq!(int(evaluate("1+1", None, None).expect("evaluate")), Some(2));
}

#[test]
fn loops_are_not_captured_but_a_trailing_name_is() {
    let value = evaluate("for i in range(10) { i }", None, None).expect("evaluate");
    assert!(value.is_none());
    let value = evaluate("for i in range(10) {\n    i\n}\ni", None, None).expect("evaluate");
    assert_eq!(int(value), Some(9));
}

#[test]
fn writes_land_in_the_mutable_scope_only() {
    let mut mutable = scope(&[]);
    let readonly = scope(&[("a", 0)]);
    let value = evaluate("a=1;b=2", Some(&mut mutable), Some(&readonly)).expect("evaluate");
    assert!(value.is_none());
    assert_eq!(mutable, scope(&[("a", 1), ("b", 2)]));
    assert_eq!(readonly, scope(&[("a", 0)]));
}

#[test]
fn readonly_scope_survives_without_a_mutable_scope() {
    let readonly = scope(&[("a", 0)]);
    evaluate("a=1;b=2", None, Some(&readonly)).expect("evaluate");
    assert_eq!(readonly, scope(&[("a", 0)]));
}

#[test]
fn syntax_errors_render_the_whole_fragment() {
    let source = "a = 1\nb = 2\nc = 3\nd = 1 +* 2\ne = 5";
    let unit = SourceUnit::new(source);
    let mut mutable = scope(&[]);
    let err = evaluate(source, Some(&mut mutable), None).expect_err("must fail");
    let diag = diagnostic(&err);
    assert_eq!(diag.kind, DiagnosticKind::Parser);
    assert_eq!(diag.line, Some(4));
    assert_eq!(
        diag.notes.last().map(String::as_str),
        Some(
            format!(
                "Error in {}:\n      1 a = 1\n      2 b = 2\n      3 c = 3\n----> 4 d = 1 +* 2\n      5 e = 5",
                unit.name()
            )
            .as_str()
        )
    );
    assert!(mutable.is_empty());
}

#[test]
fn division_by_zero_points_at_line_one() {
    let err = evaluate("1/0", None, None).expect_err("must fail");
    let diag = diagnostic(&err);
    assert_eq!(diag.kind, DiagnosticKind::Runtime);
    assert_eq!(diag.message, "division by zero");
    assert_eq!(diag.line, Some(1));
    assert!(diag.notes[0].contains("----> 1 1/0"), "{}", diag.notes[0]);
}

#[test]
fn syntax_errors_leave_the_scope_untouched() {
    let mut mutable = scope(&[("x", 1)]);
    evaluate("x = 2\ny = (", Some(&mut mutable), None).expect_err("must fail");
    assert_eq!(mutable, scope(&[("x", 1)]));
}

#[test]
fn runtime_errors_keep_partial_mutations() {
    let mut mutable = scope(&[("x", 1)]);
    let err = evaluate("x = 2\ny = 1 / 0\nz = 3", Some(&mut mutable), None).expect_err("must fail");
    assert_eq!(diagnostic(&err).line, Some(2));
    assert_eq!(mutable, scope(&[("x", 2)]));
}

#[test]
fn writes_shadow_readonly_values_for_the_rest_of_the_call() {
    let mut mutable = scope(&[]);
    let readonly = scope(&[("a", 0)]);
    evaluate("b = a\na = 5\nc = a", Some(&mut mutable), Some(&readonly)).expect("evaluate");
    assert_eq!(mutable, scope(&[("b", 0), ("a", 5), ("c", 5)]));
    assert_eq!(readonly, scope(&[("a", 0)]));
}

#[test]
fn deleted_keys_do_not_fall_back_to_the_readonly_scope() {
    let mut mutable = scope(&[("a", 1)]);
    let readonly = scope(&[("a", 0)]);
    let err = evaluate("del a\na", Some(&mut mutable), Some(&readonly)).expect_err("must fail");
    assert_eq!(diagnostic(&err).kind, DiagnosticKind::Scope);
    assert!(mutable.is_empty());
    assert_eq!(readonly, scope(&[("a", 0)]));
}

#[test]
fn deleting_a_readonly_key_hides_it_without_touching_it() {
    let mut mutable = scope(&[]);
    let readonly = scope(&[("k", 1)]);
    let value = evaluate("del k\nk = 2\nk", Some(&mut mutable), Some(&readonly)).expect("evaluate");
    assert_eq!(int(value), Some(2));
    assert_eq!(mutable, scope(&[("k", 2)]));
    assert_eq!(readonly, scope(&[("k", 1)]));
}

#[test]
fn delete_then_rewrite_is_reported_as_a_change() {
    let mut mutable = scope(&[("x", 1), ("y", 1)]);
    evaluate("del x, y\nx = 3", Some(&mut mutable), None).expect("evaluate");
    assert_eq!(mutable, scope(&[("x", 3)]));
}

#[test]
fn unknown_keys_cannot_be_deleted() {
    let err = evaluate("del nothing", None, None).expect_err("must fail");
    assert_eq!(diagnostic(&err).kind, DiagnosticKind::Scope);
}

#[test]
fn suppressed_and_empty_fragments_return_nothing() {
    let mut mutable = scope(&[]);
    assert!(evaluate("1 + 1;", Some(&mut mutable), None).expect("evaluate").is_none());
    assert!(evaluate("", Some(&mut mutable), None).expect("evaluate").is_none());
    assert!(evaluate("none", Some(&mut mutable), None).expect("evaluate").is_none());
    assert!(mutable.is_empty());
}

#[test]
fn identical_fragments_share_a_unit_name() {
    assert_eq!(SourceUnit::new("x + 1").name(), SourceUnit::new("x + 1").name());
    assert_ne!(SourceUnit::new("x + 1").name(), SourceUnit::new("x + 2").name());
}

#[test]
fn builtins_never_leak_into_the_caller_scope() {
    let mut mutable = scope(&[]);
    evaluate("n = len([1, 2])", Some(&mut mutable), None).expect("evaluate");
    assert_eq!(mutable.keys().cloned().collect::<Vec<_>>(), vec!["n".to_string()]);
}

#[test]
fn caller_bindings_shadow_builtins() {
    let mut mutable = scope(&[("len", 5)]);
    let value = evaluate("len + 1", Some(&mut mutable), None).expect("evaluate");
    assert_eq!(int(value), Some(6));
}

#[test]
fn caller_provided_builtins_are_kept() {
    let mut mutable = IndexMap::new();
    mutable.insert(stdlib::BUILTINS_KEY.to_string(), stdlib::builtins());
    let value = evaluate("str(40 + 2)", Some(&mut mutable), None).expect("evaluate");
    assert_eq!(value.map(|v| v.to_string()).as_deref(), Some("42"));
    assert!(mutable.contains_key(stdlib::BUILTINS_KEY));
}

#[test]
fn hash_and_btree_maps_are_scopes() {
    let mut hashed: HashMap<String, Value> = HashMap::new();
    hashed.insert("x".into(), Value::int(1));
    evaluate("x = x + 1\ny = x", Some(&mut hashed), None).expect("evaluate");
    assert_eq!(hashed.get("y").and_then(Value::as_int), Some(2));

    let mut ordered: BTreeMap<String, Value> = BTreeMap::new();
    let readonly: HashMap<String, Value> = HashMap::from([("base".to_string(), Value::int(10))]);
    evaluate("total = base * 2", Some(&mut ordered), Some(&readonly)).expect("evaluate");
    assert_eq!(ordered.get("total").and_then(Value::as_int), Some(20));
}

#[test]
fn namespaces_expose_their_attributes() {
    let mut state = Namespace::new().with("count", 1i64);
    let config = Namespace::new().with("step", 4i64);
    evaluate("count = count + step", Some(&mut state), Some(&config)).expect("evaluate");
    assert_eq!(state.attr("count").and_then(Value::as_int), Some(5));
    assert!(!state.contains_key("step"));
}

#[test]
fn errors_in_earlier_functions_point_at_the_calling_line() {
    let mut mutable = scope(&[]);
    evaluate("fn boom() {\n  1 / 0\n}", Some(&mut mutable), None).expect("define");
    let source = "x = 1\n\nboom()";
    let err = evaluate(source, Some(&mut mutable), None).expect_err("must fail");
    let diag = diagnostic(&err);
    assert_eq!(diag.line, Some(3));
    assert_eq!(diag.trace.len(), 2);
    assert_eq!(diag.trace[0].line, 2);
    assert_eq!(diag.trace[0].function.as_deref(), Some("boom"));
    assert_eq!(diag.unit.as_deref(), Some(SourceUnit::new(source).name()));
}

#[test]
fn persistent_diagnostics_register_the_fragment() {
    let evaluator = isolated(true);
    let source = "x = 1\nx / 0";
    evaluator.evaluate(source, None, None).expect_err("must fail");
    let name = SourceUnit::new(source).name().to_string();
    assert_eq!(evaluator.registry().resolve(&name).as_deref(), Some(source));

    evaluator.evaluate(source, None, None).expect_err("must fail");
    assert_eq!(evaluator.registry().len(), 1);
}

#[test]
fn ephemeral_diagnostics_leave_nothing_behind() {
    let evaluator = isolated(false);
    let err = evaluator.evaluate("1 / 0", None, None).expect_err("must fail");
    assert_eq!(diagnostic(&err).notes.len(), 1);
    assert!(evaluator.registry().is_empty());
}

#[test]
fn successful_evaluations_register_nothing() {
    let evaluator = isolated(true);
    evaluator.evaluate("1 + 1", None, None).expect("evaluate");
    assert!(evaluator.registry().is_empty());
}

#[test]
fn parsed_fragments_evaluate_without_a_listing() {
    let module = parse_fragment("a = 2\na * 21").expect("parse");
    let mut mutable = scope(&[]);
    let value = evaluate(module, Some(&mut mutable), None).expect("evaluate");
    assert_eq!(int(value), Some(42));
    assert_eq!(mutable, scope(&[("a", 2)]));

    let module = parse_fragment("a = 1\na / 0").expect("parse");
    let err = isolated(true).evaluate(module, None, None).expect_err("must fail");
    let diag = diagnostic(&err);
    assert_eq!(diag.line, Some(2));
    assert!(diag.notes.is_empty());
}

#[test]
fn display_includes_unit_line_and_listing() {
    let err = evaluate("y = 1\nundefined_name", None, None).expect_err("must fail");
    let rendered = err.to_string();
    assert!(rendered.starts_with("Scope: undefined variable `undefined_name` (neval-"), "{rendered}");
    assert!(rendered.contains(", line 2)"), "{rendered}");
    assert!(rendered.contains("----> 2 undefined_name"), "{rendered}");
}

#[test]
fn numeric_variant_changes_are_written_back() {
    let mut mutable = scope(&[("x", 1)]);
    mutable.insert("xs".into(), Value::array(vec![Value::int(1)]));
    let value = evaluate("x = 1.0\nxs = [1.0]\nx", Some(&mut mutable), None).expect("evaluate");
    assert!(matches!(value.as_ref().map(Value::kind), Some(ValueKind::Float(_))));
    assert!(matches!(mutable["x"].kind(), ValueKind::Float(_)));
    let xs = mutable["xs"].as_array().expect("array");
    assert!(matches!(xs[0].kind(), ValueKind::Float(_)));
}

#[test]
fn failing_evaluations_prune_stale_spill_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stale = SourceUnit::new("left over from an earlier run");
    fs::write(dir.path().join(stale.name()), stale.text().unwrap_or_default()).expect("seed");
    fs::write(dir.path().join("notes.txt"), "unrelated").expect("seed");

    let registry = Arc::new(SourceRegistry::new(RegistryConfig {
        spill_dir: Some(dir.path().to_path_buf()),
        ..RegistryConfig::default()
    }));
    let evaluator = Evaluator::new().with_registry(Arc::clone(&registry));
    evaluator.evaluate("1/0", None, None).expect_err("must fail");

    let current = SourceUnit::new("1/0");
    assert!(!dir.path().join(stale.name()).exists());
    assert!(dir.path().join("notes.txt").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join(current.name())).expect("spilled"),
        "1/0"
    );
    assert!(registry.contains(current.name()));
}

#[test]
fn deeply_nested_fragments_fail_cleanly() {
    let source = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
    let err = evaluate(source.as_str(), None, None).expect_err("must fail");
    let diag = diagnostic(&err);
    assert_eq!(diag.kind, DiagnosticKind::Parser);
    assert_eq!(diag.message, "expression nested too deeply");
    assert_eq!(diag.line, Some(1));
}
