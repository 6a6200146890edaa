use indexmap::IndexMap;
use neval::{
    diagnostics::NevalError,
    evaluate,
    value::{Value, ValueKind},
    DiagnosticKind,
};

fn eval(source: &str) -> Value {
    evaluate(source, None, None)
        .expect("evaluation should succeed")
        .expect("fragment should produce a value")
}

fn eval_error(source: &str) -> NevalError {
    match evaluate(source, None, None) {
        Ok(value) => panic!("expected error, received value {value:?}"),
        Err(err) => err,
    }
}

fn expect_int(value: &Value) -> i64 {
    match value.0.as_ref() {
        ValueKind::Int(n) => *n,
        _ => panic!("expected Int, found {}", value.type_name()),
    }
}

fn expect_map(value: &Value) -> &IndexMap<String, Value> {
    match value.0.as_ref() {
        ValueKind::Map(map) => map,
        _ => panic!("expected Map, found {}", value.type_name()),
    }
}

fn expect_bool(value: &Value) -> bool {
    match value.0.as_ref() {
        ValueKind::Bool(b) => *b,
        _ => panic!("expected Bool, found {}", value.type_name()),
    }
}

#[test]
fn evaluates_basic_arithmetic() {
    assert_eq!(expect_int(&eval("2 + 2 * 10")), 22);
    assert_eq!(expect_int(&eval("(2 + 2) * 10")), 40);
    assert_eq!(expect_int(&eval("7 % 4")), 3);
}

#[test]
fn integer_division_without_remainder_stays_integral() {
    assert_eq!(expect_int(&eval("9 / 3")), 3);
    match eval("7 / 2").0.as_ref() {
        ValueKind::Float(f) => assert!((*f - 3.5).abs() < 1e-9),
        _ => panic!("expected Float"),
    }
}

#[test]
fn matches_when_pattern() {
    let value = eval(
        r#"
        value = 2
        when value {
            1 -> { result = 1 }
            2 -> { result = 42 }
            else -> { result = 0 }
        }
        result
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn when_binds_tuple_patterns() {
    let value = eval(
        r#"
        when (1, 41) {
            (0, _) -> { total = 0 }
            (a, b) -> { total = a + b }
        }
        total
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn returns_last_expression_from_fragment() {
    let value = eval(
        r#"
        var x = 40
        x + 2
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn loop_runs_until_break() {
    let value = eval(
        r#"
        n = 0
        loop {
            n = n + 1
            if n == 7 { break }
        }
        n
        "#,
    );
    assert_eq!(expect_int(&value), 7);
}

#[test]
fn while_skips_with_continue() {
    let value = eval(
        r#"
        i = 0
        odd = 0
        while i < 10 {
            i = i + 1
            if i % 2 == 0 { continue }
            odd = odd + i
        }
        odd
        "#,
    );
    assert_eq!(expect_int(&value), 25);
}

#[test]
fn for_loop_accumulates_sum() {
    let value = eval(
        r#"
        sum = 0
        for item in [1, 2, 3, 4] {
            sum = sum + item
        }
        sum
        "#,
    );
    assert_eq!(expect_int(&value), 10);
}

#[test]
fn map_field_assignment_updates_value() {
    let value = eval(
        r#"
        inventory = {
            "apples": 3,
            "bananas": 7
        }
        inventory.bananas = inventory.bananas + 5
        inventory
        "#,
    );
    let map = expect_map(&value);
    assert_eq!(map.len(), 2);
    assert_eq!(expect_int(&map["apples"]), 3);
    assert_eq!(expect_int(&map["bananas"]), 12);
}

#[test]
fn array_element_assignment_updates_value() {
    let value = eval(
        r#"
        numbers = [1, 2, 3]
        numbers[1] = numbers[1] + 5
        numbers[-1] = 0
        numbers
        "#,
    );
    assert_eq!(value.to_string(), "[1, 7, 0]");
}

#[test]
fn recursive_function_evaluates() {
    let value = eval(
        r#"
        fn fib(n) {
            if n <= 1 {
                return n
            }
            return fib(n - 1) + fib(n - 2)
        }

        fib(6)
        "#,
    );
    assert_eq!(expect_int(&value), 8);
}

#[test]
fn functions_return_their_last_expression() {
    let value = eval(
        r#"
        fn double(x) { x * 2 }
        double(21)
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn lambdas_capture_enclosing_locals() {
    let value = eval(
        r#"
        fn adder(n) {
            |x| x + n
        }
        add2 = adder(2)
        add2(40)
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn logical_operators_short_circuit() {
    assert!(!expect_bool(&eval("false && missing()")));
    assert!(expect_bool(&eval("true || missing()")));
}

#[test]
fn runaway_recursion_is_reported() {
    let err = eval_error("fn f(n) { f(n + 1) }\nf(0)");
    assert!(err.to_string().contains("maximum call depth exceeded"), "{err}");
}

#[test]
fn undefined_names_are_scope_errors() {
    let err = eval_error("missing + 1");
    let diag = err.diagnostic().expect("diagnostic");
    assert_eq!(diag.kind, DiagnosticKind::Scope);
    assert!(diag.message.contains("undefined variable `missing`"));
}

#[test]
fn std_length_helpers() {
    assert_eq!(expect_int(&eval("std.string.len(\"hello\")")), 5);
    assert_eq!(expect_int(&eval("std.collections.len([1, 2, 3])")), 3);
    assert_eq!(expect_int(&eval(r#"len({ "a": 1, "b": 2 })"#)), 2);
}

#[test]
fn std_math_helpers() {
    assert_eq!(expect_int(&eval("std.math.abs(-42)")), 42);
    match eval("std.math.sqrt(49)").0.as_ref() {
        ValueKind::Float(f) => assert!((*f - 7.0).abs() < 1e-6),
        _ => panic!("expected Float"),
    }
}

#[test]
fn std_collections_helpers() {
    let pushed = eval("std.collections.push([1, 2], 3)");
    assert_eq!(pushed.to_string(), "[1, 2, 3]");

    let inserted = eval(r#"std.collections.insert({ "a": 1 }, "b", 2)"#);
    let map = expect_map(&inserted);
    assert_eq!(map.len(), 2);
    assert_eq!(expect_int(&map["b"]), 2);

    let popped = eval("std.collections.pop([1, 2, 3])");
    let map = expect_map(&popped);
    assert_eq!(expect_int(&map["value"]), 3);
    assert_eq!(map["array"].to_string(), "[1, 2]");
}

#[test]
fn module_use_binds_the_last_segment_or_alias() {
    let value = eval(
        r#"
        use std.string
        use std.math as m
        string.to_upper("ab") + str(m.abs(-3))
        "#,
    );
    assert_eq!(value.to_string(), "AB3");
}

#[test]
fn std_string_utilities() {
    assert_eq!(
        eval(r#"std.string.replace("hello world", "world", "neval")"#).to_string(),
        "hello neval"
    );
    assert!(expect_bool(&eval(r#"std.string.starts_with("neval", "ne")"#)));
    assert!(expect_bool(&eval(r#"std.string.ends_with("neval", "val")"#)));
    assert_eq!(
        eval(r#"std.string.join(["a", "b", "c"], "-")"#).to_string(),
        "a-b-c"
    );
}

#[test]
fn del_removes_bindings() {
    let err = eval_error("x = 1\ndel x\nx");
    assert!(err.to_string().contains("undefined variable `x`"), "{err}");
}
