//! End-to-end evaluation tests: source text in, top-of-stack value out.

use nominal_runtime::State;

fn eval_number(source: &str) -> f64 {
    let mut state = State::new();
    let result = state.evaluate(source);
    assert!(!state.error(), "unexpected error: {}", state.get_error());
    result.to_f64()
}

#[test]
fn test_arithmetic_expression() {
    assert_eq!(eval_number("2 * 3 + 1"), 7.0);
    assert_eq!(eval_number("1 + 2 * 3"), 7.0);
    assert_eq!(eval_number("(1 + 2) * 3"), 9.0);
    assert_eq!(eval_number("10 / 4"), 2.5);
    assert_eq!(eval_number("10 - 2 - 3"), 5.0);
}

#[test]
fn test_arithmetic_matches_ieee_doubles() {
    assert_eq!(eval_number("0.1 + 0.2").to_bits(), (0.1f64 + 0.2f64).to_bits());
    assert_eq!(eval_number("1 / 3").to_bits(), (1.0f64 / 3.0f64).to_bits());
    assert_eq!(eval_number("2.5 * 0.3").to_bits(), (2.5f64 * 0.3f64).to_bits());
}

#[test]
fn test_unary_operators() {
    assert_eq!(eval_number("-5 + 10"), 5.0);
    assert_eq!(eval_number("-(2 * 3)"), -6.0);

    let mut state = State::new();
    assert!(!state.evaluate("!true").as_boolean());
    assert!(state.evaluate("!false").as_boolean());
    assert!(state.evaluate("!nil").as_boolean());
}

#[test]
fn test_define_and_use_variables() {
    assert_eq!(eval_number("a := 1, b := 2, a + b"), 3.0);
}

#[test]
fn test_assignment_updates_existing_variable() {
    assert_eq!(eval_number("a := 1, a = 5, a + 1"), 6.0);
}

#[test]
fn test_define_evaluates_to_the_value() {
    assert_eq!(eval_number("a := 42"), 42.0);
}

#[test]
fn test_comparisons() {
    let mut state = State::new();
    assert!(state.evaluate("1 < 2").as_boolean());
    assert!(state.evaluate("2 <= 2").as_boolean());
    assert!(!state.evaluate("1 > 2").as_boolean());
    assert!(state.evaluate("3 >= 2").as_boolean());
    assert!(state.evaluate("1 == 1").as_boolean());
    assert!(state.evaluate("1 != 2").as_boolean());
    assert!(state.evaluate("\"a\" == \"a\"").as_boolean());
    assert!(state.evaluate("\"a\" != \"b\"").as_boolean());
}

#[test]
fn test_logical_operators() {
    let mut state = State::new();
    assert!(state.evaluate("true && true").as_boolean());
    assert!(!state.evaluate("true && false").as_boolean());
    assert!(state.evaluate("false || true").as_boolean());
    assert!(!state.evaluate("false || false").as_boolean());
}

#[test]
fn test_short_circuit_skips_right_side() {
    // The right side of && never evaluates when the left is false, so
    // the undefined variable is not an error
    let mut state = State::new();
    let result = state.evaluate("false && ghost");
    assert!(!state.error(), "unexpected error: {}", state.get_error());
    assert!(!result.as_boolean());

    let result = state.evaluate("true || ghost");
    assert!(!state.error());
    assert!(result.as_boolean());
}

#[test]
fn test_map_literal_with_explicit_keys() {
    assert_eq!(
        eval_number("{ \"zero\" -> 0, \"one\" -> 1, two := 2 }.two"),
        2.0
    );
}

#[test]
fn test_map_literal_positional_indexing() {
    assert_eq!(eval_number("{ 2, 3, 4, 5 }[2]"), 4.0);
}

#[test]
fn test_map_entry_define_and_set() {
    // Bracket-assign is insert-or-update, so the whole chain succeeds
    assert_eq!(eval_number("m := { }, m.a := 1, m[\"b\"] = 2, m.a + m.b"), 3.0);
}

#[test]
fn test_map_bracket_get_of_missing_key_is_nil() {
    let mut state = State::new();
    let result = state.evaluate("{ 1, 2 }[9]");
    assert!(!state.error());
    assert!(result.is_nil());
}

#[test]
fn test_nested_maps() {
    assert_eq!(eval_number("m := { inner := { x := 7 } }, m.inner.x"), 7.0);
}

#[test]
fn test_map_values_of_mixed_types() {
    let mut state = State::new();
    let result = state.evaluate("{ n := 1, s := \"str\", b := true }.s");
    assert!(state.is_string(result));
    assert_eq!(state.get_string(result), Some("str"));
}

#[test]
fn test_function_definition_and_call() {
    assert_eq!(eval_number("add := [ x y | x + y ], add: 3 4"), 7.0);
}

#[test]
fn test_zero_parameter_function() {
    assert_eq!(eval_number("f := [ 1 + 1 ], f:"), 2.0);
}

#[test]
fn test_function_value_of_last_body_expression() {
    assert_eq!(eval_number("f := [ 1, 2, 3 ], f:"), 3.0);
}

#[test]
fn test_missing_arguments_bind_nil() {
    let mut state = State::new();
    let result = state.evaluate("f := [ x | x ], f:");
    assert!(!state.error());
    assert!(result.is_nil());
}

#[test]
fn test_recursion() {
    assert_eq!(
        eval_number("fact := [ n | if: (n == 0) [ 1 ] [ n * (fact: (n - 1)) ] ], fact: 5"),
        120.0
    );
}

#[test]
fn test_sequencing_equivalence() {
    // P6: evaluate(s1 + "\n" + s2) == execute(s1); evaluate(s2)
    let s1 = "a := 1";
    let s2 = "a + 2";

    let mut combined = State::new();
    let combined_result = combined.evaluate(&format!("{s1}\n{s2}"));
    assert!(!combined.error());

    let mut split = State::new();
    split.execute(s1);
    assert!(!split.error());
    let split_result = split.evaluate(s2);
    assert!(!split.error());

    assert_eq!(combined_result.to_f64(), split_result.to_f64());
}

#[test]
fn test_evaluate_empty_result_is_nil() {
    let mut state = State::new();
    // An error leaves nothing to pop; the result is nil
    let result = state.evaluate("(");
    assert!(result.is_nil());
    assert!(state.error());
}

#[test]
fn test_comments_are_ignored() {
    assert_eq!(eval_number("1 + 2 -- trailing comment"), 3.0);
    assert_eq!(eval_number("{- leading -} 5"), 5.0);
    assert_eq!(eval_number("1 {- inline -} + 2"), 3.0);
}

#[test]
fn test_string_values() {
    let mut state = State::new();
    let result = state.evaluate("\"hello\"");
    assert!(state.is_string(result));
    assert_eq!(state.get_string(result), Some("hello"));
}

#[test]
fn test_booleans_and_nil_globals() {
    let mut state = State::new();
    assert!(state.evaluate("true").as_boolean());
    assert!(!state.evaluate("false").as_boolean());
    assert!(state.evaluate("nil").is_nil());
}

#[test]
fn test_if_builtin_with_plain_condition() {
    assert_eq!(eval_number("if: true [ 1 ] [ 2 ]"), 1.0);
    assert_eq!(eval_number("if: false [ 1 ] [ 2 ]"), 2.0);
}

#[test]
fn test_if_builtin_with_callable_condition() {
    assert_eq!(eval_number("if: [ 1 == 1 ] [ 10 ] [ 20 ]"), 10.0);
}

#[test]
fn test_if_without_else_is_nil() {
    let mut state = State::new();
    let result = state.evaluate("if: false [ 1 ]");
    assert!(!state.error());
    assert!(result.is_nil());
}

#[test]
fn test_while_builtin() {
    assert_eq!(
        eval_number("i := 0, while: [ i < 5 ] [ i = i + 1 ], i"),
        5.0
    );
}

#[test]
fn test_for_values_builtin() {
    assert_eq!(
        eval_number("sum := 0, for_values: { 1, 2, 3 } [ v | sum = sum + v ], sum"),
        6.0
    );
}

#[test]
fn test_for_keys_builtin() {
    assert_eq!(
        eval_number("sum := 0, for_keys: { 9, 9, 9 } [ k | sum = sum + k ], sum"),
        3.0
    );
}

#[test]
fn test_to_string_builtin() {
    let mut state = State::new();
    let result = state.evaluate("to_string: 42");
    assert_eq!(state.get_string(result), Some("42"));
}

#[test]
fn test_assert_equal_builtin_passes() {
    let mut state = State::new();
    state.execute("assert_equal: (2 + 2) 4");
    assert!(!state.error());
}

#[test]
fn test_multiple_states_are_isolated() {
    let mut first = State::new();
    let mut second = State::new();

    first.execute("x := 1");
    let result = second.evaluate("x");
    assert!(second.error());
    assert!(result.is_nil());
    assert!(!first.error());
}
