//! Class dispatch tests: the `class` / `object` builtins, constructor
//! resolution through `new`, and arithmetic operator overloading.

use nominal_runtime::State;

#[test]
fn test_class_builtin_creates_named_class() {
    let mut state = State::new();
    let result = state.evaluate("c := class: \"Point\" { }, c.name");
    assert!(!state.error(), "unexpected error: {}", state.get_error());
    assert_eq!(state.get_string(result), Some("Point"));
}

#[test]
fn test_class_of_intrinsic_values() {
    let mut state = State::new();
    for (source, expected) in [
        ("class_of: 1", "Number"),
        ("class_of: true", "Boolean"),
        ("class_of: \"s\"", "String"),
        ("class_of: { }", "Map"),
        ("class_of: [ 1 ]", "Function"),
        ("class_of: nil", "Nil"),
    ] {
        let class = state.evaluate(source);
        assert!(!state.error(), "unexpected error: {}", state.get_error());
        let expected_class = state.get_var(expected);
        assert_eq!(class.raw(), expected_class.raw(), "{source}");
    }
}

#[test]
fn test_object_builtin_attaches_class() {
    let mut state = State::new();
    let result = state.evaluate(
        "c := class: \"Thing\" { }\n\
         o := object: c { x := 1 }\n\
         (class_of: o).name",
    );
    assert!(!state.error(), "unexpected error: {}", state.get_error());
    assert_eq!(state.get_string(result), Some("Thing"));
}

#[test]
fn test_class_constructor_through_new() {
    let mut state = State::new();
    let result = state.evaluate(
        "Point := class: \"Point\" {\n\
         new := [ x y | object: Point { x := x, y := y } ]\n\
         }\n\
         p := Point: 3 4\n\
         p.x + p.y",
    );
    assert!(!state.error(), "unexpected error: {}", state.get_error());
    assert_eq!(result.to_f64(), 7.0);
}

#[test]
fn test_operator_overloading_add() {
    let mut state = State::new();
    let result = state.evaluate(
        "Vec := class: \"Vec\" {\n\
         new := [ x | object: Vec { x := x } ],\n\
         add := [ a b | Vec: (a.x + b.x) ]\n\
         }\n\
         v := (Vec: 1) + (Vec: 2)\n\
         v.x",
    );
    assert!(!state.error(), "unexpected error: {}", state.get_error());
    assert_eq!(result.to_f64(), 3.0);
}

#[test]
fn test_operator_overloading_all_operators() {
    let mut state = State::new();
    state.execute(
        "Num := class: \"Num\" {\n\
         new := [ v | object: Num { v := v } ],\n\
         add := [ a b | (Num: (a.v + b.v)) ],\n\
         subtract := [ a b | (Num: (a.v - b.v)) ],\n\
         multiply := [ a b | (Num: (a.v * b.v)) ],\n\
         divide := [ a b | (Num: (a.v / b.v)) ]\n\
         }",
    );
    assert!(!state.error(), "unexpected error: {}", state.get_error());

    for (source, expected) in [
        ("((Num: 6) + (Num: 4)).v", 10.0),
        ("((Num: 6) - (Num: 4)).v", 2.0),
        ("((Num: 6) * (Num: 4)).v", 24.0),
        ("((Num: 6) / (Num: 4)).v", 1.5),
    ] {
        let result = state.evaluate(source);
        assert!(!state.error(), "unexpected error: {}", state.get_error());
        assert_eq!(result.to_f64(), expected, "{source}");
    }
}

#[test]
fn test_arithmetic_without_override_still_errors() {
    let mut state = State::new();
    state.evaluate("{ } + 1");
    assert!(state.error());
    assert_eq!(state.get_error(), "Cannot add non-numeric values");
}

#[test]
fn test_class_without_new_is_not_constructible() {
    let mut state = State::new();
    state.evaluate("c := class: \"Empty\" { }, c: 1");
    assert!(state.error());
    assert_eq!(state.get_error(), "Value cannot be called");
}

#[test]
fn test_object_requires_maps() {
    let mut state = State::new();
    state.evaluate("object: 1 { }");
    assert!(state.error());
    assert_eq!(state.get_error(), "'class' is not a Map");

    state.evaluate("object: (class: \"C\" { }) 5");
    assert!(state.error());
    assert_eq!(state.get_error(), "'object' is not a Map");
}

#[test]
fn test_class_requires_string_name() {
    let mut state = State::new();
    state.evaluate("class: 42");
    assert!(state.error());
    assert_eq!(state.get_error(), "'name' is not a String");
}
