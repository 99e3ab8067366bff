//! Prelude Builtins
//!
//! The native functions bound as globals in every new state. Control
//! flow lives here rather than in the instruction set: `if`, `while`,
//! and the `for_*` loops take function values and re-enter the VM
//! through [`State::call`].

use crate::state::{MapIterator, State};
use nominal_core::Value;

/// Bind every prelude builtin as a global variable.
pub fn register(state: &mut State) {
    let builtins: &[(&str, fn(&mut State) -> Value)] = &[
        ("import", import),
        ("print", print),
        ("to_string", to_string),
        ("if", if_),
        ("while", while_),
        ("for_values", for_values),
        ("for_keys", for_keys),
        ("assert_equal", assert_equal),
        ("collect_garbage", collect_garbage),
        ("panic", panic),
        ("class", class),
        ("class_of", class_of),
        ("object", object),
    ];

    for &(name, builtin) in builtins {
        if state.error() {
            break;
        }
        let function = state.new_function(builtin);
        state.let_var(name, function);
    }
}

/// `import: "module"` — evaluate `module.ns` into a Module map.
fn import(state: &mut State) -> Value {
    let module = state.get_arg(0);
    match state.get_string(module) {
        Some(module) => {
            let module = module.to_string();
            state.import(&module)
        }
        None => {
            state.set_error("'module' is not a String");
            Value::NIL
        }
    }
}

/// `print: a b …` — print the arguments separated by spaces. Strings
/// print their content; everything else prints its display form.
fn print(state: &mut State) -> Value {
    let mut out = String::new();
    let argcount = state.get_arg_count();
    for index in 0..argcount {
        let arg = state.get_arg(index);
        match state.get_string(arg) {
            Some(string) => out.push_str(string),
            None => out.push_str(&state.to_string(arg)),
        }
        if index + 1 < argcount {
            out.push(' ');
        }
    }
    println!("{out}");

    Value::NIL
}

/// `to_string: value` — the display form of a value as a new string.
fn to_string(state: &mut State) -> Value {
    let value = state.get_arg(0);
    let string = state.to_string(value);
    if state.error() {
        return Value::NIL;
    }
    state.new_string(&string)
}

/// `if: condition then else` — the condition and both branches may be
/// function values; the chosen branch's result is the result.
fn if_(state: &mut State) -> Value {
    let condition = state.get_arg(0);
    let then_body = state.get_arg(1);
    let else_body = state.get_arg(2);

    let condition_result = if state.is_callable(condition) {
        state.call(condition, &[])
    } else {
        condition
    };

    let mut result = Value::NIL;
    if !state.error() {
        if state.is_true(condition_result) {
            if state.is_callable(then_body) {
                result = state.call(then_body, &[]);
            } else if state.is_true(then_body) {
                state.set_error("'then' is not invokable");
            }
        } else if state.is_callable(else_body) {
            result = state.call(else_body, &[]);
        } else if state.is_true(else_body) {
            state.set_error("'else' is not invokable");
        }
    }

    result
}

/// `while: condition body` — call the body while the condition holds.
fn while_(state: &mut State) -> Value {
    let condition = state.get_arg(0);
    let body = state.get_arg(1);

    let mut result = Value::NIL;
    if state.is_callable(condition) {
        if state.is_callable(body) {
            loop {
                let value = state.call(condition, &[]);
                if state.error() || !state.is_true(value) {
                    break;
                }
                result = state.call(body, &[]);
            }
        } else {
            state.set_error("'body' is not invokable");
        }
    } else {
        state.set_error("'condition' is not invokable");
    }

    result
}

/// `for_values: values function` — call the function with each value in
/// iteration order.
fn for_values(state: &mut State) -> Value {
    let values = state.get_arg(0);
    let function = state.get_arg(1);

    if state.is_iterable(values) {
        if state.is_callable(function) {
            let mut iterator = MapIterator::new();
            while state.next(values, &mut iterator) {
                let value = iterator.value;
                state.call(function, &[value]);
            }
        } else {
            state.set_error("'function' is not invokable");
        }
    } else {
        state.set_error("'values' is not iterable");
    }

    Value::NIL
}

/// `for_keys: keys function` — call the function with each key in
/// iteration order.
fn for_keys(state: &mut State) -> Value {
    let keys = state.get_arg(0);
    let function = state.get_arg(1);

    if state.is_iterable(keys) {
        if state.is_callable(function) {
            let mut iterator = MapIterator::new();
            while state.next(keys, &mut iterator) {
                let key = iterator.key;
                state.call(function, &[key]);
            }
        } else {
            state.set_error("'function' is not invokable");
        }
    } else {
        state.set_error("'keys' is not iterable");
    }

    Value::NIL
}

/// `assert_equal: actual expected` — error when the values differ.
fn assert_equal(state: &mut State) -> Value {
    let actual = state.get_arg(0);
    let expected = state.get_arg(1);

    if !state.equals(actual, expected) {
        let message = format!(
            "Failed assertion: {} != {}",
            state.to_string(actual),
            state.to_string(expected)
        );
        state.set_error(message);
    }

    Value::NIL
}

/// `collect_garbage:` — run a collection, returning the number of
/// objects freed.
fn collect_garbage(state: &mut State) -> Value {
    let count = state.collect_garbage();
    Value::number(f64::from(count))
}

/// `panic: message` — raise a script-authored error.
fn panic(state: &mut State) -> Value {
    let message = state.get_arg(0);

    let message = match state.get_string(message) {
        Some(string) => string.to_string(),
        None => state.to_string(message),
    };
    state.set_error(message);

    Value::NIL
}

/// `class: name map?` — brand a map (or a fresh one) as a class with
/// the given name.
fn class(state: &mut State) -> Value {
    let name = state.get_arg(0);
    if !state.is_string(name) {
        state.set_error("'name' is not a String");
        return Value::NIL;
    }

    let mut map = state.get_arg(1);
    if !state.is_true(map) {
        map = state.new_map();
    }

    let class_class = state.classes.class;
    state.set_map_class(map, class_class);

    let name_key = state.strings.name;
    state.map_set(map, name_key, name);

    map
}

/// `class_of: value` — the canonical class of a value.
fn class_of(state: &mut State) -> Value {
    let value = state.get_arg(0);
    state.class_of(value)
}

/// `object: class map` — attach a class to a map.
fn object(state: &mut State) -> Value {
    let class = state.get_arg(0);
    if !state.is_map(class) {
        state.set_error("'class' is not a Map");
        return Value::NIL;
    }

    let object = state.get_arg(1);
    if !state.is_map(object) {
        state.set_error("'object' is not a Map");
        return Value::NIL;
    }

    state.set_map_class(object, class);
    object
}
