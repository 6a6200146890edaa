use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, NevalError, Result},
    value::{NativeFunction, Value, ValueKind},
};

pub const BUILTINS_KEY: &str = "__builtins__";

pub fn builtins() -> Value {
    let print = native("print", usize::MAX, io_print);
    let println = native("println", usize::MAX, io_println);
    let dbg = native("dbg", 1, io_dbg);
    let len_fn = native("len", 1, collections_len);
    let range = native("range", usize::MAX, collections_range);

    let mut io = IndexMap::new();
    io.insert("print".into(), print.clone());
    io.insert("println".into(), println.clone());
    io.insert("dbg".into(), dbg.clone());

    let mut string = IndexMap::new();
    string.insert("len".into(), len_fn.clone());
    string.insert("is_empty".into(), native("is_empty", 1, string_is_empty));
    string.insert("to_upper".into(), native("to_upper", 1, string_to_upper));
    string.insert("to_lower".into(), native("to_lower", 1, string_to_lower));
    string.insert("trim".into(), native("trim", 1, string_trim));
    string.insert("split".into(), native("split", 2, string_split));
    string.insert("replace".into(), native("replace", 3, string_replace));
    string.insert("starts_with".into(), native("starts_with", 2, string_starts_with));
    string.insert("ends_with".into(), native("ends_with", 2, string_ends_with));
    string.insert("join".into(), native("join", 2, string_join));

    let mut collections = IndexMap::new();
    collections.insert("len".into(), len_fn.clone());
    collections.insert("push".into(), native("push", 2, collections_push));
    collections.insert("insert".into(), native("insert", 3, collections_insert));
    collections.insert("keys".into(), native("keys", 1, collections_keys));
    collections.insert("values".into(), native("values", 1, collections_values));
    collections.insert("range".into(), range.clone());
    collections.insert("pop".into(), native("pop", 1, collections_pop));

    let mut math = IndexMap::new();
    math.insert("abs".into(), native("abs", 1, math_abs));
    math.insert("floor".into(), native("floor", 1, math_floor));
    math.insert("ceil".into(), native("ceil", 1, math_ceil));
    math.insert("sqrt".into(), native("sqrt", 1, math_sqrt));
    math.insert("round".into(), native("round", 1, math_round));
    math.insert("pow".into(), native("pow", 2, math_pow));

    let mut std_exports = IndexMap::new();
    std_exports.insert("io".into(), Value::module(path(&["std", "io"]), io));
    std_exports.insert("string".into(), Value::module(path(&["std", "string"]), string));
    std_exports.insert(
        "collections".into(),
        Value::module(path(&["std", "collections"]), collections),
    );
    std_exports.insert("math".into(), Value::module(path(&["std", "math"]), math));

    let mut exports = IndexMap::new();
    exports.insert("print".into(), print);
    exports.insert("println".into(), println);
    exports.insert("dbg".into(), dbg);
    exports.insert("len".into(), len_fn);
    exports.insert("range".into(), range);
    exports.insert("str".into(), native("str", 1, convert_str));
    exports.insert("int".into(), native("int", 1, convert_int));
    exports.insert("float".into(), native("float", 1, convert_float));
    exports.insert("type_of".into(), native("type_of", 1, type_of));
    exports.insert("error".into(), native("error", 1, raise_error));
    exports.insert("std".into(), Value::module(path(&["std"]), std_exports));

    Value::module(path(&[BUILTINS_KEY]), exports)
}

fn path(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|segment| segment.to_string()).collect()
}

fn native(name: &'static str, arity: usize, callback: fn(&[Value]) -> Result<Value>) -> Value {
    Value::new(ValueKind::NativeFunction(NativeFunction {
        name,
        arity,
        callback,
    }))
}

fn runtime_error(message: impl Into<String>) -> NevalError {
    NevalError::from(Diagnostic::runtime(message))
}

fn ensure_exact(args: &[Value], expected: usize, name: &str) -> Result<()> {
    if args.len() != expected {
        return Err(runtime_error(format!(
            "`{name}` expected {expected} arguments but received {}",
            args.len()
        )));
    }
    Ok(())
}

fn ensure_between(args: &[Value], min: usize, max: usize, name: &str) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(runtime_error(format!(
            "`{name}` expected {min} to {max} arguments but received {}",
            args.len()
        )));
    }
    Ok(())
}

fn expect_string<'v>(value: &'v Value, name: &str) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| runtime_error(format!("`{name}` expected String but found {}", value.type_name())))
}

fn expect_int(value: &Value, name: &str) -> Result<i64> {
    value
        .as_int()
        .ok_or_else(|| runtime_error(format!("`{name}` expected Int but found {}", value.type_name())))
}

fn expect_number(value: &Value, name: &str) -> Result<f64> {
    value
        .as_float()
        .ok_or_else(|| runtime_error(format!("`{name}` expected numeric but found {}", value.type_name())))
}

fn io_print(args: &[Value]) -> Result<Value> {
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            print!(" ");
        }
        print!("{arg}");
    }
    Ok(Value::unit())
}

fn io_println(args: &[Value]) -> Result<Value> {
    io_print(args)?;
    println!();
    Ok(Value::unit())
}

fn io_dbg(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "dbg")?;
    println!("{:?}", args[0]);
    Ok(args[0].clone())
}

fn convert_str(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "str")?;
    Ok(Value::string(args[0].to_string()))
}

fn convert_int(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "int")?;
    match args[0].kind() {
        ValueKind::Int(n) => Ok(Value::int(*n)),
        ValueKind::Float(f) => Ok(Value::int(f.trunc() as i64)),
        ValueKind::Bool(b) => Ok(Value::int(i64::from(*b))),
        ValueKind::String(s) => s
            .trim()
            .parse()
            .map(Value::int)
            .map_err(|_| runtime_error(format!("cannot convert \"{s}\" to Int"))),
        _ => Err(runtime_error(format!(
            "cannot convert {} to Int",
            args[0].type_name()
        ))),
    }
}

fn convert_float(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "float")?;
    match args[0].kind() {
        ValueKind::String(s) => s
            .trim()
            .parse()
            .map(Value::float)
            .map_err(|_| runtime_error(format!("cannot convert \"{s}\" to Float"))),
        _ => expect_number(&args[0], "float").map(Value::float),
    }
}

fn type_of(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "type_of")?;
    Ok(Value::string(args[0].type_name()))
}

fn raise_error(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "error")?;
    Err(runtime_error(args[0].to_string()))
}

fn string_is_empty(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.string.is_empty")?;
    let text = expect_string(&args[0], "std.string.is_empty")?;
    Ok(Value::bool(text.is_empty()))
}

fn string_to_upper(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.string.to_upper")?;
    let text = expect_string(&args[0], "std.string.to_upper")?;
    Ok(Value::string(text.to_uppercase()))
}

fn string_to_lower(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.string.to_lower")?;
    let text = expect_string(&args[0], "std.string.to_lower")?;
    Ok(Value::string(text.to_lowercase()))
}

fn string_trim(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.string.trim")?;
    let text = expect_string(&args[0], "std.string.trim")?;
    Ok(Value::string(text.trim()))
}

fn string_split(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 2, "std.string.split")?;
    let text = expect_string(&args[0], "std.string.split")?;
    let separator = expect_string(&args[1], "std.string.split")?;
    if separator.is_empty() {
        return Err(runtime_error("separator must not be empty"));
    }
    Ok(Value::array(text.split(separator).map(Value::string).collect()))
}

fn string_replace(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 3, "std.string.replace")?;
    let text = expect_string(&args[0], "std.string.replace")?;
    let from = expect_string(&args[1], "std.string.replace")?;
    let to = expect_string(&args[2], "std.string.replace")?;
    Ok(Value::string(text.replace(from, to)))
}

fn string_starts_with(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 2, "std.string.starts_with")?;
    let text = expect_string(&args[0], "std.string.starts_with")?;
    let prefix = expect_string(&args[1], "std.string.starts_with")?;
    Ok(Value::bool(text.starts_with(prefix)))
}

fn string_ends_with(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 2, "std.string.ends_with")?;
    let text = expect_string(&args[0], "std.string.ends_with")?;
    let suffix = expect_string(&args[1], "std.string.ends_with")?;
    Ok(Value::bool(text.ends_with(suffix)))
}

fn string_join(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 2, "std.string.join")?;
    let items = args[0]
        .as_array()
        .ok_or_else(|| runtime_error("`std.string.join` expects array of strings"))?;
    let separator = expect_string(&args[1], "std.string.join")?;
    let pieces = items
        .iter()
        .map(|item| expect_string(item, "std.string.join"))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::string(pieces.join(separator)))
}

fn collections_len(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "len")?;
    let len = match args[0].kind() {
        ValueKind::String(s) => s.chars().count(),
        ValueKind::Array(values) | ValueKind::Tuple(values) => values.len(),
        ValueKind::Map(map) => map.len(),
        _ => {
            return Err(runtime_error(format!(
                "len expects string, array, or map but found {}",
                args[0].type_name()
            )))
        }
    };
    Ok(Value::int(len as i64))
}

fn collections_push(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 2, "std.collections.push")?;
    match args[0].kind() {
        ValueKind::Array(values) => {
            let mut new = values.clone();
            new.push(args[1].clone());
            Ok(Value::array(new))
        }
        _ => Err(runtime_error("push expects array as first argument")),
    }
}

fn collections_insert(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 3, "std.collections.insert")?;
    match args[0].kind() {
        ValueKind::Map(map) => {
            let key = expect_string(&args[1], "std.collections.insert")?;
            let mut new = map.clone();
            new.insert(key.to_string(), args[2].clone());
            Ok(Value::map(new))
        }
        _ => Err(runtime_error("insert expects map as first argument")),
    }
}

fn collections_keys(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.collections.keys")?;
    let map = args[0]
        .as_map()
        .ok_or_else(|| runtime_error("keys expects map"))?;
    Ok(Value::array(map.keys().map(|key| Value::string(key.as_str())).collect()))
}

fn collections_values(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.collections.values")?;
    match args[0].kind() {
        ValueKind::Map(map) => Ok(Value::array(map.values().cloned().collect())),
        ValueKind::Array(values) => Ok(Value::array(values.clone())),
        _ => Err(runtime_error("values expects map or array")),
    }
}

fn collections_range(args: &[Value]) -> Result<Value> {
    ensure_between(args, 1, 3, "range")?;
    let (start, end) = match args {
        [start, end, ..] => (expect_int(start, "range")?, expect_int(end, "range")?),
        [end] => (0, expect_int(end, "range")?),
        [] => (0, 0),
    };
    let step = match args.get(2) {
        Some(step) => expect_int(step, "range")?,
        None => 1,
    };
    if step == 0 {
        return Err(runtime_error("range step must be non-zero"));
    }

    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < end) || (step < 0 && current > end) {
        values.push(Value::int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::array(values))
}

fn collections_pop(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.collections.pop")?;
    let values = args[0]
        .as_array()
        .ok_or_else(|| runtime_error("pop expects array"))?;
    let Some((last, rest)) = values.split_last() else {
        return Err(runtime_error("pop expects non-empty array"));
    };
    let mut result = IndexMap::new();
    result.insert("value".into(), last.clone());
    result.insert("array".into(), Value::array(rest.to_vec()));
    Ok(Value::map(result))
}

fn math_abs(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.math.abs")?;
    match args[0].kind() {
        ValueKind::Int(n) => n
            .checked_abs()
            .map(Value::int)
            .ok_or_else(|| runtime_error("integer overflow")),
        _ => Ok(Value::float(expect_number(&args[0], "std.math.abs")?.abs())),
    }
}

fn math_floor(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.math.floor")?;
    Ok(Value::float(expect_number(&args[0], "std.math.floor")?.floor()))
}

fn math_ceil(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.math.ceil")?;
    Ok(Value::float(expect_number(&args[0], "std.math.ceil")?.ceil()))
}

fn math_sqrt(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.math.sqrt")?;
    let number = expect_number(&args[0], "std.math.sqrt")?;
    if number < 0.0 {
        return Err(runtime_error("sqrt expects non-negative input"));
    }
    Ok(Value::float(number.sqrt()))
}

fn math_round(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 1, "std.math.round")?;
    Ok(Value::float(expect_number(&args[0], "std.math.round")?.round()))
}

fn math_pow(args: &[Value]) -> Result<Value> {
    ensure_exact(args, 2, "std.math.pow")?;
    let base = expect_number(&args[0], "std.math.pow")?;
    let exponent = expect_number(&args[1], "std.math.pow")?;
    Ok(Value::float(base.powf(exponent)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(name: &str) -> Value {
        let builtins = builtins();
        match builtins.kind() {
            ValueKind::Module(module) => module.exports[name].clone(),
            _ => panic!("builtins must be a module"),
        }
    }

    fn call(name: &str, args: &[Value]) -> Result<Value> {
        match export(name).kind() {
            ValueKind::NativeFunction(fun) => fun.call(args),
            _ => panic!("`{name}` must be native"),
        }
    }

    #[test]
    fn range_accepts_one_to_three_arguments() {
        let values = call("range", &[Value::int(3)]).expect("range");
        assert_eq!(values.to_string(), "[0, 1, 2]");
        let values = call("range", &[Value::int(5), Value::int(0), Value::int(-2)]).expect("range");
        assert_eq!(values.to_string(), "[5, 3, 1]");
        assert!(call("range", &[]).is_err());
    }

    #[test]
    fn int_parses_strings() {
        assert_eq!(call("int", &[Value::string(" 42 ")]).expect("int").as_int(), Some(42));
        assert!(call("int", &[Value::string("x")]).is_err());
    }
}
