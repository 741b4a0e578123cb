//! Registers the small set of safe, dependency-free builtin functions every
//! flow can call without having to pull in `_requires` packages: the
//! closest Rust equivalent of the source system's bag of exposed Python
//! builtins (`len`, `str`, `int`, ...), minus anything that shells out or
//! evaluates arbitrary expressions (both explicitly out of scope).

use sluice_value::{
    registry::{Param, ParamKind, Signature},
    FuncRegistry, FuncShape, NodeFunc, Value,
};

fn param(name: &str, default: Option<Value>) -> Param {
    Param {
        name: name.to_string(),
        kind: ParamKind::PositionalOrKeyword,
        default,
    }
}

pub fn registry() -> FuncRegistry {
    let mut reg = FuncRegistry::new();

    reg.register(NodeFunc::new(
        "builtins.identity",
        Signature::new(vec![param("value", None)]),
        FuncShape::Plain,
        |args| Ok(args.positional.get("value").cloned().unwrap_or(Value::Null)),
    ));

    reg.register(NodeFunc::new(
        "builtins.len",
        Signature::new(vec![param("value", None)]),
        FuncShape::Plain,
        |args| {
            let len = match args.positional.get("value") {
                Some(Value::String(s)) => s.chars().count() as i64,
                Some(Value::List(items)) => items.len() as i64,
                Some(Value::Map(map)) => map.len() as i64,
                _ => 0,
            };
            Ok(Value::Int(len))
        },
    ));

    reg.register(NodeFunc::new(
        "builtins.str",
        Signature::new(vec![param("value", None)]),
        FuncShape::Plain,
        |args| Ok(Value::String(args.positional.get("value").map(ToString::to_string).unwrap_or_default())),
    ));

    reg.register(NodeFunc::new(
        "builtins.join",
        Signature::new(vec![param("values", None), param("sep", Some(Value::String(String::new())))]),
        FuncShape::Plain,
        |args| {
            let sep = match args.positional.get("sep") {
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };
            let joined = match args.positional.get("values") {
                Some(Value::List(items)) => items.iter().map(ToString::to_string).collect::<Vec<_>>().join(&sep),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            Ok(Value::String(joined))
        },
    ));

    reg.register(NodeFunc::new(
        "builtins.range",
        Signature::new(vec![param("count", None)]),
        FuncShape::Generator,
        |args| {
            let count = match args.positional.get("count") {
                Some(Value::Int(n)) => *n,
                _ => 0,
            };
            Ok(Value::List((0..count).map(Value::Int).collect()))
        },
    ));

    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_value::registry::split_args;

    #[test]
    fn len_counts_list_items() {
        let reg = registry();
        let func = reg.find("builtins.len").unwrap();
        let args = vec![Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])];
        let bound = split_args(&func.sig, &args, &Default::default());
        assert_eq!(func.invoke(bound).unwrap(), Value::Int(3));
    }

    #[test]
    fn join_uses_separator() {
        let reg = registry();
        let func = reg.find("builtins.join").unwrap();
        let mut kwargs = std::collections::BTreeMap::new();
        kwargs.insert("values".to_string(), Value::List(vec![Value::String("a".into()), Value::String("b".into())]));
        kwargs.insert("sep".to_string(), Value::String(",".into()));
        let bound = split_args(&func.sig, &[], &kwargs);
        assert_eq!(func.invoke(bound).unwrap(), Value::String("a,b".into()));
    }
}
