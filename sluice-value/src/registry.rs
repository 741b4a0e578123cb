//! A static function registry standing in for the source system's runtime
//! introspection: every callable a flow can invoke is registered ahead of
//! time with an explicit [`Signature`] describing its parameters, since the
//! host language cannot inspect a function's parameter list at runtime.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Display,
    sync::Arc,
};

use crate::value::Value;

/// The binding behaviour of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    PositionalOrKeyword,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Value>,
}

/// The explicit parameter-list stand-in for runtime signature introspection.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub params: Vec<Param>,
}

impl Signature {
    pub fn new(params: Vec<Param>) -> Self {
        Signature { params }
    }

    /// Declared defaults, keyed by parameter name.
    pub fn defaults(&self) -> BTreeMap<String, Value> {
        self.params
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect()
    }

    /// Parameters excluding `**kwargs`-equivalents, as the args/hash views
    /// need the declared shape without the catch-all.
    pub fn named_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.kind != ParamKind::VarKeyword)
    }
}

/// The outcome of binding call-site arguments against a [`Signature`].
#[derive(Debug, Default)]
pub struct BoundArgs {
    pub positional: BTreeMap<String, Value>,
    pub variadic: Vec<Value>,
    pub keyword: BTreeMap<String, Value>,
    pub missing: Vec<String>,
}

/// Splits `args`/`kwargs` into positional, variadic and keyword buckets,
/// mirroring the source system's exact binding rules: `*args` are consumed
/// first to fix position, then `**kwargs` fill in by declared parameter
/// order, and any required parameter left unfilled is reported in `missing`.
pub fn split_args(sig: &Signature, args: &[Value], kwargs: &BTreeMap<String, Value>) -> BoundArgs {
    let mut bound = BoundArgs::default();

    let pos_params: Vec<&Param> = sig
        .params
        .iter()
        .filter(|p| matches!(p.kind, ParamKind::Positional | ParamKind::PositionalOrKeyword))
        .collect();

    for (i, v) in args.iter().enumerate() {
        if i < pos_params.len() {
            bound.positional.insert(pos_params[i].name.clone(), v.clone());
        } else {
            bound.variadic.extend_from_slice(&args[i..]);
            break;
        }
    }

    for (k, v) in kwargs {
        if let Some(p) = sig.params.iter().find(|p| &p.name == k) {
            match p.kind {
                ParamKind::Positional | ParamKind::PositionalOrKeyword => {
                    bound.positional.entry(k.clone()).or_insert_with(|| v.clone());
                }
                ParamKind::VarPositional => {
                    if bound.variadic.is_empty() {
                        if let Value::List(items) = v {
                            bound.variadic = items.clone();
                        }
                    }
                }
                ParamKind::KeywordOnly | ParamKind::VarKeyword => {
                    bound.keyword.insert(k.clone(), v.clone());
                }
            }
        } else {
            bound.keyword.insert(k.clone(), v.clone());
        }
    }

    for p in &sig.params {
        match p.kind {
            ParamKind::Positional | ParamKind::PositionalOrKeyword => {
                if !bound.positional.contains_key(&p.name) && p.default.is_none() {
                    bound.missing.push(p.name.clone());
                }
            }
            ParamKind::KeywordOnly => {
                if p.default.is_none() && !bound.keyword.contains_key(&p.name) {
                    bound.missing.push(p.name.clone());
                }
            }
            _ => {}
        }
    }

    bound
}

/// How a registered function's result should be treated by the executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuncShape {
    /// A plain function: call once, memoize the returned value.
    Plain,
    /// A generator-like function: re-invoking restarts iteration from the
    /// original arguments rather than resuming, and the result is never
    /// cached as a single value.
    Generator,
    /// An async function, driven to completion on the shared background
    /// runtime before its result is treated like a plain value.
    Async,
}

/// A registered callable: dotted name, explicit signature, and the closure
/// that performs the call once arguments have been bound.
pub struct NodeFunc {
    pub name: String,
    pub sig: Signature,
    pub shape: FuncShape,
    pub code: Option<String>,
    call: Box<dyn Fn(BoundArgs) -> anyhow::Result<Value> + Send + Sync>,
}

impl NodeFunc {
    pub fn new(
        name: impl Into<String>,
        sig: Signature,
        shape: FuncShape,
        call: impl Fn(BoundArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        NodeFunc {
            name: name.into(),
            sig,
            shape,
            code: None,
            call: Box::new(call),
        }
    }

    pub fn invoke(&self, args: BoundArgs) -> anyhow::Result<Value> {
        (self.call)(args)
    }
}

impl std::fmt::Debug for NodeFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFunc").field("name", &self.name).finish()
    }
}

impl Display for NodeFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Maps dotted function names to registered [`NodeFunc`]s.
#[derive(Default, Clone)]
pub struct FuncRegistry {
    funcs: HashMap<String, Arc<NodeFunc>>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        FuncRegistry::default()
    }

    pub fn register(&mut self, func: NodeFunc) {
        self.funcs.insert(func.name.clone(), Arc::new(func));
    }

    pub fn find(&self, name: &str) -> Option<Arc<NodeFunc>> {
        self.funcs.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(names: &[(&str, ParamKind, Option<Value>)]) -> Signature {
        Signature::new(
            names
                .iter()
                .map(|(n, k, d)| Param {
                    name: n.to_string(),
                    kind: *k,
                    default: d.clone(),
                })
                .collect(),
        )
    }

    #[test]
    fn missing_required_argument() {
        // function.foo(a, b, c=None, d="default", *args, **kwargs)
        let sig = sig(&[
            ("a", ParamKind::PositionalOrKeyword, None),
            ("b", ParamKind::PositionalOrKeyword, None),
            ("c", ParamKind::PositionalOrKeyword, Some(Value::Null)),
            ("d", ParamKind::PositionalOrKeyword, Some(Value::String("default".into()))),
        ]);
        let mut kwargs = BTreeMap::new();
        kwargs.insert("a".to_string(), Value::String("a".into()));
        kwargs.insert("d".to_string(), Value::String("d".into()));
        let bound = split_args(&sig, &[], &kwargs);
        assert_eq!(bound.missing, vec!["b".to_string()]);
    }

    #[test]
    fn positional_override() {
        let sig = sig(&[
            ("a", ParamKind::PositionalOrKeyword, None),
            ("b", ParamKind::PositionalOrKeyword, None),
        ]);
        let args = vec![Value::String("A".into()), Value::String("B".into())];
        let bound = split_args(&sig, &args, &BTreeMap::new());
        assert_eq!(bound.positional.get("a"), Some(&Value::String("A".into())));
        assert_eq!(bound.positional.get("b"), Some(&Value::String("B".into())));
        assert!(bound.missing.is_empty());
    }
}
