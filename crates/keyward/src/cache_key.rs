//! Cache key derivation for memoized calls.
//!
//! A cache key is built from the memoized function's identity and its
//! arguments:
//!
//! ```text
//! [key_prefix:]function[:arg...][:name=value...]
//! ```
//!
//! and then resolved into the active namespace. Positional arguments keep
//! their call order. Keyword arguments are sorted by name, so the order in
//! which they were supplied never changes the key.
//!
//! | Argument | Encoding |
//! |----------|----------|
//! | string | the text itself |
//! | number, bool, null | JSON text (`42`, `true`, `null`) |
//! | array, object | JSON with object keys sorted |
//!
//! Every encoded argument and keyword name then has `%`, `:` and `=`
//! percent-encoded (`%25`, `%3A`, `%3D`), so segment boundaries are
//! unambiguous: `("a:b", "c")` and `("a", "b:c")` never share a key. A
//! string and a scalar with the same text (`"42"` and `42`) do.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::namespace::Keyspace;

/// Arguments of one memoized call.
///
/// ```
/// use keyward::cache_key::CallArgs;
///
/// let a = CallArgs::new().arg("user-1").kwarg("page", 2).kwarg("limit", 50);
/// let b = CallArgs::new().arg("user-1").kwarg("limit", 50).kwarg("page", 2);
/// assert_eq!(a.segments(), b.segments());
/// assert_eq!(a.segments(), ["user-1", "limit=50", "page=2"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    /// No arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Sets a keyword argument, replacing any previous value for `name`.
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// Whether no argument was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Encoded key segments: positional arguments, then `name=value` pairs
    /// sorted by name.
    #[must_use]
    pub fn segments(&self) -> Vec<String> {
        let positional = self.positional.iter().map(encode_arg);
        let keyword = self
            .keyword
            .iter()
            .map(|(name, value)| format!("{}={}", escape(name), encode_arg(value)));
        positional.chain(keyword).collect()
    }
}

/// Types usable as the argument list of a memoized function.
///
/// Implemented for [`CallArgs`], `()` and tuples of up to four values
/// convertible into JSON.
pub trait CacheArgs {
    /// Converts into the canonical argument list.
    fn to_call_args(&self) -> CallArgs;
}

impl CacheArgs for CallArgs {
    fn to_call_args(&self) -> CallArgs {
        self.clone()
    }
}

impl CacheArgs for () {
    fn to_call_args(&self) -> CallArgs {
        CallArgs::new()
    }
}

macro_rules! impl_cache_args_tuple {
    ($($name:ident),+) => {
        impl<$($name),+> CacheArgs for ($($name,)+)
        where
            $($name: Clone + Into<Value>),+
        {
            #[allow(non_snake_case)]
            fn to_call_args(&self) -> CallArgs {
                let ($($name,)+) = self;
                CallArgs::new()$(.arg($name.clone()))+
            }
        }
    };
}

impl_cache_args_tuple!(A);
impl_cache_args_tuple!(A, B);
impl_cache_args_tuple!(A, B, C);
impl_cache_args_tuple!(A, B, C, D);

/// Encodes one argument as a key segment.
#[must_use]
pub fn encode_arg(value: &Value) -> String {
    match value {
        Value::String(s) => escape(s),
        Value::Array(_) | Value::Object(_) => escape(&canonical(value).to_string()),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.to_string(),
    }
}

/// Percent-encodes the characters that delimit key segments.
fn escape(text: &str) -> String {
    if !text.contains(['%', ':', '=']) {
        return text.to_owned();
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '=' => escaped.push_str("%3D"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Rebuilds `value` with object keys inserted in sorted order.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(fields) => {
            let mut sorted: Vec<(&String, &Value)> = fields.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted.into_iter().map(|(k, v)| (k.clone(), canonical(v))).collect::<Map<_, _>>(),
            )
        },
        other => other.clone(),
    }
}

/// Key shared by every cached call of a function: `[key_prefix:]function`,
/// namespace-resolved.
#[must_use]
pub fn base_key(keyspace: &Keyspace, key_prefix: Option<&str>, function: &str) -> String {
    keyspace.resolve(&logical_base(key_prefix, function))
}

/// Full cache key of one call.
///
/// ```
/// use keyward::{cache_key::{CallArgs, derive_key}, namespace::Keyspace};
///
/// let keyspace = Keyspace::new(Some("app".into()));
/// let args = CallArgs::new().arg(42).kwarg("fresh", true);
/// let key = derive_key(&keyspace, Some("v2"), "load_user", &args);
/// assert_eq!(key, "app:v2:load_user:42:fresh=true");
/// ```
#[must_use]
pub fn derive_key(
    keyspace: &Keyspace,
    key_prefix: Option<&str>,
    function: &str,
    args: &CallArgs,
) -> String {
    let mut logical = logical_base(key_prefix, function);
    for segment in args.segments() {
        logical.push(':');
        logical.push_str(&segment);
    }
    keyspace.resolve(&logical)
}

fn logical_base(key_prefix: Option<&str>, function: &str) -> String {
    match key_prefix.filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => format!("{prefix}:{function}"),
        None => function.to_owned(),
    }
}
