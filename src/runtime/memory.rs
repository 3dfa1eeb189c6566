/// Run-scoped variable store
///
/// Every task of a run shares one `VariableStore`. Writes replace whole
/// values under a write lock, so concurrent writers to the same name leave
/// exactly one of their values behind (last write wins) and never a mix.
/// `${name}` tokens in node data are expanded from this store.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// `${name}` where name is anything up to the closing brace
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").expect("valid variable token pattern"));

/// A stored variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl VarValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            VarValue::Int(i) => Some(*i),
            VarValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            VarValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Text form used by substitution and comparisons
///
/// Integers print as decimals, floats in shortest round-trip form (`2.0`
/// prints as `2`), booleans as `true`/`false`, text verbatim.
impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Bool(b) => write!(f, "{}", b),
            VarValue::Int(i) => write!(f, "{}", i),
            VarValue::Float(x) => write!(f, "{}", x),
            VarValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&Value> for VarValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(b) => VarValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => VarValue::Int(i),
                None => VarValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => VarValue::Text(s.clone()),
            Value::Null => VarValue::Text(String::new()),
            other => VarValue::Text(other.to_string()),
        }
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::Text(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        VarValue::Text(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Int(value)
    }
}

impl From<f64> for VarValue {
    fn from(value: f64) -> Self {
        VarValue::Float(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

/// Shared name → value map of one run
#[derive(Debug, Default)]
pub struct VariableStore {
    vars: RwLock<HashMap<String, VarValue>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<VarValue> {
        self.vars.read().get(name).cloned()
    }

    /// Text form of a variable; absent variables read as the empty string
    pub fn text(&self, name: &str) -> String {
        self.vars.read().get(name).map(|v| v.to_string()).unwrap_or_default()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<VarValue>) {
        self.vars.write().insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> Option<VarValue> {
        self.vars.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.read().contains_key(name)
    }

    /// Read-modify-write of one variable under a single write lock
    ///
    /// `f` sees the current value and returns the new one; `None` removes the
    /// variable. Returns whatever `f` produced.
    pub fn update_with<F>(&self, name: &str, f: F) -> Option<VarValue>
    where
        F: FnOnce(Option<&VarValue>) -> Option<VarValue>,
    {
        let mut vars = self.vars.write();
        let next = f(vars.get(name));
        match &next {
            Some(value) => {
                vars.insert(name.to_string(), value.clone());
            }
            None => {
                vars.remove(name);
            }
        }
        next
    }

    pub fn clear(&self) {
        self.vars.write().clear();
    }

    pub fn len(&self) -> usize {
        self.vars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.read().is_empty()
    }

    /// Expand every `${name}` token in `text`
    ///
    /// Names are taken verbatim (no trimming); unknown names expand to "".
    /// Expansion is single-pass, so a value containing `${...}` is not
    /// expanded again.
    pub fn interpolate(&self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        let vars = self.vars.read();
        TOKEN
            .replace_all(text, |caps: &Captures<'_>| {
                vars.get(&caps[1]).map(|v| v.to_string()).unwrap_or_default()
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn coercion_table() {
        let store = VariableStore::new();
        store.set("i", 42i64);
        store.set("f", 2.0f64);
        store.set("h", 1.5f64);
        store.set("b", false);
        store.set("t", "Hi");
        assert_eq!(store.interpolate("${i}|${f}|${h}|${b}|${t}|${missing}"), "42|2|1.5|false|Hi|");
    }

    #[test]
    fn substitution_is_single_pass() {
        let store = VariableStore::new();
        store.set("a", "${b}");
        store.set("b", "deep");
        assert_eq!(store.interpolate("x${a}y"), "x${b}y");
        assert_eq!(store.interpolate("no tokens"), "no tokens");
        assert_eq!(store.interpolate("${ a }"), "");
    }

    #[test]
    fn json_values_keep_their_kind() {
        assert_eq!(VarValue::from(&json!(7)), VarValue::Int(7));
        assert_eq!(VarValue::from(&json!(0.25)), VarValue::Float(0.25));
        assert_eq!(VarValue::from(&json!(true)), VarValue::Bool(true));
        assert_eq!(VarValue::from(&json!(null)), VarValue::Text(String::new()));
        assert_eq!(VarValue::from(&json!("3")).as_int(), Some(3));
    }

    #[test]
    fn update_with_removes_on_none() {
        let store = VariableStore::new();
        let bump = |v: Option<&VarValue>| Some(VarValue::Int(v.and_then(VarValue::as_int).unwrap_or(0) + 1));
        store.update_with("n", bump);
        store.update_with("n", bump);
        assert_eq!(store.get("n"), Some(VarValue::Int(2)));
        store.update_with("n", |_| None);
        assert!(!store.contains("n"));
    }

    #[test]
    fn concurrent_writers_never_mix_values() {
        let store = Arc::new(VariableStore::new());
        let long_a = "a".repeat(4096);
        let long_b = "b".repeat(4096);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let (a, b) = (long_a.clone(), long_b.clone());
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        store.set("shared", if i % 2 == 0 { a.clone() } else { b.clone() });
                        store.set(format!("own_{}", i), i as i64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let shared = store.text("shared");
        assert!(shared == long_a || shared == long_b);
        for i in 0..8 {
            assert_eq!(store.get(&format!("own_{}", i)), Some(VarValue::Int(i)));
        }
    }
}
