//! `${name}` placeholder resolution.
//!
//! Resolution is a single pass over the template: every token is
//! looked up once and its value is inserted verbatim. Inserted
//! values are never scanned again, so a value containing `${...}`
//! stays literal.

use crate::error::EngineError;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]+)\}").expect("failed to compile placeholder regex")
});

/// Placeholder name → value mapping used to resolve templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    values: HashMap<String, String>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any earlier one under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge a JSON value, flattening objects and arrays into dotted
    /// names (`customers.0.email`). An empty `prefix` merges the
    /// top-level keys under their own names.
    pub fn merge_json(&mut self, prefix: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                for (key, val) in map {
                    let name = join_name(prefix, key);
                    self.merge_json(&name, val);
                }
            }
            Value::Array(items) => {
                for (idx, val) in items.iter().enumerate() {
                    let name = join_name(prefix, &idx.to_string());
                    self.merge_json(&name, val);
                }
            }
            other => {
                if !prefix.is_empty() {
                    self.insert(prefix, scalar_to_string(other));
                }
            }
        }
    }

    /// Resolve every placeholder in `template`; `field` names where
    /// the template came from for error reporting.
    pub fn resolve(&self, template: &str, field: &str) -> Result<String, EngineError> {
        resolve_with(template, field, |name| self.get(name).map(str::to_owned))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = VariableContext::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}

/// Resolve placeholders in `template` with an arbitrary lookup.
///
/// The first unresolved identifier aborts resolution with a
/// [`EngineError::VariableResolution`] naming it.
pub fn resolve_with<F>(template: &str, field: &str, lookup: F) -> Result<String, EngineError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str().trim();
        let value = lookup(name).ok_or_else(|| EngineError::VariableResolution {
            name: name.to_string(),
            field: field.to_string(),
        })?;

        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&template[last..]);

    Ok(out)
}

/// Return the placeholder names referenced by `template`, in order.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

fn join_name(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, &str)]) -> VariableContext {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_resolves_single_placeholder() {
        let vars = ctx(&[("username", "standard_user")]);
        assert_eq!(
            vars.resolve("${username}", "value").unwrap(),
            "standard_user"
        );
    }

    #[test]
    fn test_missing_placeholder_names_identifier() {
        let vars = ctx(&[("username", "standard_user")]);
        let err = vars.resolve("${missing}", "step 2 value").unwrap_err();
        match err {
            EngineError::VariableResolution { name, field } => {
                assert_eq!(name, "missing");
                assert_eq!(field, "step 2 value");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mixed_literals_and_tokens() {
        let vars = ctx(&[("host", "example.com"), ("path", "login")]);
        assert_eq!(
            vars.resolve("https://${host}/${path}?x=1", "url").unwrap(),
            "https://example.com/login?x=1"
        );
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let vars = ctx(&[("a", "${b}"), ("b", "secret")]);
        assert_eq!(vars.resolve("${a}", "value").unwrap(), "${b}");

        // A self-referencing value cannot loop either.
        let vars = ctx(&[("loop", "${loop}")]);
        assert_eq!(vars.resolve("x${loop}x", "value").unwrap(), "x${loop}x");
    }

    #[test]
    fn test_unterminated_and_empty_tokens_are_literal() {
        let vars = VariableContext::new();
        assert_eq!(vars.resolve("${open", "value").unwrap(), "${open");
        assert_eq!(vars.resolve("cost: $5 ${}", "value").unwrap(), "cost: $5 ${}");
    }

    #[test]
    fn test_merge_json_flattens() {
        let mut vars = VariableContext::new();
        vars.merge_json(
            "test_data",
            &json!({
                "products": [{"name": "Backpack", "price": 29.99}],
                "enabled": true,
                "note": null
            }),
        );
        assert_eq!(vars.get("test_data.products.0.name"), Some("Backpack"));
        assert_eq!(vars.get("test_data.products.0.price"), Some("29.99"));
        assert_eq!(vars.get("test_data.enabled"), Some("true"));
        assert_eq!(vars.get("test_data.note"), Some(""));
    }

    #[test]
    fn test_later_merge_overrides_earlier() {
        let mut vars = VariableContext::new();
        vars.merge_json("", &json!({"username": "env_user"}));
        vars.merge_json("", &json!({"username": "scenario_user"}));
        assert_eq!(vars.get("username"), Some("scenario_user"));
    }

    #[test]
    fn test_placeholders_listed_in_order() {
        assert_eq!(
            placeholders("${a} and ${ b } then ${c.d}"),
            vec!["a", "b", "c.d"]
        );
    }
}
