use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

use crate::QueryError;

/// Deterministic identifier of a cached read.
///
/// A key is an ordered list of JSON values, usually a resource name, an
/// operation and a parameter object:
///
/// ```
/// use govai_query::subscription::http::QueryKey;
/// use serde_json::json;
///
/// let a = QueryKey::new(["opportunities", "list"]).with(json!({"limit": 20, "recommendation": "BID"}));
/// let b = QueryKey::new(["opportunities", "list"]).with(json!({"recommendation": "BID", "limit": 20}));
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), r#"["opportunities","list",{"limit":20,"recommendation":"BID"}]"#);
/// ```
///
/// Objects are backed by a sorted map, so parameter order never affects
/// equality. Equality and hashing use the canonical serialized form.
#[derive(Clone)]
pub struct QueryKey {
    parts: Vec<Value>,
    canonical: String,
}

impl QueryKey {
    /// Creates a key from string segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_parts(segments.into_iter().map(|s| Value::String(s.into())))
    }

    /// Creates a key from arbitrary JSON parts.
    pub fn from_parts(parts: impl IntoIterator<Item = Value>) -> Self {
        let parts: Vec<Value> = parts.into_iter().map(strip_nulls).collect();
        let canonical = Value::Array(parts.clone()).to_string();
        Self { parts, canonical }
    }

    /// Returns a new key with `part` appended.
    #[must_use]
    pub fn with(&self, part: impl Into<Value>) -> Self {
        Self::from_parts(self.parts.iter().cloned().chain([part.into()]))
    }

    /// Returns a new key with the serialized form of `params` appended.
    ///
    /// `None` fields serialize to `null` and are dropped, so optional filters
    /// that are unset do not change the key.
    ///
    /// # Errors
    ///
    /// Returns an error if `params` cannot be represented as JSON.
    pub fn with_params(&self, params: &impl Serialize) -> Result<Self, QueryError> {
        let value =
            serde_json::to_value(params).map_err(|e| QueryError::Serialization(e.to_string()))?;
        Ok(self.with(value))
    }

    /// Returns the parts of this key.
    #[must_use]
    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// Returns `true` if `prefix` matches the leading parts of this key.
    ///
    /// Every key is a prefix of itself.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        prefix.parts.len() <= self.parts.len()
            && self.parts.iter().zip(&prefix.parts).all(|(a, b)| a == b)
    }

    /// Returns the canonical serialized form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl From<&str> for QueryKey {
    fn from(segment: &str) -> Self {
        Self::new([segment])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_order_does_not_matter() {
        let a = QueryKey::new(["agencies"]).with(json!({"a": 1, "b": 2}));
        let b = QueryKey::new(["agencies"]).with(json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_segment_order_matters() {
        let a = QueryKey::new(["opportunities", "list"]);
        let b = QueryKey::new(["list", "opportunities"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_nulls_are_dropped() {
        let a = QueryKey::new(["opportunities"]).with(json!({"limit": 20, "is_forecast": null}));
        let b = QueryKey::new(["opportunities"]).with(json!({"limit": 20}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_starts_with() {
        let key = QueryKey::new(["opportunities", "list"]).with(json!({"limit": 20}));
        assert!(key.starts_with(&QueryKey::new(["opportunities"])));
        assert!(key.starts_with(&QueryKey::new(["opportunities", "list"])));
        assert!(key.starts_with(&key));
        assert!(!key.starts_with(&QueryKey::new(["opportunities", "detail"])));
        assert!(!QueryKey::new(["opportunities"]).starts_with(&key));
    }

    #[test]
    fn test_with_params() {
        #[derive(Serialize)]
        struct Filters {
            recommendation: Option<&'static str>,
            limit: Option<u32>,
        }

        let key = QueryKey::new(["opportunities", "list"])
            .with_params(&Filters {
                recommendation: Some("BID"),
                limit: None,
            })
            .expect("serializable");
        assert_eq!(
            key.to_string(),
            r#"["opportunities","list",{"recommendation":"BID"}]"#
        );
    }

    #[test]
    fn test_from_str() {
        assert_eq!(QueryKey::from("documents"), QueryKey::new(["documents"]));
    }
}
