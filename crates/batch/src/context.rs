//! Execution context: the checkpoint persisted with every chunk commit.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution context entry '{key}': {reason}")]
pub struct ContextError {
    pub key: String,
    pub reason: String,
}

/// Opaque key/value snapshot.
///
/// Readers store their position token here, processors their running
/// accumulators. Values are JSON so any serde type can be checkpointed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    entries: BTreeMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), ContextError> {
        let key = key.into();
        let json = serde_json::to_value(value).map_err(|e| ContextError {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.entries.insert(key, json);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ContextError> {
        self.entries
            .get(key)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| ContextError {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn put_u64(&mut self, key: impl Into<String>, value: u64) {
        self.entries.insert(key.into(), serde_json::Value::from(value));
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(|v| v.as_u64())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightbatch_core::{Decimal, DecimalSpec};

    #[test]
    fn typed_values_round_trip() {
        let mut ctx = ExecutionContext::new();
        let total = Decimal::parse("1234.56", DecimalSpec::BALANCE).unwrap();
        ctx.put("interest.total", &total).unwrap();
        ctx.put_u64("reader.position", 300);

        assert_eq!(ctx.get::<Decimal>("interest.total").unwrap(), Some(total));
        assert_eq!(ctx.get_u64("reader.position"), Some(300));
        assert_eq!(ctx.get::<Decimal>("missing").unwrap(), None);
    }

    #[test]
    fn wrong_type_is_an_error() {
        let mut ctx = ExecutionContext::new();
        ctx.put("name", &"not a number").unwrap();
        let err = ctx.get::<u64>("name").unwrap_err();
        assert_eq!(err.key, "name");
    }

    #[test]
    fn serializes_as_a_plain_object() {
        let mut ctx = ExecutionContext::new();
        ctx.put_u64("a", 1);
        assert_eq!(serde_json::to_string(&ctx).unwrap(), r#"{"a":1}"#);
    }
}
