//! Shared status store.
//!
//! The status store is the rendezvous between the orchestrator and the
//! remote functions: functions write their terminal status, resource
//! samples and in-memory outputs here, the orchestrator publishes task and
//! analysis states and event logs.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::errors::FlowError;

/// Key/value store with append-only lists.
///
/// Every single operation is atomic. Lists and scalar values live in the
/// same key space; appending to a scalar key is an error.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Sets a scalar value, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<(), FlowError>;

    /// Gets a scalar value.
    async fn get(&self, key: &str) -> Result<Option<Value>, FlowError>;

    /// Appends a value to a list, creating it when missing. Returns the new length.
    async fn append(&self, key: &str, value: Value) -> Result<usize, FlowError>;

    /// Returns list items from `start` to `stop`, both inclusive.
    ///
    /// Negative indices count from the end (`-1` is the last item). Missing
    /// keys yield an empty list.
    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Value>, FlowError>;

    /// Returns a whole list.
    async fn list(&self, key: &str) -> Result<Vec<Value>, FlowError> {
        self.range(key, 0, -1).await
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Scalar(Value),
    List(Vec<Value>),
}

/// In-memory status store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    slots: DashMap<String, Slot>,
}

impl InMemoryStatusStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn resolve_index(index: isize, len: usize) -> Option<usize> {
    let len = isize::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    usize::try_from(resolved.max(0)).ok()
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn set(&self, key: &str, value: Value) -> Result<(), FlowError> {
        self.slots.insert(key.to_string(), Slot::Scalar(value));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, FlowError> {
        match self.slots.get(key).as_deref() {
            None => Ok(None),
            Some(Slot::Scalar(value)) => Ok(Some(value.clone())),
            Some(Slot::List(_)) => Err(FlowError::store(format!("key '{key}' holds a list"))),
        }
    }

    async fn append(&self, key: &str, value: Value) -> Result<usize, FlowError> {
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::List(Vec::new()));
        match slot.value_mut() {
            Slot::List(items) => {
                items.push(value);
                Ok(items.len())
            }
            Slot::Scalar(_) => Err(FlowError::store(format!("key '{key}' holds a scalar"))),
        }
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Value>, FlowError> {
        let Some(slot) = self.slots.get(key) else {
            return Ok(Vec::new());
        };
        let Slot::List(items) = slot.value() else {
            return Err(FlowError::store(format!("key '{key}' holds a scalar")));
        };
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let last = items.len() - 1;
        let (Some(from), Some(to)) = (resolve_index(start, items.len()), resolve_index(stop, items.len())) else {
            return Ok(Vec::new());
        };
        let to = to.min(last);
        if from > to {
            return Ok(Vec::new());
        }
        Ok(items[from..=to].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryStatusStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", json!("RUNNING")).await.unwrap();
        store.set("k", json!("COMPLETED")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("COMPLETED")));
    }

    #[tokio::test]
    async fn test_append_and_range() {
        let store = InMemoryStatusStore::new();
        for i in 0..5 {
            store.append("log", json!(i)).await.unwrap();
        }

        assert_eq!(store.list("log").await.unwrap().len(), 5);
        assert_eq!(store.range("log", 1, 2).await.unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(store.range("log", -2, -1).await.unwrap(), vec![json!(3), json!(4)]);
        assert_eq!(store.range("log", 3, 100).await.unwrap(), vec![json!(3), json!(4)]);
        assert!(store.range("log", 4, 1).await.unwrap().is_empty());
        assert!(store.range("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_an_error() {
        let store = InMemoryStatusStore::new();
        store.set("scalar", json!(1)).await.unwrap();
        store.append("list", json!(1)).await.unwrap();

        assert!(store.append("scalar", json!(2)).await.is_err());
        assert!(store.get("list").await.is_err());
        assert!(store.range("scalar", 0, -1).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(InMemoryStatusStore::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append("log", json!(i)).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.list("log").await.unwrap().len(), 32);
    }
}
