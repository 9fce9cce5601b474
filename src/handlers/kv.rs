//! Built-in `kv_interact` handler and `kv_item` wait probe
//!
//! An in-process table/key/item store with the put/get/query/delete
//! surface of the external key-value actions, useful for local runs and
//! for exercising scenarios without live infrastructure. The probe
//! answers conditional waits: does a record exist, and does a field of it
//! match an expected value.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use crate::engine::{path, ActionHandler, ContextSnapshot, HandlerError, WaitProbe};

/// Shared in-process store: table name → key → item
#[derive(Default, Clone)]
pub struct KvStore {
    tables: Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>,
}

impl KvStore {
    pub fn put(&self, table: &str, key: &str, item: Value) {
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), item);
    }

    pub fn get(&self, table: &str, key: &str) -> Option<Value> {
        self.tables.lock().get(table)?.get(key).cloned()
    }

    pub fn delete(&self, table: &str, key: &str) -> bool {
        self.tables
            .lock()
            .get_mut(table)
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Items whose key starts with `prefix`, in key order
    pub fn query(&self, table: &str, prefix: &str) -> Vec<Value> {
        self.tables
            .lock()
            .get(table)
            .map(|t| {
                t.iter()
                    .filter(|(key, _)| key.starts_with(prefix))
                    .map(|(_, item)| item.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Handler for `kv_interact` actions
pub struct KvInteractHandler {
    store: KvStore,
}

impl KvInteractHandler {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }
}

fn required<'a>(params: &'a Value, name: &str, operation: &str) -> Result<&'a str, HandlerError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::new(format!("'{name}' is required for {operation}")))
}

#[async_trait]
impl ActionHandler for KvInteractHandler {
    async fn execute(
        &self,
        params: &Value,
        _ctx: &ContextSnapshot,
    ) -> std::result::Result<Value, HandlerError> {
        let table = required(params, "table", "kv_interact")?;
        let operation = required(params, "operation", "kv_interact")?;
        debug!(table, operation, "kv_interact");

        match operation {
            "put_item" => {
                let key = required(params, "key", "put_item")?;
                let item = params
                    .get("item")
                    .cloned()
                    .ok_or_else(|| HandlerError::new("'item' is required for put_item"))?;
                self.store.put(table, key, item);
                Ok(json!({"operation": "put_item", "key": key}))
            }
            "get_item" => {
                let key = required(params, "key", "get_item")?;
                let item = self.store.get(table, key).unwrap_or(Value::Null);
                Ok(json!({"operation": "get_item", "item": item}))
            }
            "delete_item" => {
                let key = required(params, "key", "delete_item")?;
                let deleted = self.store.delete(table, key);
                Ok(json!({"operation": "delete_item", "deleted": deleted}))
            }
            "query" => {
                let prefix = params
                    .get("prefix")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let items = self.store.query(table, prefix);
                Ok(json!({
                    "operation": "query",
                    "count": items.len(),
                    "items": items
                }))
            }
            other => Err(HandlerError::new(format!(
                "unsupported kv_interact operation '{other}'"
            ))),
        }
    }
}

/// Wait probe answering "does this record exist / match"
pub struct KvItemProbe {
    store: KvStore,
}

impl KvItemProbe {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WaitProbe for KvItemProbe {
    async fn check(
        &self,
        params: &Value,
        _ctx: &ContextSnapshot,
    ) -> std::result::Result<bool, HandlerError> {
        let table = required(params, "table", "kv_item probe")?;
        let key = required(params, "key", "kv_item probe")?;

        let Some(item) = self.store.get(table, key) else {
            return Ok(false);
        };

        // Optional field check on top of existence
        if let Some(expr) = params.get("path").and_then(Value::as_str) {
            let expected = params
                .get("expected")
                .ok_or_else(|| HandlerError::new("'expected' is required when 'path' is set"))?;
            return match path::extract(expr, &item) {
                Ok(extracted) => Ok(&extracted.into_value() == expected),
                Err(_) => Ok(false),
            };
        }

        Ok(true)
    }
}
