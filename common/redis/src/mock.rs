use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Client, CustomRedisError};

/// In-memory list store with the same per-key semantics as `RedisClient`.
///
/// Clones share state, so a test can hand one clone to a processor and inspect
/// another. Failures can be injected per (op, key) for a number of calls, which
/// is how the partial-failure paths of the processors are exercised.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    lists: HashMap<String, Vec<String>>,
    failures: HashMap<(String, String), (CustomRedisError, usize)>,
    calls: Vec<MockRedisCall>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub values: Vec<String>,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Preload `key` with `values`.
    pub fn with_list(self, key: &str, values: &[&str]) -> Self {
        self.lock().lists.insert(
            key.to_owned(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    /// Make the next `times` calls of `op` on `key` fail with `err`. Use `"*"` as key
    /// to match any key, and as op to match any operation.
    pub fn fail(&self, op: &str, key: &str, err: CustomRedisError, times: usize) {
        self.lock()
            .failures
            .insert((op.to_owned(), key.to_owned()), (err, times));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Current content of `key`, empty when absent.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.lock().lists.get(key).cloned().unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().lists.contains_key(key)
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock().calls.clone()
    }

    fn record(
        &self,
        op: &str,
        key: &str,
        values: Vec<String>,
    ) -> Result<MutexGuard<'_, Inner>, CustomRedisError> {
        let mut inner = self.lock();
        inner.calls.push(MockRedisCall {
            op: op.to_owned(),
            key: key.to_owned(),
            values,
        });

        let candidates = [
            (op.to_owned(), key.to_owned()),
            (op.to_owned(), "*".to_owned()),
            ("*".to_owned(), key.to_owned()),
            ("*".to_owned(), "*".to_owned()),
        ];
        for candidate in candidates {
            if let Some((err, remaining)) = inner.failures.get_mut(&candidate) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(err.clone());
                }
            }
        }

        Ok(inner)
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn lrange(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        let inner = self.record("lrange", &k, Vec::new())?;
        Ok(inner.lists.get(&k).cloned().unwrap_or_default())
    }

    async fn rpush(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut inner = self.record("rpush", &k, vec![v.clone()])?;
        inner.lists.entry(k).or_default().push(v);
        Ok(())
    }

    async fn lrem(&self, k: String, count: usize, v: String) -> Result<usize, CustomRedisError> {
        let mut inner = self.record("lrem", &k, vec![v.clone()])?;
        let Some(list) = inner.lists.get_mut(&k) else {
            return Ok(0);
        };

        let limit = if count == 0 { usize::MAX } else { count };
        let mut removed = 0;
        list.retain(|item| {
            if removed < limit && *item == v {
                removed += 1;
                false
            } else {
                true
            }
        });
        // redis drops empty lists
        if list.is_empty() {
            inner.lists.remove(&k);
        }
        Ok(removed)
    }

    async fn replace_list(&self, k: String, values: Vec<String>) -> Result<(), CustomRedisError> {
        let mut inner = self.record("replace_list", &k, values.clone())?;
        if values.is_empty() {
            inner.lists.remove(&k);
        } else {
            inner.lists.insert(k, values);
        }
        Ok(())
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut inner = self.record("del", &k, Vec::new())?;
        inner.lists.remove(&k);
        Ok(())
    }

    async fn flushdb(&self) -> Result<(), CustomRedisError> {
        let mut inner = self.record("flushdb", "*", Vec::new())?;
        inner.lists.clear();
        Ok(())
    }
}
