//! In-process backend. State lives only as long as the process and is
//! shared between clones.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use super::{KvBackend, KvPair};
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    fail_writes: AtomicBool,
    /// Writes still allowed before every further write fails.
    write_limit: Mutex<Option<usize>>,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.inner.puts.load(Ordering::SeqCst)
    }

    /// Number of `delete` and `delete_tree` calls so far.
    pub fn delete_count(&self) -> usize {
        self.inner.deletes.load(Ordering::SeqCst)
    }

    /// Makes every subsequent write fail, to simulate a lost store.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lets `n` more writes through, then fails the rest. Simulates a
    /// store lost in the middle of a multi-key update.
    pub fn fail_writes_after(&self, n: usize) {
        *self.inner.write_limit.lock().unwrap_or_else(|e| e.into_inner()) = Some(n);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.read()
            .get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Copy of the whole map, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.inner.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::store("memory backend is rejecting writes"));
        }
        {
            let mut limit = self.inner.write_limit.lock().unwrap_or_else(|e| e.into_inner());
            match limit.as_mut() {
                Some(0) => return Err(Error::store("memory backend write limit reached")),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        Ok(self.inner.data.write().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write()?.insert(key.to_string(), value.to_vec());
        self.inner.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        Ok(self
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KvPair {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.write()?.remove(key);
        self.inner.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        self.write()?.retain(|k, _| !k.starts_with(prefix));
        self.inner.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
