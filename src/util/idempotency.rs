use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Key under which a candidate counts as "the same place" within one run.
///
/// Case and whitespace differences in the name or address do not produce a
/// second record.
pub(crate) fn candidate_key(name: &str, address: Option<&str>) -> String {
    let name = normalize(name);
    match address.map(normalize) {
        Some(address) if !address.is_empty() => format!("{name}|{address}"),
        _ => name,
    }
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Per-identifier run locks.
///
/// A run holds the lock for its identifier from the first cache check to
/// the last artifact write, so two concurrent batch workers never both
/// regenerate the same missing artifact. Entries are dropped once no guard
/// references them.
#[derive(Debug, Default)]
pub(crate) struct RunLocks {
    inner: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl RunLocks {
    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, weak| weak.strong_count() > 0);
            if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
                existing
            } else {
                let created = Arc::new(AsyncMutex::new(()));
                locks.insert(key.to_string(), Arc::downgrade(&created));
                created
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, weak| weak.strong_count() > 0);
        locks.len()
    }
}
