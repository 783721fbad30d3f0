//! Per-entity lock registry.
//!
//! Serializes engine operations touching the same order. Locks are plain
//! async mutexes held across the operation's storage round trips; the
//! backends are process-local, so the critical section is the transaction
//! boundary.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of named async locks, created on first use.
#[derive(Default)]
pub struct LockManager {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockManager {
	pub fn new() -> Self {
		Self {
			locks: DashMap::new(),
		}
	}

	/// Acquires the lock for the given key, waiting if another operation
	/// holds it.
	pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
		let lock = self
			.locks
			.entry(key.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone();
		lock.lock_owned().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn test_same_key_serializes() {
		let manager = Arc::new(LockManager::new());
		let counter = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..8 {
			let manager = manager.clone();
			let counter = counter.clone();
			let peak = peak.clone();
			handles.push(tokio::spawn(async move {
				let _guard = manager.acquire("order:1").await;
				let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
				peak.fetch_max(current, Ordering::SeqCst);
				tokio::time::sleep(std::time::Duration::from_millis(2)).await;
				counter.fetch_sub(1, Ordering::SeqCst);
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}
		assert_eq!(peak.load(Ordering::SeqCst), 1);
	}
}
