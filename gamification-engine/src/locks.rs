//! Per-user serialization: a striped lock table keyed on `userId` so two
//! mutations to the same user never interleave, while different users
//! progress in parallel. Acquisition is FIFO per key (the underlying
//! `tokio::sync::Mutex` queues waiters in arrival order).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct UserLockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().await;
        table.entry(user_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquires the per-user lock for `user_id`, blocking until any
    /// in-flight mutation for that user completes.
    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(user_id).await;
        lock.lock_owned().await
    }

    /// Acquires both users' locks in a canonical order (lexicographically
    /// smaller id first) so that two concurrent transfers between the same
    /// pair of users can never deadlock on reversed lock order.
    pub async fn acquire_pair(&self, user_a: &str, user_b: &str) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        if user_a <= user_b {
            let lock_a = self.lock_for(user_a).await;
            let guard_a = lock_a.lock_owned().await;
            let lock_b = self.lock_for(user_b).await;
            let guard_b = lock_b.lock_owned().await;
            (guard_a, guard_b)
        } else {
            let (guard_b, guard_a) = Box::pin(self.acquire_pair(user_b, user_a)).await;
            (guard_a, guard_b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_pair_is_order_independent() {
        let table = UserLockTable::new();
        let (a1, b1) = table.acquire_pair("u1", "u2").await;
        drop(a1);
        drop(b1);
        let (b2, a2) = table.acquire_pair("u2", "u1").await;
        drop(a2);
        drop(b2);
    }

    #[tokio::test]
    async fn per_user_lock_serializes_access() {
        let table = Arc::new(UserLockTable::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..10 {
            let table = table.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.acquire("u1").await;
                order.lock().await.push(i);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().await.len(), 10);
    }
}
