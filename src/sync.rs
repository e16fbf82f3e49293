//! Lock helpers that recover from poisoning instead of propagating panics.
//!
//! A panic inside a sanitize task must not wedge every later upload, so the
//! shared tables keep working with whatever state the panicking thread left.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn mutex_lock<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned lock"
            );
            poisoned.into_inner()
        }
    }
}

pub(crate) fn rw_read<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                lock_kind = "rwlock.read",
                result = "poisoned_recovered",
                "Recovered from poisoned lock"
            );
            poisoned.into_inner()
        }
    }
}

pub(crate) fn rw_write<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                lock_kind = "rwlock.write",
                result = "poisoned_recovered",
                "Recovered from poisoned lock"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn poisoned_mutex_is_recovered() {
        let lock = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let mut guard = poisoner.lock().unwrap();
            *guard = 2;
            panic!("poison");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*mutex_lock(&lock, "test"), 2);
    }

    #[test]
    fn poisoned_rwlock_is_recovered() {
        let lock = Arc::new(RwLock::new(vec![1]));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison");
        })
        .join();

        rw_write(&lock, "test").push(2);
        assert_eq!(*rw_read(&lock, "test"), vec![1, 2]);
    }
}
