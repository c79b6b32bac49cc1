//! Candados por trámite
//!
//! Quien modifica un trámite y publica sus eventos lo hace con el candado
//! del trámite tomado, desde antes de escribir hasta después de publicar.
//! Así los eventos de un mismo trámite salen en el orden en que se
//! confirmaron los cambios. Trámites distintos no se esperan entre sí.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct RecordLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Espera el candado del trámite; se libera al soltar la guarda
    pub async fn lock(&self, record_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // candados que nadie tiene ni espera
            locks.retain(|id, lock| *id == record_id || Arc::strong_count(lock) > 1);
            locks.entry(record_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
