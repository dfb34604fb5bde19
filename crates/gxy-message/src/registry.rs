//! Work Registry (§4.5): map from integer type tag to deserializer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::work::Work;

#[derive(Debug, Error)]
pub enum WorkRegistryError {
    #[error("no deserializer registered for work type {0}")]
    UnregisteredType(u32),
}

pub type Deserializer = Arc<dyn Fn(&[u8]) -> Arc<dyn Work> + Send + Sync>;

/// Process-wide map from Work type tag to deserializer. Each Work subclass
/// registers once, typically during a one-time startup registration step
/// (§9 "Duck-typed message dispatch").
#[derive(Default)]
pub struct WorkRegistry {
    by_name: RwLock<HashMap<String, u32>>,
    by_id: RwLock<HashMap<u32, Deserializer>>,
    next_id: AtomicU32,
}

impl WorkRegistry {
    pub fn new() -> Self {
        WorkRegistry {
            by_name: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Register `name`'s deserializer. Idempotent: calling this again with
    /// the same `name` returns the same type id and replaces the
    /// deserializer pointer (useful for hot-reload/test scenarios where a
    /// type gets re-registered).
    pub fn register(&self, name: &str, deserializer: Deserializer) -> u32 {
        let existing = self.by_name.read().get(name).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.by_name.write().insert(name.to_string(), id);
                id
            }
        };
        self.by_id.write().insert(id, deserializer);
        id
    }

    pub fn type_id_of(&self, name: &str) -> Option<u32> {
        self.by_name.read().get(name).copied()
    }

    pub fn deserialize(
        &self,
        type_id: u32,
        bytes: &[u8],
    ) -> Result<Arc<dyn Work>, WorkRegistryError> {
        let guard = self.by_id.read();
        let d = guard
            .get(&type_id)
            .ok_or(WorkRegistryError::UnregisteredType(type_id))?;
        Ok(d(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gxy_buffer::SharedBuffer;
    use std::any::Any;

    #[derive(Debug)]
    struct Dummy(i32);

    impl Work for Dummy {
        fn work_type_id(&self) -> u32 {
            99
        }
        fn serialize(&self) -> SharedBuffer {
            SharedBuffer::from_vec(self.0.to_le_bytes().to_vec())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn register_is_idempotent() {
        let reg = WorkRegistry::new();
        let d: Deserializer = Arc::new(|b: &[u8]| {
            Arc::new(Dummy(i32::from_le_bytes(b.try_into().unwrap()))) as Arc<dyn Work>
        });
        let id1 = reg.register("Dummy", d.clone());
        let id2 = reg.register("Dummy", d);
        assert_eq!(id1, id2);
    }

    #[test]
    fn unregistered_type_is_an_error() {
        let reg = WorkRegistry::new();
        assert!(matches!(
            reg.deserialize(12345, &[]),
            Err(WorkRegistryError::UnregisteredType(12345))
        ));
    }

    #[test]
    fn deserialize_round_trips() {
        let reg = WorkRegistry::new();
        let id = reg.register(
            "Dummy",
            Arc::new(|b: &[u8]| {
                Arc::new(Dummy(i32::from_le_bytes(b.try_into().unwrap()))) as Arc<dyn Work>
            }),
        );
        let original = Dummy(77);
        let bytes = original.serialize();
        let restored = reg.deserialize(id, bytes.get()).unwrap();
        let restored = restored.as_any().downcast_ref::<Dummy>().unwrap();
        assert_eq!(restored.0, 77);
    }
}
