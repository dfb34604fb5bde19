//! Per-process `Key -> KeyedObject` map plus the class factory table
//! (§4.6 `register_class`, `new_distributed`, `get`, `drop`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::object::{ClassId, Key, KeyedObject};

#[derive(Debug, Error)]
pub enum KeyedObjectError {
    #[error("no class registered under name {0:?}")]
    UnregisteredClass(String),
    #[error("no class registered under id {0}")]
    UnregisteredClassId(ClassId),
    #[error("no keyed object found for key {0}")]
    UnknownKey(Key),
    #[error("local_commit failed for key {0}")]
    LocalCommitFailed(Key),
}

/// Builds a fresh, not-yet-populated replica for first-sight construction
/// on a non-root process (§4.6 step 1: "creating it on first sight with the
/// class's factory").
pub type ClassFactory = Arc<dyn Fn(Key) -> Arc<dyn KeyedObject> + Send + Sync>;

/// Process-wide keyed-object map and class registry (§2 "Keyed-Object
/// Registry", §4.6). Guarded by a single lock per the original's "guarded by
/// the MessageManager's global lock during commit/drop" concurrency note
/// (§5); lookups outside of a commit/drop are expected to be stable.
pub struct KeyedObjectRegistry {
    objects: RwLock<HashMap<Key, Arc<dyn KeyedObject>>>,
    classes_by_name: RwLock<HashMap<String, ClassId>>,
    classes_by_id: RwLock<HashMap<ClassId, ClassFactory>>,
    next_class_id: AtomicU64,
    next_key: AtomicU64,
}

impl Default for KeyedObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedObjectRegistry {
    pub fn new() -> Self {
        KeyedObjectRegistry {
            objects: RwLock::new(HashMap::new()),
            classes_by_name: RwLock::new(HashMap::new()),
            classes_by_id: RwLock::new(HashMap::new()),
            next_class_id: AtomicU64::new(1),
            next_key: AtomicU64::new(1),
        }
    }

    /// Register `name`'s factory, returning its stable class id. Idempotent
    /// by name, like [`gxy_message::WorkRegistry::register`].
    pub fn register_class(&self, name: &str, factory: ClassFactory) -> ClassId {
        let existing = self.classes_by_name.read().get(name).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.next_class_id.fetch_add(1, Ordering::SeqCst) as ClassId;
                self.classes_by_name.write().insert(name.to_string(), id);
                id
            }
        };
        self.classes_by_id.write().insert(id, factory);
        id
    }

    pub fn class_id_of(&self, name: &str) -> Option<ClassId> {
        self.classes_by_name.read().get(name).copied()
    }

    /// Allocate the next Key (§3: "always-increasing counter on the
    /// master").
    pub fn allocate_key(&self) -> Key {
        self.next_key.fetch_add(1, Ordering::SeqCst)
    }

    /// Insert an already-constructed replica under its own key, used both
    /// by the creating process (`new_distributed`) and by a non-root
    /// process materializing a replica for the first time.
    pub fn insert(&self, obj: Arc<dyn KeyedObject>) {
        self.objects.write().insert(obj.key(), obj);
    }

    pub fn get(&self, key: Key) -> Option<Arc<dyn KeyedObject>> {
        self.objects.read().get(&key).cloned()
    }

    /// Construct a fresh replica for `key` from the registered factory for
    /// `class_id`, without inserting it (callers insert once the state has
    /// been filled in).
    pub fn construct(&self, class_id: ClassId, key: Key) -> Result<Arc<dyn KeyedObject>, KeyedObjectError> {
        let guard = self.classes_by_id.read();
        let factory = guard
            .get(&class_id)
            .ok_or(KeyedObjectError::UnregisteredClassId(class_id))?;
        Ok(factory(key))
    }

    pub fn drop_key(&self, key: Key) {
        self.objects.write().remove(&key);
    }

    pub fn contains(&self, key: Key) -> bool {
        self.objects.read().contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Dummy {
        key: Key,
        value: Mutex<i32>,
    }

    impl KeyedObject for Dummy {
        fn key(&self) -> Key {
            self.key
        }
        fn class_id(&self) -> ClassId {
            1
        }
        fn serialize_state(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.value.lock().unwrap().to_le_bytes());
        }
        fn deserialize_state(&self, bytes: &[u8]) {
            *self.value.lock().unwrap() = i32::from_le_bytes(bytes.try_into().unwrap());
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn register_class_is_idempotent() {
        let reg = KeyedObjectRegistry::new();
        let f: ClassFactory = Arc::new(|k| {
            Arc::new(Dummy {
                key: k,
                value: Mutex::new(0),
            })
        });
        let id1 = reg.register_class("Dummy", f.clone());
        let id2 = reg.register_class("Dummy", f);
        assert_eq!(id1, id2);
    }

    #[test]
    fn insert_get_drop_round_trips() {
        let reg = KeyedObjectRegistry::new();
        let key = reg.allocate_key();
        let obj = Arc::new(Dummy {
            key,
            value: Mutex::new(42),
        });
        reg.insert(obj);
        assert!(reg.contains(key));
        let got = reg.get(key).unwrap();
        assert_eq!(got.key(), key);
        reg.drop_key(key);
        assert!(!reg.contains(key));
        assert!(reg.get(key).is_none());
    }

    #[test]
    fn construct_uses_registered_factory() {
        let reg = KeyedObjectRegistry::new();
        let id = reg.register_class(
            "Dummy",
            Arc::new(|k| {
                Arc::new(Dummy {
                    key: k,
                    value: Mutex::new(0),
                })
            }),
        );
        let obj = reg.construct(id, 7).unwrap();
        assert_eq!(obj.key(), 7);
        assert!(matches!(
            reg.construct(999, 1),
            Err(KeyedObjectError::UnregisteredClassId(999))
        ));
    }
}
