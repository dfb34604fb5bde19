//! Keyed-Object Registry and commit protocol (§4.6): a per-process
//! `Key -> KeyedObject` map kept consistent across processes by collective
//! `CommitMsg` broadcasts.

mod commit;
mod object;
mod registry;

pub use commit::{commit, CommitMsg, SENTINEL};
pub use object::{ClassId, Key, KeyedObject};
pub use registry::{ClassFactory, KeyedObjectError, KeyedObjectRegistry};

#[cfg(test)]
mod tests {
    use super::*;
    use gxy_message::{BroadcastWaiter, Extensions, RuntimeHandle, Work};
    use std::any::Any;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Counter {
        key: Key,
        value: AtomicI32,
        commits: AtomicI32,
    }

    impl KeyedObject for Counter {
        fn key(&self) -> Key {
            self.key
        }
        fn class_id(&self) -> ClassId {
            1
        }
        fn serialize_state(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.value.load(Ordering::SeqCst).to_le_bytes());
        }
        fn deserialize_state(&self, bytes: &[u8]) {
            self.value
                .store(i32::from_le_bytes(bytes.try_into().unwrap()), Ordering::SeqCst);
        }
        fn local_commit(&self, _rt: &dyn RuntimeHandle) -> bool {
            self.commits.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// A single-process "runtime" that runs broadcasts synchronously and
    /// locally, standing in for `gxy-transport`'s `LocalTransport` until
    /// that crate exists — exactly enough of `RuntimeHandle` to exercise
    /// the commit protocol end to end.
    struct OneProcessRuntime {
        extensions: Extensions,
    }

    impl RuntimeHandle for OneProcessRuntime {
        fn rank(&self) -> i32 {
            0
        }
        fn size(&self) -> i32 {
            1
        }
        fn send_work(&self, _work: Arc<dyn Work>, _dest: i32) {
            panic!("single-process runtime has no peers to send to");
        }
        fn broadcast_work(
            &self,
            work: Arc<dyn Work>,
            _collective: bool,
            blocking: bool,
        ) -> Option<BroadcastWaiter> {
            work.collective_action(self, true);
            if blocking {
                let w = BroadcastWaiter::new();
                w.signal();
                Some(w)
            } else {
                None
            }
        }
        fn extensions(&self) -> &Extensions {
            &self.extensions
        }
    }

    #[test]
    fn commit_round_trip_runs_local_commit() {
        let rt = OneProcessRuntime {
            extensions: Extensions::new(),
        };
        let registry = Arc::new(KeyedObjectRegistry::new());
        rt.extensions().insert(registry.clone());

        let class_id = registry.register_class(
            "Counter",
            Arc::new(|k| {
                Arc::new(Counter {
                    key: k,
                    value: AtomicI32::new(0),
                    commits: AtomicI32::new(0),
                })
            }),
        );

        let key = registry.allocate_key();
        let obj = Arc::new(Counter {
            key,
            value: AtomicI32::new(10),
            commits: AtomicI32::new(0),
        });
        registry.insert(obj.clone() as Arc<dyn KeyedObject>);
        assert_eq!(obj.class_id(), class_id);

        let as_keyed: Arc<dyn KeyedObject> = obj.clone();
        let ok = commit(&rt, 42, &as_keyed);
        assert!(ok);
        assert_eq!(obj.commits.load(Ordering::SeqCst), 1);

        obj.value.store(99, Ordering::SeqCst);
        let ok = commit(&rt, 42, &as_keyed);
        assert!(ok);
        assert_eq!(obj.commits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_removes_replica() {
        let registry = KeyedObjectRegistry::new();
        let key = registry.allocate_key();
        registry.insert(Arc::new(Counter {
            key,
            value: AtomicI32::new(0),
            commits: AtomicI32::new(0),
        }));
        assert!(registry.contains(key));
        registry.drop_key(key);
        assert!(!registry.contains(key));
    }
}
