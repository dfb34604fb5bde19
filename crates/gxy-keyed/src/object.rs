//! The `KeyedObject` trait (§3, §4.6): a polymorphic object replicated
//! across every process under the same [`Key`].

use std::any::Any;
use std::fmt;

use gxy_message::RuntimeHandle;

/// Opaque distributed-object identifier (§3 Key): "unique in the process
/// that created it; the same Key names the replicas on every process."
pub type Key = u64;

/// A registered class tag, the Rust analog of the original's `class_type`
/// string-keyed factory (§4.6 `register_class`).
pub type ClassId = u32;

/// A polymorphic object replicated across all processes under one [`Key`]
/// (§3 KeyedObject). Concrete types (cameras, datasets, visualizations,
/// renderers, renderingsets — defined in `gxy-render` and by application
/// code, per §1's "external collaborators") implement this and register a
/// factory with [`crate::KeyedObjectRegistry::register_class`].
pub trait KeyedObject: Any + Send + Sync + fmt::Debug {
    fn key(&self) -> Key;
    fn class_id(&self) -> ClassId;

    /// Append this object's committed state to `out`. Must always append
    /// the same number of bytes for a given object state (§4.6 serialization
    /// contract: "Size is exact").
    fn serialize_state(&self, out: &mut Vec<u8>);

    /// Overwrite this object's state from `bytes`, which is exactly the
    /// slice [`KeyedObject::serialize_state`] produced on the committing
    /// process.
    fn deserialize_state(&self, bytes: &[u8]);

    /// Run on every process (including the root) after the new state has
    /// been applied, while the collective communicator is held (§4.6 step
    /// 3). May allocate resources bound to the replica's new state. A
    /// `false` return is a fatal collective error (§7).
    fn local_commit(&self, rt: &dyn RuntimeHandle) -> bool {
        let _ = rt;
        false
    }

    fn as_any(&self) -> &dyn Any;
}
