//! Builds the one process-wide [`WorkRegistry`] every rank shares,
//! registering every Work type the runtime ships with a stable type tag
//! (§9 "Duck-typed message dispatch": "a closed set of registered variants
//! with a factory keyed by stable `uint32` tags; keep a one-time
//! registration step at program start").

use std::sync::Arc;

use gxy_keyed::CommitMsg;
use gxy_message::{Work, WorkRegistry};
use gxy_render::{
    AckRaysMsg, PropagateStateMsg, RendererWorkIds, RenderingSetWorkIds, ResetMsg, ReduceCheckMsg, SendPixelsMsg,
    SendRaysMsg, SynchronousCheckMsg,
};

use crate::control::{PrintMsg, QuitMsg, SyncMsg};

/// Every Work type tag registered by [`build_work_registry`], handed to
/// constructors that need to stamp outgoing messages with the right id.
#[derive(Clone, Copy, Debug)]
pub struct WorkTypeIds {
    pub commit: u32,
    pub quit: u32,
    pub sync: u32,
    pub print: u32,
    pub rendering_set: RenderingSetWorkIds,
    pub renderer: RendererWorkIds,
}

/// `WorkRegistry::register` hands back a type's id only once the
/// deserializer closure already exists, but most deserializers need to
/// stamp that same id onto the Work object they rebuild. `register` is
/// documented as idempotent by name (re-registering replaces the pointer
/// and keeps the id), so every type here registers twice: once with a
/// throwaway closure to learn its id, then again with the real one closing
/// over it.
fn register_twice<F>(registry: &WorkRegistry, name: &'static str, build: F) -> u32
where
    F: Fn(u32, &[u8]) -> Arc<dyn Work> + Send + Sync + 'static,
{
    let placeholder: gxy_message::Deserializer = Arc::new(move |_: &[u8]| {
        panic!("{name} decoded before its real deserializer was registered")
    });
    let id = registry.register(name, placeholder);
    let build = Arc::new(build);
    registry.register(
        name,
        Arc::new(move |bytes: &[u8]| build(id, bytes)),
    );
    id
}

/// Register every Work type the runtime ships against a fresh
/// [`WorkRegistry`], returning the registry and the type ids every
/// constructor needs.
pub fn build_work_registry() -> (Arc<WorkRegistry>, WorkTypeIds) {
    let registry = WorkRegistry::new();

    let commit = register_twice(&registry, "CommitMsg", |id, bytes| {
        Arc::new(CommitMsg::decode(id, bytes).expect("undecodable CommitMsg")) as Arc<dyn Work>
    });
    let quit = register_twice(&registry, "QuitMsg", |id, _bytes| Arc::new(QuitMsg::new(id)) as Arc<dyn Work>);
    let sync = register_twice(&registry, "SyncMsg", |id, _bytes| Arc::new(SyncMsg::new(id)) as Arc<dyn Work>);
    let print = register_twice(&registry, "PrintMsg", |id, bytes| {
        Arc::new(PrintMsg::decode(bytes, id).expect("undecodable PrintMsg")) as Arc<dyn Work>
    });

    let propagate_state = register_twice(&registry, "PropagateStateMsg", |id, bytes| {
        Arc::new(PropagateStateMsg::decode(bytes, id).expect("undecodable PropagateStateMsg")) as Arc<dyn Work>
    });
    let synchronous_check = register_twice(&registry, "SynchronousCheckMsg", |id, bytes| {
        Arc::new(SynchronousCheckMsg::decode(bytes, id).expect("undecodable SynchronousCheckMsg")) as Arc<dyn Work>
    });
    let reduce_check = register_twice(&registry, "ReduceCheckMsg", |id, bytes| {
        Arc::new(ReduceCheckMsg::decode(bytes, id).expect("undecodable ReduceCheckMsg")) as Arc<dyn Work>
    });
    let reset = register_twice(&registry, "ResetMsg", |id, bytes| {
        Arc::new(ResetMsg::decode(bytes, id).expect("undecodable ResetMsg")) as Arc<dyn Work>
    });

    let ack_rays = register_twice(&registry, "AckRaysMsg", |id, bytes| {
        Arc::new(AckRaysMsg::decode(bytes, id).expect("undecodable AckRaysMsg")) as Arc<dyn Work>
    });
    let send_rays = register_twice(&registry, "SendRaysMsg", move |id, bytes| {
        Arc::new(SendRaysMsg::decode(bytes, id, ack_rays)) as Arc<dyn Work>
    });
    let send_pixels = register_twice(&registry, "SendPixelsMsg", |id, bytes| {
        Arc::new(SendPixelsMsg::decode(bytes, id).expect("undecodable SendPixelsMsg")) as Arc<dyn Work>
    });

    let ids = WorkTypeIds {
        commit,
        quit,
        sync,
        print,
        rendering_set: RenderingSetWorkIds {
            propagate_state,
            synchronous_check,
            reduce_check,
            reset,
        },
        renderer: RendererWorkIds {
            send_rays,
            send_pixels,
            ack_rays,
        },
    };
    (Arc::new(registry), ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_gets_a_distinct_stable_id() {
        let (_registry, ids) = build_work_registry();
        let mut all = vec![
            ids.commit,
            ids.quit,
            ids.sync,
            ids.print,
            ids.rendering_set.propagate_state,
            ids.rendering_set.synchronous_check,
            ids.rendering_set.reduce_check,
            ids.rendering_set.reset,
            ids.renderer.send_rays,
            ids.renderer.ack_rays,
            ids.renderer.send_pixels,
        ];
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), before, "every registered Work type must have a distinct id");
    }

    #[test]
    fn deserialized_work_carries_its_real_type_id() {
        let (registry, ids) = build_work_registry();
        let msg = QuitMsg::new(ids.quit);
        let bytes = msg.serialize();
        let restored = registry.deserialize(ids.quit, bytes.get()).unwrap();
        assert_eq!(restored.work_type_id(), ids.quit);
    }
}
