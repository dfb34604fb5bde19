//! Renderer: classification-driven dispatch from a traced `RayList` to its
//! next hop — retained locally, forwarded to a neighbor, or retired into a
//! pixel delivery (§4.8 "Classification", "Dispatching", "Pixel delivery").
//!
//! The intersector itself is out of scope (§1: "treated as opaque
//! predicates"); [`Renderer::dispatch`] takes a `RayList` whose rays already
//! carry a [`Termination`] stamp from that (external) pass and owns
//! everything downstream of it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gxy_buffer::SharedBuffer;
use gxy_keyed::{Key, KeyedObjectRegistry};
use gxy_message::{RuntimeHandle, Work};
use gxy_partition::Partitioning;
use thiserror::Error;
use tracing::warn;

use crate::raylist::{Classification, Pixel, RayList};
use crate::ray_queue::{RayPriority, RayQueueManager};
use crate::rendering::Rendering;
use crate::renderingset::RenderingSet;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("rendering set {0} not found")]
    UnknownRenderingSet(Key),
    #[error("rendering {0} not found in its rendering set")]
    UnknownRendering(Key),
}

/// Registered Work-registry type tags for the renderer's two wire messages
/// (mirrors [`crate::RenderingSetWorkIds`]).
#[derive(Clone, Copy, Debug)]
pub struct RendererWorkIds {
    pub send_rays: u32,
    pub send_pixels: u32,
    pub ack_rays: u32,
}

/// Per-process dispatch state: the configured packet-size cap and
/// build-time reverse-lighting variant, plus the queue its own worker
/// thread drains (§4.8, §6 `GXY_RAYS_PER_PACKET`).
pub struct Renderer {
    max_rays_per_packet: usize,
    reverse_lighting: bool,
    work_ids: RendererWorkIds,
    queue: Arc<RayQueueManager>,
    sent_ray_count: AtomicU64,
    received_ray_count: AtomicU64,
    terminated_ray_count: AtomicU64,
}

impl Renderer {
    pub fn new(
        max_rays_per_packet: usize,
        reverse_lighting: bool,
        work_ids: RendererWorkIds,
        queue: Arc<RayQueueManager>,
    ) -> Self {
        Renderer {
            max_rays_per_packet,
            reverse_lighting,
            work_ids,
            queue,
            sent_ray_count: AtomicU64::new(0),
            received_ray_count: AtomicU64::new(0),
            terminated_ray_count: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<RayQueueManager> {
        &self.queue
    }

    pub fn sent_ray_count(&self) -> u64 {
        self.sent_ray_count.load(Ordering::Relaxed)
    }

    pub fn received_ray_count(&self) -> u64 {
        self.received_ray_count.load(Ordering::Relaxed)
    }

    pub fn terminated_ray_count(&self) -> u64 {
        self.terminated_ray_count.load(Ordering::Relaxed)
    }

    /// A packet has just been pulled off the queue and (out of scope here)
    /// traced: classify every ray, resolve BOUNDARY crossings against
    /// `partitioning`, and route each ray to its fate (§4.8 classification
    /// table).
    pub fn dispatch(
        &self,
        rt: &dyn RuntimeHandle,
        partitioning: &Partitioning,
        mut raylist: RayList,
    ) -> Result<(), RendererError> {
        let registry = rt
            .extensions()
            .get::<KeyedObjectRegistry>()
            .ok_or(RendererError::UnknownRenderingSet(raylist.rendering_set))?;
        let rs_obj = registry
            .get(raylist.rendering_set)
            .ok_or(RendererError::UnknownRenderingSet(raylist.rendering_set))?;
        let rs = rs_obj
            .as_any()
            .downcast_ref::<RenderingSet>()
            .ok_or(RendererError::UnknownRenderingSet(raylist.rendering_set))?;
        let rendering = rs
            .rendering(raylist.rendering)
            .ok_or(RendererError::UnknownRendering(raylist.rendering))?;

        if !rs.is_active(raylist.frame) {
            warn!(frame = raylist.frame, current = rs.current_frame(), "dropping ray list for a stale frame");
            rs.decrement_raylist_count(rt);
            return Ok(());
        }

        let mut per_destination: HashMap<i32, RayList> = HashMap::new();
        let mut keepers = RayList::new(raylist.rendering_set, raylist.rendering, raylist.frame);
        let mut terminated_pixels = Vec::new();

        for i in 0..raylist.len() {
            if raylist.classification[i].is_none() {
                let termination = raylist.termination[i].expect("dispatch requires a termination stamp per ray");
                raylist.classify(i, termination, self.reverse_lighting);
            }

            let mut classification = raylist.classification[i].expect("just classified");
            if classification == Classification::Boundary {
                let origin = gxy_partition::Vec3::new(raylist.origin[i][0], raylist.origin[i][1], raylist.origin[i][2]);
                let direction =
                    gxy_partition::Vec3::new(raylist.direction[i][0], raylist.direction[i][1], raylist.direction[i][2]);
                let neighbor = partitioning.neighbor(origin, direction);
                classification = if neighbor == gxy_partition::NO_NEIGHBOR {
                    Classification::Terminated
                } else {
                    Classification::Rank(neighbor)
                };
                raylist.classification[i] = Some(classification);
            }

            match classification {
                Classification::Drop => {}
                Classification::Keep => {
                    keepers.push(
                        raylist.ray_type[i],
                        raylist.origin[i],
                        raylist.direction[i],
                        raylist.color[i],
                        raylist.t[i],
                        raylist.pixel[i],
                        raylist.ray_id[i],
                    );
                }
                Classification::Terminated => {
                    terminated_pixels.push(Pixel {
                        x: raylist.pixel[i].0,
                        y: raylist.pixel[i].1,
                        r: raylist.color[i][0],
                        g: raylist.color[i][1],
                        b: raylist.color[i][2],
                        o: raylist.color[i][3],
                        frame: raylist.frame,
                    });
                }
                Classification::Rank(dest) => {
                    let out = per_destination
                        .entry(dest)
                        .or_insert_with(|| RayList::new(raylist.rendering_set, raylist.rendering, raylist.frame));
                    out.push(
                        raylist.ray_type[i],
                        raylist.origin[i],
                        raylist.direction[i],
                        raylist.color[i],
                        raylist.t[i],
                        raylist.pixel[i],
                        raylist.ray_id[i],
                    );
                }
                Classification::Boundary => unreachable!("resolved above"),
            }
        }

        if !terminated_pixels.is_empty() {
            self.terminated_ray_count
                .fetch_add(terminated_pixels.len() as u64, Ordering::Relaxed);
            self.deliver_pixels(rt, rs, rendering, raylist.rendering_set, raylist.rendering, &terminated_pixels);
        }

        for (dest, out) in per_destination {
            for packet in out.split(self.max_rays_per_packet) {
                self.send_rays(rt, rs, packet, dest);
            }
        }

        if !keepers.is_empty() {
            self.queue
                .enqueue(priority_of(&keepers), keepers)
                .map_err(|_| RendererError::UnknownRenderingSet(raylist.rendering_set))?;
        } else {
            rs.decrement_raylist_count(rt);
        }

        Ok(())
    }

    fn send_rays(&self, rt: &dyn RuntimeHandle, rs: &RenderingSet, packet: RayList, dest: i32) {
        self.sent_ray_count.fetch_add(packet.len() as u64, Ordering::Relaxed);
        rs.increment_inflight_count();
        let msg = Arc::new(SendRaysMsg {
            work_type_id: self.work_ids.send_rays,
            ack_work_type_id: self.work_ids.ack_rays,
            bytes: packet.encode(),
        });
        rt.send_work(msg, dest);
    }

    fn deliver_pixels(
        &self,
        rt: &dyn RuntimeHandle,
        rs: &RenderingSet,
        rendering: &Rendering,
        rendering_set_key: Key,
        rendering_key: Key,
        pixels: &[Pixel],
    ) {
        if rendering.is_owned_by(rt.rank()) {
            rendering.framebuffer().accumulate(pixels);
            rs.record_pixel_sent(pixels.len());
            rs.record_pixel_received(pixels.len());
        } else {
            rs.record_pixel_sent(pixels.len());
            let msg = Arc::new(SendPixelsMsg {
                work_type_id: self.work_ids.send_pixels,
                rendering_set: rendering_set_key,
                rendering: rendering_key,
                pixels: pixels.to_vec(),
            });
            rt.send_work(msg, rendering.owner());
        }
    }
}

fn priority_of(list: &RayList) -> RayPriority {
    use crate::raylist::RayType;
    match list.ray_type.first() {
        Some(RayType::Primary) => RayPriority::Primary,
        _ => RayPriority::Secondary,
    }
}

fn rendering_set_of(rt: &dyn RuntimeHandle, key: Key) -> Option<Arc<dyn gxy_keyed::KeyedObject>> {
    rt.extensions().get::<KeyedObjectRegistry>()?.get(key)
}

/// Point-to-point packet of rays headed to a peer (§4.8 "Dispatching"). On
/// arrival the packet is deserialized, handed to the rendering set's ray
/// queue, and — per SPEC_FULL's "always run the ack protocol" resolution —
/// always answered with an `AckRaysMsg`.
#[derive(Debug)]
pub struct SendRaysMsg {
    work_type_id: u32,
    ack_work_type_id: u32,
    bytes: Vec<u8>,
}

impl SendRaysMsg {
    /// Rebuild a `SendRaysMsg` off the wire, for registration with
    /// `gxy_message::WorkRegistry`.
    pub fn decode(bytes: &[u8], work_type_id: u32, ack_work_type_id: u32) -> Self {
        SendRaysMsg {
            work_type_id,
            ack_work_type_id,
            bytes: bytes.to_vec(),
        }
    }
}

impl Work for SendRaysMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn serialize(&self) -> SharedBuffer {
        SharedBuffer::from_vec(self.bytes.clone())
    }
    fn action(&self, rt: &dyn RuntimeHandle) -> bool {
        let Some(list) = RayList::decode(&self.bytes) else {
            warn!("SendRaysMsg carried an undecodable ray list");
            return false;
        };
        let rendering_set = list.rendering_set;
        let Some(rs_obj) = rendering_set_of(rt, rendering_set) else {
            warn!(rendering_set, "SendRaysMsg arrived before its rendering set");
            return false;
        };
        let Some(rs) = rs_obj.as_any().downcast_ref::<RenderingSet>() else {
            return false;
        };
        rs.increment_raylist_count(rt);

        let Some(queue) = rt.extensions().get::<RayQueueManager>() else {
            warn!("no RayQueueManager installed in extensions");
            return false;
        };
        let priority = priority_of(&list);
        let sender = rt.rank();
        let _ = queue.enqueue(priority, list);

        let ack = Arc::new(AckRaysMsg {
            work_type_id: self.ack_work_type_id,
            rendering_set,
        });
        rt.send_work(ack, sender);
        true
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Point-to-point acknowledgement of one `SendRaysMsg` (§4.9's "ack
/// protocol": every send is acked so the sender can retire its in-flight
/// count).
#[derive(Debug)]
pub struct AckRaysMsg {
    work_type_id: u32,
    rendering_set: Key,
}

impl AckRaysMsg {
    pub fn decode(bytes: &[u8], work_type_id: u32) -> Option<Self> {
        let rendering_set = Key::from_le_bytes(bytes.get(0..8)?.try_into().ok()?);
        Some(AckRaysMsg { work_type_id, rendering_set })
    }
}

impl Work for AckRaysMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn serialize(&self) -> SharedBuffer {
        SharedBuffer::from_vec(self.rendering_set.to_le_bytes().to_vec())
    }
    fn action(&self, rt: &dyn RuntimeHandle) -> bool {
        match rendering_set_of(rt, self.rendering_set) {
            Some(obj) => match obj.as_any().downcast_ref::<RenderingSet>() {
                Some(rs) => {
                    rs.decrement_inflight_count(rt);
                    true
                }
                None => false,
            },
            None => false,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Point-to-point delivery of retired pixels to a rendering's owner (§4.8
/// "Pixel delivery").
#[derive(Debug)]
pub struct SendPixelsMsg {
    work_type_id: u32,
    rendering_set: Key,
    rendering: Key,
    pixels: Vec<Pixel>,
}

impl SendPixelsMsg {
    pub fn decode(bytes: &[u8], work_type_id: u32) -> Option<Self> {
        let rendering_set = Key::from_le_bytes(bytes.get(0..8)?.try_into().ok()?);
        let rendering = Key::from_le_bytes(bytes.get(8..16)?.try_into().ok()?);
        let count = u32::from_le_bytes(bytes.get(16..20)?.try_into().ok()?) as usize;
        let mut pixels = Vec::with_capacity(count);
        let mut p = 20usize;
        for _ in 0..count {
            let chunk = bytes.get(p..p + 28)?;
            pixels.push(Pixel {
                x: u32::from_le_bytes(chunk[0..4].try_into().ok()?),
                y: u32::from_le_bytes(chunk[4..8].try_into().ok()?),
                r: f32::from_le_bytes(chunk[8..12].try_into().ok()?),
                g: f32::from_le_bytes(chunk[12..16].try_into().ok()?),
                b: f32::from_le_bytes(chunk[16..20].try_into().ok()?),
                o: f32::from_le_bytes(chunk[20..24].try_into().ok()?),
                frame: u32::from_le_bytes(chunk[24..28].try_into().ok()?),
            });
            p += 28;
        }
        Some(SendPixelsMsg {
            work_type_id,
            rendering_set,
            rendering,
            pixels,
        })
    }
}

impl Work for SendPixelsMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn serialize(&self) -> SharedBuffer {
        let mut out = Vec::with_capacity(16 + 4 + self.pixels.len() * 24);
        out.extend_from_slice(&self.rendering_set.to_le_bytes());
        out.extend_from_slice(&self.rendering.to_le_bytes());
        out.extend_from_slice(&(self.pixels.len() as u32).to_le_bytes());
        for p in &self.pixels {
            out.extend_from_slice(&p.x.to_le_bytes());
            out.extend_from_slice(&p.y.to_le_bytes());
            out.extend_from_slice(&p.r.to_le_bytes());
            out.extend_from_slice(&p.g.to_le_bytes());
            out.extend_from_slice(&p.b.to_le_bytes());
            out.extend_from_slice(&p.o.to_le_bytes());
            out.extend_from_slice(&p.frame.to_le_bytes());
        }
        SharedBuffer::from_vec(out)
    }
    fn action(&self, rt: &dyn RuntimeHandle) -> bool {
        let Some(rs_obj) = rendering_set_of(rt, self.rendering_set) else {
            return false;
        };
        let Some(rs) = rs_obj.as_any().downcast_ref::<RenderingSet>() else {
            return false;
        };
        if let Some(rendering) = rs.rendering(self.rendering) {
            rendering.framebuffer().accumulate(&self.pixels);
        }
        rs.record_pixel_received(self.pixels.len());
        true
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}
