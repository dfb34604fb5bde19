//! `RayList`: a struct-of-arrays batch of rays for one RenderingSet +
//! Rendering + frame + type (§3 RayList, §4.8).
//!
//! The intersector itself is out of scope (§1: "treated as opaque
//! predicates"); this module owns everything downstream of its
//! [`Termination`] stamp — classification, splitting, and the pixel
//! delivery that follows a `TERMINATED` ray.

use gxy_keyed::Key;

/// Which of the three ray families a packet belongs to (§4.8 classification
/// matrix rows).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RayType {
    Primary,
    Shadow,
    Ao,
}

/// What the intersector stamped a ray with (§4.8 classification matrix
/// columns).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Opaque,
    Surface,
    Boundary,
    Timeout,
}

/// The renderer's verdict for one ray (§4.8 "five categories").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Terminated,
    Drop,
    Keep,
    Boundary,
    Rank(i32),
}

/// Apply the `{primary, shadow, ao} x {opaque, surface, boundary, timeout}`
/// matrix from §4.8, with `reverse_lighting` selecting the build-time
/// variant that inverts DROP/TERMINATED for shadow and AO rays.
pub fn classify(ray_type: RayType, termination: Termination, reverse_lighting: bool) -> Classification {
    use Termination as T;

    if termination == T::Boundary {
        return Classification::Boundary;
    }

    match ray_type {
        RayType::Primary => match termination {
            T::Opaque => Classification::Terminated,
            T::Surface => Classification::Keep,
            T::Timeout => Classification::Terminated,
            T::Boundary => unreachable!("handled above"),
        },
        RayType::Shadow => match termination {
            T::Opaque | T::Surface => {
                if reverse_lighting {
                    Classification::Terminated
                } else {
                    Classification::Drop
                }
            }
            T::Timeout => unreachable!("shadow rays never time out (§4.8)"),
            T::Boundary => unreachable!("handled above"),
        },
        RayType::Ao => match termination {
            T::Opaque | T::Surface => {
                if reverse_lighting {
                    Classification::Terminated
                } else {
                    Classification::Drop
                }
            }
            T::Timeout => {
                if reverse_lighting {
                    Classification::Drop
                } else {
                    Classification::Terminated
                }
            }
            T::Boundary => unreachable!("handled above"),
        },
    }
}

/// One retired ray's contribution to a frame buffer (§3 Pixel).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub o: f32,
    pub frame: u32,
}

/// Struct-of-arrays batch of rays (§3 RayList): one entry per ray, indexed
/// in parallel across every field rather than an array-of-structs, matching
/// the original's SIMD-friendly layout.
#[derive(Clone, Debug, Default)]
pub struct RayList {
    pub rendering_set: Key,
    pub rendering: Key,
    pub frame: u32,
    pub ray_type: Vec<RayType>,
    pub origin: Vec<[f32; 3]>,
    pub direction: Vec<[f32; 3]>,
    pub color: Vec<[f32; 4]>,
    pub t: Vec<f32>,
    pub pixel: Vec<(u32, u32)>,
    pub ray_id: Vec<u64>,
    pub termination: Vec<Option<Termination>>,
    pub classification: Vec<Option<Classification>>,
}

impl RayList {
    pub fn new(rendering_set: Key, rendering: Key, frame: u32) -> Self {
        RayList {
            rendering_set,
            rendering,
            frame,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.ray_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ray_type.is_empty()
    }

    /// Append one ray, unclassified and unterminated.
    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        ray_type: RayType,
        origin: [f32; 3],
        direction: [f32; 3],
        color: [f32; 4],
        t: f32,
        pixel: (u32, u32),
        ray_id: u64,
    ) {
        self.ray_type.push(ray_type);
        self.origin.push(origin);
        self.direction.push(direction);
        self.color.push(color);
        self.t.push(t);
        self.pixel.push(pixel);
        self.ray_id.push(ray_id);
        self.termination.push(None);
        self.classification.push(None);
    }

    /// Stamp ray `i`'s termination and classify it (§4.8).
    pub fn classify(&mut self, i: usize, termination: Termination, reverse_lighting: bool) {
        self.termination[i] = Some(termination);
        self.classification[i] = Some(classify(self.ray_type[i], termination, reverse_lighting));
    }

    /// Split this packet into chunks of at most `max_rays_per_packet` rays
    /// each (§3 "when a split-and-forward pass produces an over-long packet
    /// it is split", §6 `GXY_RAYS_PER_PACKET`). Returns `vec![self]`
    /// unchanged if already within the limit.
    pub fn split(self, max_rays_per_packet: usize) -> Vec<RayList> {
        if self.len() <= max_rays_per_packet || max_rays_per_packet == 0 {
            return vec![self];
        }

        let mut out = Vec::new();
        let mut remaining = self;
        while remaining.len() > max_rays_per_packet {
            let mut head = RayList::new(remaining.rendering_set, remaining.rendering, remaining.frame);
            head.ray_type = remaining.ray_type.drain(..max_rays_per_packet).collect();
            head.origin = remaining.origin.drain(..max_rays_per_packet).collect();
            head.direction = remaining.direction.drain(..max_rays_per_packet).collect();
            head.color = remaining.color.drain(..max_rays_per_packet).collect();
            head.t = remaining.t.drain(..max_rays_per_packet).collect();
            head.pixel = remaining.pixel.drain(..max_rays_per_packet).collect();
            head.ray_id = remaining.ray_id.drain(..max_rays_per_packet).collect();
            head.termination = remaining.termination.drain(..max_rays_per_packet).collect();
            head.classification = remaining.classification.drain(..max_rays_per_packet).collect();
            out.push(head);
        }
        out.push(remaining);
        out
    }

    /// Wire encoding for `SendRaysMsg` (§4.8 "Dispatching"): only the "live"
    /// ray fields travel — `termination`/`classification` are this
    /// process's bookkeeping and are `None` again once the packet lands, to
    /// be re-stamped by the next hop's intersector pass.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.len() * 48);
        out.extend_from_slice(&self.rendering_set.to_le_bytes());
        out.extend_from_slice(&self.rendering.to_le_bytes());
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for i in 0..self.len() {
            out.push(self.ray_type[i] as u8);
            for v in self.origin[i] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            for v in self.direction[i] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            for v in self.color[i] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.extend_from_slice(&self.t[i].to_le_bytes());
            out.extend_from_slice(&self.pixel[i].0.to_le_bytes());
            out.extend_from_slice(&self.pixel[i].1.to_le_bytes());
            out.extend_from_slice(&self.ray_id[i].to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<RayList> {
        let mut p = 0usize;
        let take = |p: &mut usize, n: usize| -> Option<&[u8]> {
            let slice = bytes.get(*p..*p + n)?;
            *p += n;
            Some(slice)
        };
        let rendering_set = Key::from_le_bytes(take(&mut p, 8)?.try_into().ok()?);
        let rendering = Key::from_le_bytes(take(&mut p, 8)?.try_into().ok()?);
        let frame = u32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?);
        let count = u32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?) as usize;

        let mut list = RayList::new(rendering_set, rendering, frame);
        for _ in 0..count {
            let ray_type = match *take(&mut p, 1)?.first()? {
                0 => RayType::Primary,
                1 => RayType::Shadow,
                2 => RayType::Ao,
                _ => return None,
            };
            let f3 = |p: &mut usize| -> Option<[f32; 3]> {
                Some([
                    f32::from_le_bytes(take(p, 4)?.try_into().ok()?),
                    f32::from_le_bytes(take(p, 4)?.try_into().ok()?),
                    f32::from_le_bytes(take(p, 4)?.try_into().ok()?),
                ])
            };
            let origin = f3(&mut p)?;
            let direction = f3(&mut p)?;
            let color = [
                f32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?),
                f32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?),
                f32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?),
                f32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?),
            ];
            let t = f32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?);
            let px = u32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?);
            let py = u32::from_le_bytes(take(&mut p, 4)?.try_into().ok()?);
            let ray_id = u64::from_le_bytes(take(&mut p, 8)?.try_into().ok()?);
            list.push(ray_type, origin, direction, color, t, (px, py), ray_id);
        }
        Some(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_matches_spec_table_forward_lighting() {
        assert_eq!(classify(RayType::Primary, Termination::Opaque, false), Classification::Terminated);
        assert_eq!(classify(RayType::Primary, Termination::Surface, false), Classification::Keep);
        assert_eq!(classify(RayType::Primary, Termination::Boundary, false), Classification::Boundary);
        assert_eq!(classify(RayType::Primary, Termination::Timeout, false), Classification::Terminated);

        assert_eq!(classify(RayType::Shadow, Termination::Opaque, false), Classification::Drop);
        assert_eq!(classify(RayType::Shadow, Termination::Surface, false), Classification::Drop);
        assert_eq!(classify(RayType::Shadow, Termination::Boundary, false), Classification::Boundary);

        assert_eq!(classify(RayType::Ao, Termination::Opaque, false), Classification::Drop);
        assert_eq!(classify(RayType::Ao, Termination::Surface, false), Classification::Drop);
        assert_eq!(classify(RayType::Ao, Termination::Boundary, false), Classification::Boundary);
        assert_eq!(classify(RayType::Ao, Termination::Timeout, false), Classification::Terminated);
    }

    #[test]
    fn matrix_matches_spec_table_reverse_lighting() {
        assert_eq!(classify(RayType::Shadow, Termination::Opaque, true), Classification::Terminated);
        assert_eq!(classify(RayType::Ao, Termination::Opaque, true), Classification::Terminated);
        assert_eq!(classify(RayType::Ao, Termination::Timeout, true), Classification::Drop);
    }

    #[test]
    #[should_panic]
    fn shadow_rays_never_time_out() {
        classify(RayType::Shadow, Termination::Timeout, false);
    }

    #[test]
    fn push_and_classify_round_trips() {
        let mut rl = RayList::new(1, 2, 0);
        rl.push(RayType::Primary, [0.0; 3], [1.0, 0.0, 0.0], [1.0; 4], 0.0, (3, 4), 99);
        assert_eq!(rl.len(), 1);
        rl.classify(0, Termination::Opaque, false);
        assert_eq!(rl.classification[0], Some(Classification::Terminated));
    }

    #[test]
    fn split_respects_max_rays_per_packet() {
        let mut rl = RayList::new(1, 2, 0);
        for i in 0..10 {
            rl.push(RayType::Primary, [0.0; 3], [1.0, 0.0, 0.0], [1.0; 4], 0.0, (0, 0), i);
        }
        let parts = rl.split(4);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 4);
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 2);
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut rl = RayList::new(7, 9, 3);
        rl.push(RayType::Shadow, [1.0, 2.0, 3.0], [0.0, 0.0, 1.0], [0.1, 0.2, 0.3, 0.4], 5.5, (10, 20), 42);
        let bytes = rl.encode();
        let decoded = RayList::decode(&bytes).unwrap();
        assert_eq!(decoded.rendering_set, 7);
        assert_eq!(decoded.rendering, 9);
        assert_eq!(decoded.frame, 3);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.ray_type[0], RayType::Shadow);
        assert_eq!(decoded.origin[0], [1.0, 2.0, 3.0]);
        assert_eq!(decoded.pixel[0], (10, 20));
        assert_eq!(decoded.ray_id[0], 42);
        assert!(decoded.termination[0].is_none());
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        assert!(RayList::decode(&[1, 2, 3]).is_none());
    }

    #[test]
    fn split_is_noop_under_limit() {
        let mut rl = RayList::new(1, 2, 0);
        rl.push(RayType::Primary, [0.0; 3], [1.0, 0.0, 0.0], [1.0; 4], 0.0, (0, 0), 0);
        let parts = rl.split(100);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 1);
    }
}
