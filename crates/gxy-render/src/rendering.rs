//! `Rendering`: one `{camera, datasets, visualization, owner}` tuple within
//! a RenderingSet, plus its pixel sink (§3 Rendering).
//!
//! The camera/dataset/visualization objects themselves are scene-graph
//! state that §1 puts out of scope ("JSON scene-file parsing... only the
//! committed in-memory data-model invariants matter"); a `Rendering` here
//! only needs their [`Key`]s to route pixels and rays.

use std::sync::Mutex;

use gxy_keyed::Key;

use crate::raylist::Pixel;

/// Accumulates retired-ray pixels for one Rendering on its owner process
/// (§4.8 "Pixel delivery": "The owner rendering aggregates into its local
/// framebuffer").
#[derive(Default)]
pub struct Framebuffer {
    pixels: Mutex<Vec<Pixel>>,
}

impl Framebuffer {
    pub fn new() -> Self {
        Framebuffer::default()
    }

    pub fn accumulate(&self, pixels: &[Pixel]) {
        self.pixels.lock().unwrap().extend_from_slice(pixels);
    }

    pub fn len(&self) -> usize {
        self.pixels.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Pixel> {
        self.pixels.lock().unwrap().clone()
    }
}

/// One camera/visualization pass within a RenderingSet (§3 Rendering).
pub struct Rendering {
    key: Key,
    camera: Key,
    visualization: Key,
    /// The rank that collects pixels for this rendering; every other
    /// process ships completed pixels here.
    owner: i32,
    framebuffer: Framebuffer,
}

impl Rendering {
    pub fn new(key: Key, camera: Key, visualization: Key, owner: i32) -> Self {
        Rendering {
            key,
            camera,
            visualization,
            owner,
            framebuffer: Framebuffer::new(),
        }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn camera(&self) -> Key {
        self.camera
    }

    pub fn visualization(&self) -> Key {
        self.visualization
    }

    pub fn owner(&self) -> i32 {
        self.owner
    }

    pub fn is_owned_by(&self, rank: i32) -> bool {
        self.owner == rank
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Reset per-frame pixel accounting for a re-render (§4.9 "Reset").
    pub fn local_reset(&self) {
        self.framebuffer.pixels.lock().unwrap().clear();
    }
}
