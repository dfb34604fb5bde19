//! Refcounted byte buffer used as message content.
//!
//! A `SharedBuffer` is the Rust analog of Galaxy's `SharedMemory`/`smem`: a
//! heap allocation whose lifetime is independent of any particular `Message`
//! that references it, so an outgoing message and its locally queued copy
//! (for a blocking broadcast, or a retained send-buffer entry) can share the
//! same bytes without a copy. `Arc<[u8]>` gives exactly that semantics, so
//! this crate is a thin, typed wrapper rather than a reimplementation of
//! reference counting.

use std::sync::Arc;

/// Refcounted heap buffer. Cloning a `SharedBuffer` bumps the refcount; the
/// backing allocation is freed when the last clone drops.
///
/// There is no copy-on-write: every clone sees the same bytes, and nothing in
/// this crate ever mutates through a shared buffer after creation.
#[derive(Clone, Debug)]
pub struct SharedBuffer {
    bytes: Arc<[u8]>,
}

impl SharedBuffer {
    /// Allocate a new buffer of `n` zeroed bytes.
    pub fn new(n: usize) -> Self {
        SharedBuffer {
            bytes: vec![0u8; n].into(),
        }
    }

    /// Wrap an existing byte vector without copying.
    pub fn from_vec(v: Vec<u8>) -> Self {
        SharedBuffer { bytes: v.into() }
    }

    /// Wrap a byte slice, copying it into a new allocation.
    pub fn from_slice(s: &[u8]) -> Self {
        SharedBuffer { bytes: s.into() }
    }

    /// Borrow the buffer's contents.
    pub fn get(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes in the buffer.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Number of live references to this buffer's allocation.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_zeroed() {
        let b = SharedBuffer::new(8);
        assert_eq!(b.size(), 8);
        assert_eq!(b.get(), &[0u8; 8]);
    }

    #[test]
    fn clone_shares_allocation() {
        let a = SharedBuffer::from_vec(vec![1, 2, 3]);
        let b = a.clone();
        assert_eq!(a.strong_count(), 2);
        assert_eq!(b.get(), &[1, 2, 3]);
        drop(a);
        assert_eq!(b.strong_count(), 1);
    }

    #[test]
    fn from_slice_copies() {
        let src = [9u8, 8, 7];
        let buf = SharedBuffer::from_slice(&src);
        assert_eq!(buf.get(), &src);
    }
}
