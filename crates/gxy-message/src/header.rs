//! Fixed per-message header (§3, §6).
//!
//! `{broadcast_root, sender, type, collective, content_size}`, sent as a raw
//! byte sequence immediately followed by `content_size` bytes of payload.
//! `dest` is not part of the original C++ wire header (point-to-point
//! destination is implicit in the MPI send target) but is carried here so a
//! [`crate::RuntimeHandle`]-agnostic transport can route a message without
//! consulting anything but the header.

/// Sentinel `broadcast_root` value meaning "this is a point-to-point
/// message, not a broadcast."
pub const BROADCAST_NONE: i32 = -1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Root of the broadcast tree, or [`BROADCAST_NONE`] for point-to-point.
    pub broadcast_root: i32,
    /// Rank that most recently sent this message (the originator for a
    /// fresh broadcast, a forwarding node's rank for a relayed one).
    pub sender: i32,
    /// Point-to-point destination rank; unused (`-1`) for broadcasts.
    pub dest: i32,
    /// Work-registry type tag.
    pub type_id: u32,
    /// Whether the comms thread should run this Work's collective action
    /// itself (holding the collective communicator) rather than handing it
    /// to the worker thread.
    pub collective: bool,
    pub content_size: u32,
}

/// Byte length of the header's wire encoding.
pub const HEADER_WIRE_SIZE: usize = 4 + 4 + 4 + 4 + 1 + 4;

impl Header {
    pub fn is_broadcast(&self) -> bool {
        self.broadcast_root != BROADCAST_NONE
    }

    /// Encode the header as the fixed little-endian byte sequence described
    /// in §6 of the spec.
    pub fn to_bytes(&self) -> [u8; HEADER_WIRE_SIZE] {
        let mut buf = [0u8; HEADER_WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.broadcast_root.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sender.to_le_bytes());
        buf[8..12].copy_from_slice(&self.dest.to_le_bytes());
        buf[12..16].copy_from_slice(&self.type_id.to_le_bytes());
        buf[16] = self.collective as u8;
        buf[17..21].copy_from_slice(&self.content_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_WIRE_SIZE]) -> Self {
        Header {
            broadcast_root: i32::from_le_bytes(buf[0..4].try_into().unwrap()),
            sender: i32::from_le_bytes(buf[4..8].try_into().unwrap()),
            dest: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            type_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            collective: buf[16] != 0,
            content_size: u32::from_le_bytes(buf[17..21].try_into().unwrap()),
        }
    }
}
