//! Kernel-facing control-device abstraction.
//!
//! The composition core talks to the kernel exclusively through the
//! [`Device`] trait, keeping the plane and manager logic independent of the
//! ioctl layer. [`DrmDeviceFd`] implements it on top of an open DRM node.

use std::io;
use std::path::PathBuf;

mod fd;
#[cfg(test)]
pub(crate) mod mock;

pub use fd::DrmDeviceFd;

bitflags::bitflags! {
    /// Flags submitted alongside an atomic property set.
    ///
    /// The values match the kernel uapi.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct CommitFlags: u32 {
        /// Request a completion event once the frame is on screen
        const PAGE_FLIP_EVENT = 0x0001;
        /// Validate only, do not touch hardware state
        const TEST_ONLY = 0x0100;
        /// Return immediately instead of blocking on the commit
        const NONBLOCK = 0x0200;
        /// The request may perform a full mode-set
        const ALLOW_MODESET = 0x0400;
    }
}

/// One property exposed by a kms object, as reported by the kernel.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    /// Property id, unique per device
    pub id: u32,
    /// Property name
    pub name: String,
    /// Current value
    pub value: u64,
}

/// Static capabilities of one hardware plane.
#[derive(Debug, Clone)]
pub struct PlaneInfo {
    /// Bitmask of display pipes the plane can be bound to,
    /// one bit per crtc index
    pub possible_crtcs: u32,
    /// Raw fourcc codes of the scanout formats the plane accepts
    pub formats: Vec<u32>,
}

/// An atomic property set under construction.
///
/// Writes accumulate as `(object id, property id, value)` triples in call
/// order and are only handed to the kernel as one unit, so a transaction
/// either describes the complete frame or is thrown away.
#[derive(Debug, Default, Clone)]
pub struct AtomicRequest {
    props: Vec<(u32, u32, u64)>,
    user_data: u64,
}

impl AtomicRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends one property write.
    pub fn add_property(&mut self, object: u32, property: u32, value: u64) {
        self.props.push((object, property, value));
    }

    /// Opaque token delivered back with the completion event.
    pub fn set_user_data(&mut self, token: u64) {
        self.user_data = token;
    }

    /// Returns the completion token.
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// The accumulated property writes, in insertion order.
    pub fn props(&self) -> &[(u32, u32, u64)] {
        &self.props
    }

    /// Returns whether no writes have been queued.
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Drops all queued writes so the allocation can be reused.
    pub fn clear(&mut self) {
        self.props.clear();
        self.user_data = 0;
    }
}

/// Control-device operations the composition core depends on.
pub trait Device {
    /// Path of the underlying node, for diagnostics.
    fn dev_path(&self) -> Option<PathBuf> {
        None
    }

    /// Object ids of all planes of the device.
    fn plane_ids(&self) -> io::Result<Vec<u32>>;

    /// Static capabilities of one plane.
    fn plane_info(&self, plane: u32) -> io::Result<PlaneInfo>;

    /// The property list of one plane.
    fn plane_properties(&self, plane: u32) -> io::Result<Vec<PropertyInfo>>;

    /// Submits an atomic property set.
    fn atomic_commit(&self, flags: CommitFlags, req: &AtomicRequest) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_preserves_insertion_order() {
        let mut req = AtomicRequest::new();
        req.add_property(31, 7, 100);
        req.add_property(31, 8, 200);
        req.add_property(42, 7, 300);
        assert_eq!(req.props(), &[(31, 7, 100), (31, 8, 200), (42, 7, 300)]);

        req.clear();
        assert!(req.is_empty());
        assert_eq!(req.user_data(), 0);
    }
}
