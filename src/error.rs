//! Errors reported by the composition core.

use std::io;
use std::path::PathBuf;

/// Errors thrown by [`DisplayPlane`](crate::plane::DisplayPlane)
/// and [`DisplayPlaneManager`](crate::manager::DisplayPlaneManager).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The underlying device encountered an access error
    #[error("DRM access error: {0}")]
    Access(#[from] AccessError),
    /// A plane is missing a property the atomic path cannot work without
    #[error("Plane {plane} is missing a required property '{name}'")]
    UnknownProperty {
        /// Plane object id
        plane: u32,
        /// Property name
        name: &'static str,
    },
    /// Atomic test rejected the proposed plane configuration
    #[error("Atomic test failed for new properties on crtc {0}")]
    TestFailed(u32),
    /// The operation needs an atomic property cache, but the plane has none
    #[error("Plane {0} does not support atomic updates")]
    NonAtomicPlane(u32),
    /// No primary plane is available for the pipe
    #[error("No usable primary plane for crtc {0}")]
    NoPrimaryPlane(u32),
}

/// Device access error with the failing operation and device path attached.
#[derive(thiserror::Error, Debug)]
#[error("{errmsg} on device `{dev:?}` ({source})")]
pub struct AccessError {
    /// Description of the failed operation
    pub errmsg: &'static str,
    /// Device on which the error was generated
    pub dev: Option<PathBuf>,
    /// Underlying device error
    pub source: io::Error,
}
