//! Hardware display-composition core for KMS-based display HALs.
//!
//! This crate implements the plane-assignment and commit machinery a display
//! HAL needs to put client buffers directly onto hardware planes:
//!
//! - [`plane::DisplayPlane`] models one hardware plane, its supported formats
//!   and its kernel property ids.
//! - [`manager::DisplayPlaneManager`] owns the plane pool of one display pipe,
//!   partitions a frame's layers between planes and the GPU compositor and
//!   drives the atomic commit protocol, including deferred buffer reclamation.
//! - [`sync`] provides a software fence timeline for retire/release
//!   synchronization where the kernel offers none.
//!
//! The kernel interface is abstracted behind [`device::Device`], with
//! [`device::DrmDeviceFd`] as the real implementation on top of a DRM node.
//! All composition state changes are expressed as atomic property sets
//! ([`device::AtomicRequest`]) that are built in full before anything is
//! submitted, so a rejected frame never leaves partial state behind.

#![warn(missing_debug_implementations)]

pub mod device;
pub mod error;
pub mod format;
pub mod layer;
pub mod manager;
pub mod plane;
pub mod sync;

pub use drm_fourcc::DrmFourcc as Fourcc;

pub use error::Error;
