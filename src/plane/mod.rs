//! Hardware plane abstraction.
//!
//! A [`DisplayPlane`] pairs the static capabilities of one kms plane (class,
//! crtc mask, format list) with the update path used to program it. Planes
//! come in two variants: a base variant for devices driven through the legacy
//! interface, which carries capabilities only, and an atomic variant holding
//! the property-id cache needed to emit property writes into an
//! [`AtomicRequest`]. The variant is fixed at construction.

use std::fmt;

use tracing::{info, trace};

use crate::device::{AtomicRequest, Device, PropertyInfo};
use crate::error::{AccessError, Error};
use crate::format::get_opaque;
use crate::layer::OverlayLayer;
use crate::Fourcc;

mod atomic;

pub(crate) use atomic::PlaneProps;

/// Class of a hardware plane, as reported by the `type` plane property.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum PlaneType {
    /// General purpose plane
    #[default]
    Overlay = 0,
    /// The main scanout plane of a crtc
    Primary = 1,
    /// Small plane for cursor images, cannot scale
    Cursor = 2,
}

impl PlaneType {
    fn from_value(value: u64) -> Option<PlaneType> {
        match value {
            0 => Some(PlaneType::Overlay),
            1 => Some(PlaneType::Primary),
            2 => Some(PlaneType::Cursor),
            _ => None,
        }
    }
}

/// Outcome of a successful layer validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LayerFit {
    /// Opaque format the buffer should be re-imported with before the plane
    /// can scan it out. Only ever set for primary planes.
    pub fallback_format: Option<Fourcc>,
}

#[derive(Debug)]
enum PlaneBackend {
    Base,
    Atomic(PlaneProps),
}

/// One hardware plane of a display pipe.
#[derive(Debug)]
pub struct DisplayPlane {
    id: u32,
    possible_crtcs: u32,
    ty: PlaneType,
    supported_formats: Vec<Fourcc>,
    last_valid_format: Option<Fourcc>,
    enabled: bool,
    backend: PlaneBackend,
}

impl DisplayPlane {
    /// Creates a base-variant plane for the legacy update path.
    ///
    /// The plane class is resolved from the property list; properties are
    /// otherwise ignored.
    pub fn new<D: Device>(
        device: &D,
        plane_id: u32,
        possible_crtcs: u32,
        formats: Vec<Fourcc>,
    ) -> Result<DisplayPlane, Error> {
        let props = query_properties(device, plane_id)?;
        Ok(DisplayPlane {
            id: plane_id,
            possible_crtcs,
            ty: resolve_type(&props),
            supported_formats: formats,
            last_valid_format: None,
            enabled: false,
            backend: PlaneBackend::Base,
        })
    }

    /// Creates an atomic-variant plane, resolving its property-id cache.
    ///
    /// Fails with [`Error::UnknownProperty`] when the plane lacks one of the
    /// properties the atomic update path cannot work without.
    pub fn new_atomic<D: Device>(
        device: &D,
        plane_id: u32,
        possible_crtcs: u32,
        formats: Vec<Fourcc>,
    ) -> Result<DisplayPlane, Error> {
        let props = query_properties(device, plane_id)?;
        Ok(DisplayPlane {
            id: plane_id,
            possible_crtcs,
            ty: resolve_type(&props),
            supported_formats: formats,
            last_valid_format: None,
            enabled: false,
            backend: PlaneBackend::Atomic(PlaneProps::from_properties(plane_id, &props)?),
        })
    }

    /// Plane object id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Class of the plane.
    pub fn plane_type(&self) -> PlaneType {
        self.ty
    }

    /// Whether the plane can be bound to the crtc at `pipe` index.
    pub fn is_crtc_supported(&self, pipe: u32) -> bool {
        (1 << pipe) & self.possible_crtcs != 0
    }

    /// Whether the latest committed frame uses this plane.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Scanout formats the plane accepts.
    pub fn supported_formats(&self) -> &[Fourcc] {
        &self.supported_formats
    }

    /// Whether the plane can scan out `format`.
    ///
    /// Keeps a one-entry cache of the last accepted format, so the steady
    /// state of a frame sequence skips the list scan.
    pub fn is_supported_format(&mut self, format: Fourcc) -> bool {
        if self.last_valid_format == Some(format) {
            return true;
        }
        if self.supported_formats.contains(&format) {
            self.last_valid_format = Some(format);
            return true;
        }
        false
    }

    /// Checks whether this plane can take `layer`, without committing to it.
    ///
    /// The format check runs first. Primary planes get a second chance for
    /// alpha formats: scanout of the bottom layer is opaque anyway, so the
    /// alpha-less sibling format is just as good, and the returned
    /// [`LayerFit`] asks for the buffer to be re-imported under it. All other
    /// accepts go through the class-specific capability check.
    pub fn validate_layer(&mut self, layer: &OverlayLayer) -> Option<LayerFit> {
        let format = layer.buffer.format();
        if !self.is_supported_format(format) {
            if self.ty == PlaneType::Primary {
                if let Some(opaque) = get_opaque(format) {
                    if self.is_supported_format(opaque) {
                        return Some(LayerFit {
                            fallback_format: Some(opaque),
                        });
                    }
                }
            }
            trace!(plane = self.id, ?format, "format not supported by plane");
            return None;
        }

        if !self.can_composite_layer(layer) {
            return None;
        }

        Some(LayerFit {
            fallback_format: None,
        })
    }

    /// Class-specific capability check. Base-variant planes accept
    /// everything; restrictions can only be expressed against a property
    /// cache.
    pub fn can_composite_layer(&self, layer: &OverlayLayer) -> bool {
        match &self.backend {
            PlaneBackend::Base => true,
            PlaneBackend::Atomic(props) => props.can_composite_layer(self.id, self.ty, layer),
        }
    }

    /// Queues the property writes binding `layer` to this plane on `crtc_id`.
    ///
    /// Nothing reaches the hardware here; the writes land in `req` and take
    /// effect with its submission. A missing optional property suppresses its
    /// write, with one exception: a layer requesting rotation on a plane
    /// whose `rotation` id is unresolved is a hard [`Error::UnknownProperty`]
    /// rather than a silent drop, since presenting the frame unrotated would
    /// be visibly wrong. [`can_composite_layer`](Self::can_composite_layer)
    /// rejects such pairings up front, so a well-formed assignment never
    /// hits this path.
    pub fn update_properties(
        &self,
        req: &mut AtomicRequest,
        crtc_id: u32,
        layer: &OverlayLayer,
    ) -> Result<(), Error> {
        match &self.backend {
            PlaneBackend::Base => Err(Error::NonAtomicPlane(self.id)),
            PlaneBackend::Atomic(props) => props.update(self.id, self.ty, req, crtc_id, layer),
        }
    }

    /// Queues the writes that unbind the plane from its crtc and framebuffer.
    ///
    /// Safe to call on an already disabled plane, the writes are the same.
    pub fn disable(&mut self, req: &mut AtomicRequest) -> Result<(), Error> {
        match &self.backend {
            PlaneBackend::Base => Err(Error::NonAtomicPlane(self.id)),
            PlaneBackend::Atomic(props) => {
                props.disable(self.id, req);
                self.enabled = false;
                Ok(())
            }
        }
    }

    /// Logs the plane state for debugging.
    pub fn dump(&self) {
        info!("{}", self);
    }
}

impl fmt::Display for DisplayPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plane {}: type={:?} crtcs={:#x} enabled={} formats={:?}",
            self.id, self.ty, self.possible_crtcs, self.enabled, self.supported_formats
        )?;
        if let PlaneBackend::Atomic(props) = &self.backend {
            write!(
                f,
                " rotation={} alpha={} in_fence_fd={}",
                props.rotation.is_some(),
                props.alpha.is_some(),
                props.in_fence_fd.is_some()
            )?;
        }
        Ok(())
    }
}

fn resolve_type(props: &[PropertyInfo]) -> PlaneType {
    // Missing or unknown "type" leaves the plane in the overlay class.
    props
        .iter()
        .find(|p| p.name == "type")
        .and_then(|p| PlaneType::from_value(p.value))
        .unwrap_or_default()
}

fn query_properties<D: Device>(device: &D, plane_id: u32) -> Result<Vec<PropertyInfo>, Error> {
    device.plane_properties(plane_id).map_err(|source| {
        Error::Access(AccessError {
            errmsg: "Failed to query plane properties",
            dev: device.dev_path(),
            source,
        })
    })
}
