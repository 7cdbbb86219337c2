//! Per-pipe plane pool and the frame commit protocol.

use std::io;
use std::sync::Arc;

use tracing::{debug, info_span, instrument, trace, warn};

use crate::device::{AtomicRequest, CommitFlags, Device};
use crate::error::{AccessError, Error};
use crate::layer::{OverlayBuffer, OverlayLayer};
use crate::plane::{DisplayPlane, PlaneType};
use crate::Fourcc;

/// Pairs a plane with the layer it will scan out, both by index.
///
/// Plane indices refer to the manager's pool, layer indices to the frame's
/// layer slice. Assignments are only meaningful for the frame they were
/// computed for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlaneAssignment {
    /// Index into [`DisplayPlaneManager::planes`]
    pub plane: usize,
    /// Index into the frame's layer slice
    pub layer: usize,
}

/// Result of partitioning a frame's layers.
#[derive(Debug, Default)]
pub struct FrameAssignment {
    /// Layers that go directly to hardware planes
    pub assigned: Vec<PlaneAssignment>,
    /// Indices of layers the GPU compositor has to take
    pub fallback: Vec<usize>,
}

/// Owns the plane pool of one display pipe and drives atomic commits on it.
///
/// The pool is built once at construction from the planes the device exposes
/// for the pipe. Per frame, [`validate_layers`](Self::validate_layers)
/// partitions the incoming layers,
/// [`commit_frame_atomic`](Self::commit_frame_atomic) builds and submits the
/// frame transaction and [`end_update`](Self::end_update) retires planes and
/// buffers the new frame no longer uses.
#[derive(Debug)]
pub struct DisplayPlaneManager<D: Device> {
    device: D,
    pipe: u32,
    crtc_id: u32,
    planes: Vec<DisplayPlane>,
    buffers: Vec<Arc<OverlayBuffer>>,
    overlay_usage_disabled: bool,
    span: tracing::Span,
}

impl<D: Device> DisplayPlaneManager<D> {
    /// Builds the plane pool for the crtc `crtc_id` at pipe index `pipe`.
    ///
    /// Planes whose crtc mask does not cover the pipe are skipped; planes
    /// that fail property resolution are excluded with a warning. A pool
    /// without a primary plane cannot present anything and is an error.
    ///
    /// Setting `HWC_DISABLE_OVERLAYS=1` in the environment restricts the
    /// manager to the primary plane, forcing full GPU composition.
    pub fn new(device: D, pipe: u32, crtc_id: u32) -> Result<DisplayPlaneManager<D>, Error> {
        let span = info_span!("hwc_planes", crtc = crtc_id);
        let _guard = span.enter();

        let overlay_usage_disabled = std::env::var("HWC_DISABLE_OVERLAYS")
            .map(|x| {
                x == "1" || x.to_lowercase() == "true" || x.to_lowercase() == "yes"
            })
            .unwrap_or(false);
        if overlay_usage_disabled {
            debug!("overlay usage disabled, all composition goes through the gpu");
        }

        let plane_ids = device
            .plane_ids()
            .map_err(|source| access_error("Failed to enumerate planes", &device, source))?;

        let mut planes = Vec::new();
        for id in plane_ids {
            let info = device
                .plane_info(id)
                .map_err(|source| access_error("Failed to query plane info", &device, source))?;
            if (1 << pipe) & info.possible_crtcs == 0 {
                continue;
            }
            let formats = info
                .formats
                .iter()
                .filter_map(|&f| Fourcc::try_from(f).ok())
                .collect();
            match Self::create_plane(&device, id, info.possible_crtcs, formats) {
                Ok(plane) => planes.push(plane),
                Err(err) => warn!("Excluding plane {} from the pool: {}", id, err),
            }
        }

        if !planes.iter().any(|p| p.plane_type() == PlaneType::Primary) {
            return Err(Error::NoPrimaryPlane(crtc_id));
        }
        debug!(planes = planes.len(), "plane pool initialized");

        drop(_guard);
        Ok(DisplayPlaneManager {
            device,
            pipe,
            crtc_id,
            planes,
            buffers: Vec::new(),
            overlay_usage_disabled,
            span,
        })
    }

    /// Factory for pool planes; isolates the choice of update path.
    fn create_plane(
        device: &D,
        plane_id: u32,
        possible_crtcs: u32,
        formats: Vec<Fourcc>,
    ) -> Result<DisplayPlane, Error> {
        DisplayPlane::new_atomic(device, plane_id, possible_crtcs, formats)
    }

    /// The crtc this manager commits to.
    pub fn crtc(&self) -> u32 {
        self.crtc_id
    }

    /// Pipe index of the crtc.
    pub fn pipe(&self) -> u32 {
        self.pipe
    }

    /// The plane pool.
    pub fn planes(&self) -> &[DisplayPlane] {
        &self.planes
    }

    /// Restricts or re-allows overlay plane usage at runtime.
    pub fn disable_overlay_usage(&mut self, disabled: bool) {
        self.overlay_usage_disabled = disabled;
    }

    /// Partitions a frame's layers into plane-assignable and GPU-fallback
    /// sets.
    ///
    /// The bottom layer only matches primary planes, the rest compete for
    /// free overlay planes in z-order. Capability checks are necessary but
    /// not sufficient, so every candidate pairing is probed with a test
    /// commit of the whole assignment built so far before it is accepted.
    /// Layers no plane takes land in the fallback set.
    #[instrument(level = "trace", parent = &self.span, skip_all)]
    #[profiling::function]
    pub fn validate_layers(&mut self, layers: &[OverlayLayer]) -> FrameAssignment {
        let mut assignment = FrameAssignment::default();
        let mut used = vec![false; self.planes.len()];

        for (layer_index, layer) in layers.iter().enumerate() {
            let mut placed = false;
            for plane_index in 0..self.planes.len() {
                if used[plane_index] {
                    continue;
                }
                let ty = self.planes[plane_index].plane_type();
                let eligible = if layer_index == 0 {
                    ty == PlaneType::Primary
                } else {
                    ty == PlaneType::Overlay && !self.overlay_usage_disabled
                };
                if !eligible {
                    continue;
                }

                let fit = match self.planes[plane_index].validate_layer(layer) {
                    Some(fit) => fit,
                    None => continue,
                };

                let mut probe = assignment.assigned.clone();
                probe.push(PlaneAssignment {
                    plane: plane_index,
                    layer: layer_index,
                });
                if let Err(err) = self.test_commit(&probe, layers) {
                    trace!(layer = layer_index, plane = self.planes[plane_index].id(),
                           "test commit rejected pairing: {}", err);
                    continue;
                }

                if let Some(format) = fit.fallback_format {
                    debug!(layer = layer_index, ?format, "recommending opaque format");
                    layer.buffer.set_recommended_format(format);
                }
                assignment.assigned.push(PlaneAssignment {
                    plane: plane_index,
                    layer: layer_index,
                });
                used[plane_index] = true;
                placed = true;
                break;
            }
            if !placed {
                assignment.fallback.push(layer_index);
            }
        }

        debug!(
            assigned = assignment.assigned.len(),
            fallback = assignment.fallback.len(),
            "frame partitioned"
        );
        assignment
    }

    /// Asks the kernel whether this exact set of plane bindings can be
    /// realized right now, without touching hardware state.
    #[instrument(level = "trace", parent = &self.span, skip_all)]
    #[profiling::function]
    pub fn test_commit(
        &self,
        assignment: &[PlaneAssignment],
        layers: &[OverlayLayer],
    ) -> Result<(), Error> {
        let mut req = AtomicRequest::new();
        for pa in assignment {
            self.planes[pa.plane].update_properties(&mut req, self.crtc_id, &layers[pa.layer])?;
        }

        self.device
            .atomic_commit(CommitFlags::TEST_ONLY, &req)
            .map_err(|err| {
                trace!("test commit rejected: {}", err);
                Error::TestFailed(self.crtc_id)
            })
    }

    /// Builds and submits one frame's transaction.
    ///
    /// Every plane update is written into `req` before anything is
    /// submitted; a failed write aborts the frame with the hardware
    /// untouched. Only after all writes succeed are the planes marked
    /// enabled, the frame's buffers marked in use and the request handed to
    /// the kernel as one unit, with `flip_token` attached for completion
    /// matching.
    ///
    /// The commit always requests a page-flip event. It runs non-blocking
    /// unless `needs_modeset` (or globally disabled overlay usage) asks for
    /// mode-set permission instead.
    #[instrument(level = "trace", parent = &self.span, skip(self, layers, req))]
    #[profiling::function]
    pub fn commit_frame_atomic(
        &mut self,
        assignment: &[PlaneAssignment],
        layers: &[OverlayLayer],
        req: &mut AtomicRequest,
        needs_modeset: bool,
        flip_token: u64,
    ) -> Result<(), Error> {
        let mut flags = CommitFlags::PAGE_FLIP_EVENT;
        if needs_modeset || self.overlay_usage_disabled {
            flags |= CommitFlags::ALLOW_MODESET;
        } else {
            flags |= CommitFlags::NONBLOCK;
        }

        // New frame: usage marks are rebuilt from this frame's assignment.
        for buffer in &self.buffers {
            buffer.set_in_use(false);
        }
        for plane in &mut self.planes {
            plane.set_enabled(false);
        }

        for pa in assignment {
            let layer = &layers[pa.layer];
            debug!(
                layer = layer.index,
                plane = self.planes[pa.plane].id(),
                fb = layer.buffer.fb(),
                "adding layer for display composition"
            );
            self.planes[pa.plane].update_properties(req, self.crtc_id, layer)?;
        }

        // The transaction is complete, nothing can fail before submission.
        for pa in assignment {
            self.planes[pa.plane].set_enabled(true);
            let buffer = &layers[pa.layer].buffer;
            buffer.set_in_use(true);
            self.track_buffer(buffer);
        }

        req.set_user_data(flip_token);
        self.device.atomic_commit(flags, req).map_err(|source| {
            access_error("Failed to commit frame", &self.device, source)
        })
    }

    /// Post-commit retirement pass, run once per frame regardless of the
    /// commit outcome.
    ///
    /// Cursor and overlay planes the frame left unused get their unbind
    /// writes queued into `req`, riding whatever atomic unit is submitted
    /// next; the primary plane is never disabled here. Tracked buffers age
    /// by the ref-count law: one increment per frame in use, one decrement
    /// per idle frame, released once the count drops below zero. The grace
    /// period covers the scanout still reading a buffer the latest commit
    /// replaced.
    #[instrument(level = "trace", parent = &self.span, skip_all)]
    #[profiling::function]
    pub fn end_update(&mut self, req: &mut AtomicRequest) -> Result<(), Error> {
        for plane in &mut self.planes {
            if plane.plane_type() == PlaneType::Primary || plane.is_enabled() {
                continue;
            }
            plane.disable(req)?;
        }

        self.buffers.retain(|buffer| {
            if buffer.in_use() {
                buffer.increment_ref_count();
                return true;
            }
            if buffer.decrease_ref_count() >= 0 {
                return true;
            }
            trace!(fb = buffer.fb(), "retiring overlay buffer");
            false
        });

        Ok(())
    }

    /// Logs the pool state for debugging.
    pub fn dump(&self) {
        let _guard = self.span.enter();
        for plane in &self.planes {
            plane.dump();
        }
    }

    fn track_buffer(&mut self, buffer: &Arc<OverlayBuffer>) {
        if !self.buffers.iter().any(|b| Arc::ptr_eq(b, buffer)) {
            self.buffers.push(buffer.clone());
        }
    }
}

fn access_error<D: Device>(errmsg: &'static str, device: &D, source: io::Error) -> Error {
    Error::Access(AccessError {
        errmsg,
        dev: device.dev_path(),
        source,
    })
}
