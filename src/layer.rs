//! Layers and scanout buffers as handed down by the compositing frontend.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::Fourcc;

bitflags::bitflags! {
    /// Possible rotations of a layer, matching the kms `rotation`
    /// plane property bits.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct Rotation: u32 {
        /// No rotation
        const ROTATE_0 = 0b00000001;
        /// Rotate by 90° counter-clockwise
        const ROTATE_90 = 0b00000010;
        /// Rotate by 180° counter-clockwise
        const ROTATE_180 = 0b00000100;
        /// Rotate by 270° counter-clockwise
        const ROTATE_270 = 0b00001000;
        /// Flip along the horizontal axis
        const FLIP_H = 0b00010000;
        /// Flip along the vertical axis
        const FLIP_V = 0b00100000;
    }
}

impl Default for Rotation {
    fn default() -> Rotation {
        Rotation::ROTATE_0
    }
}

/// Blending requested for a layer's alpha channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Blending {
    /// Ignore the alpha channel
    #[default]
    None,
    /// Colors are already multiplied by alpha
    Premultiplied,
    /// Colors are scaled by alpha at blend time
    Coverage,
}

/// Axis-aligned rectangle in integer display coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    /// Left edge
    pub left: i32,
    /// Top edge
    pub top: i32,
    /// Right edge, exclusive
    pub right: i32,
    /// Bottom edge, exclusive
    pub bottom: i32,
}

impl Rect {
    /// Creates a rectangle from its edges.
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Rect {
        Rect {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Width of the rectangle, zero if degenerate.
    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    /// Height of the rectangle, zero if degenerate.
    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

/// Axis-aligned rectangle in sub-pixel buffer coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FRect {
    /// Left edge
    pub left: f32,
    /// Top edge
    pub top: f32,
    /// Right edge, exclusive
    pub right: f32,
    /// Bottom edge, exclusive
    pub bottom: f32,
}

impl FRect {
    /// Creates a rectangle from its edges.
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> FRect {
        FRect {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Width of the rectangle.
    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    /// Height of the rectangle.
    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }
}

/// A scanout buffer shared between the frontend and the plane manager.
///
/// The manager tracks buffers it has put on screen past the lifetime of the
/// layer that carried them, since the hardware keeps scanning a buffer out
/// until the commit replacing it has completed. The usage mark and age
/// counter driving that deferred reclamation live here.
#[derive(Debug)]
pub struct OverlayBuffer {
    fb_id: u32,
    width: u32,
    height: u32,
    format: Fourcc,
    in_use: AtomicBool,
    ref_count: AtomicI32,
    // 0 encodes "no recommendation", no fourcc is 0
    recommended_format: AtomicU32,
}

impl OverlayBuffer {
    /// Wraps an already imported framebuffer.
    pub fn new(fb_id: u32, width: u32, height: u32, format: Fourcc) -> Arc<OverlayBuffer> {
        Arc::new(OverlayBuffer {
            fb_id,
            width,
            height,
            format,
            in_use: AtomicBool::new(false),
            ref_count: AtomicI32::new(0),
            recommended_format: AtomicU32::new(0),
        })
    }

    /// Framebuffer object id.
    pub fn fb(&self) -> u32 {
        self.fb_id
    }

    /// Buffer width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Buffer height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Format the buffer was imported with.
    pub fn format(&self) -> Fourcc {
        self.format
    }

    /// Whether the most recent commit put this buffer on a plane.
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    pub(crate) fn set_in_use(&self, in_use: bool) {
        self.in_use.store(in_use, Ordering::SeqCst);
    }

    /// Current reclamation age of the buffer.
    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_ref_count(&self) -> i32 {
        self.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn decrease_ref_count(&self) -> i32 {
        self.ref_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Opaque format the frontend should re-import the buffer with, set when
    /// a primary plane accepted the buffer only under its alpha-less sibling.
    pub fn recommended_format(&self) -> Option<Fourcc> {
        Fourcc::try_from(self.recommended_format.load(Ordering::SeqCst)).ok()
    }

    pub(crate) fn set_recommended_format(&self, format: Fourcc) {
        self.recommended_format.store(format as u32, Ordering::SeqCst);
    }
}

/// One layer of a frame, immutable while a commit is in flight.
#[derive(Debug, Clone)]
pub struct OverlayLayer {
    /// Z-order index of the layer within its frame
    pub index: usize,
    /// Buffer to scan out
    pub buffer: Arc<OverlayBuffer>,
    /// Destination rectangle in display coordinates
    pub display_frame: Rect,
    /// Source crop in buffer coordinates
    pub source_crop: FRect,
    /// Requested blending mode
    pub blending: Blending,
    /// Layer-wide alpha, only honored for premultiplied blending
    pub alpha: u8,
    /// Requested rotation
    pub rotation: Rotation,
    /// Fence the buffer producer signals when rendering is done,
    /// `-1` when the buffer is ready
    pub acquire_fence: RawFd,
}

impl OverlayLayer {
    /// A full-opacity, unrotated layer without geometry.
    pub fn new(index: usize, buffer: Arc<OverlayBuffer>) -> OverlayLayer {
        OverlayLayer {
            index,
            buffer,
            display_frame: Rect::default(),
            source_crop: FRect::default(),
            blending: Blending::None,
            alpha: 0xff,
            rotation: Rotation::ROTATE_0,
            acquire_fence: -1,
        }
    }

    /// Alpha value as written to the plane, fully opaque unless the
    /// layer blends premultiplied.
    pub(crate) fn plane_alpha(&self) -> u64 {
        if self.blending == Blending::Premultiplied {
            self.alpha as u64
        } else {
            0xff
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_extents() {
        let r = Rect::new(10, 20, 110, 220);
        assert_eq!(r.width(), 100);
        assert_eq!(r.height(), 200);
        assert_eq!(Rect::new(10, 10, 0, 0).width(), 0);
    }

    #[test]
    fn plane_alpha_follows_blending() {
        let buffer = OverlayBuffer::new(1, 64, 64, Fourcc::Argb8888);
        let mut layer = OverlayLayer::new(0, buffer);
        layer.alpha = 0x80;
        assert_eq!(layer.plane_alpha(), 0xff);
        layer.blending = Blending::Premultiplied;
        assert_eq!(layer.plane_alpha(), 0x80);
    }

    #[test]
    fn recommended_format_starts_unset() {
        let buffer = OverlayBuffer::new(1, 64, 64, Fourcc::Argb8888);
        assert_eq!(buffer.recommended_format(), None);
        buffer.set_recommended_format(Fourcc::Xrgb8888);
        assert_eq!(buffer.recommended_format(), Some(Fourcc::Xrgb8888));
    }
}
