//! Property-id cache and transaction writes for atomic planes.

use tracing::trace;

use crate::device::{AtomicRequest, PropertyInfo};
use crate::error::Error;
use crate::layer::{OverlayLayer, Rotation};

use super::PlaneType;

/// Kernel property ids of one plane, resolved once at plane construction.
///
/// `CRTC_*`, `SRC_*`, `CRTC_ID` and `FB_ID` exist on every atomic driver and
/// are required. `rotation`, `alpha` and `IN_FENCE_FD` are optional plane
/// features; an unresolved id both restricts which layers the plane can take
/// and suppresses the corresponding write.
#[derive(Debug, Clone)]
pub(crate) struct PlaneProps {
    pub crtc_id: u32,
    pub fb_id: u32,
    pub crtc_x: u32,
    pub crtc_y: u32,
    pub crtc_w: u32,
    pub crtc_h: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub src_w: u32,
    pub src_h: u32,
    pub rotation: Option<u32>,
    pub alpha: Option<u32>,
    pub in_fence_fd: Option<u32>,
}

impl PlaneProps {
    pub(crate) fn from_properties(plane: u32, props: &[PropertyInfo]) -> Result<PlaneProps, Error> {
        let find = |name: &str| props.iter().find(|p| p.name == name).map(|p| p.id);
        let required =
            |name: &'static str| find(name).ok_or(Error::UnknownProperty { plane, name });

        Ok(PlaneProps {
            crtc_id: required("CRTC_ID")?,
            fb_id: required("FB_ID")?,
            crtc_x: required("CRTC_X")?,
            crtc_y: required("CRTC_Y")?,
            crtc_w: required("CRTC_W")?,
            crtc_h: required("CRTC_H")?,
            src_x: required("SRC_X")?,
            src_y: required("SRC_Y")?,
            src_w: required("SRC_W")?,
            src_h: required("SRC_H")?,
            rotation: find("rotation"),
            alpha: find("alpha"),
            in_fence_fd: find("IN_FENCE_FD"),
        })
    }

    /// Restrictions the property set imposes on layer assignment.
    ///
    /// Overlay planes without an `alpha` property cannot realize partial
    /// translucency (the extremes need no blending hardware). Rotation other
    /// than the identity needs the `rotation` property on every plane class.
    pub(crate) fn can_composite_layer(&self, plane: u32, ty: PlaneType, layer: &OverlayLayer) -> bool {
        let alpha = layer.plane_alpha();
        if ty == PlaneType::Overlay && alpha != 0 && alpha != 0xff && self.alpha.is_none() {
            trace!(plane, alpha, "overlay plane cannot blend translucent layer");
            return false;
        }

        if layer.rotation != Rotation::ROTATE_0 && self.rotation.is_none() {
            trace!(plane, rotation = ?layer.rotation, "plane cannot rotate layer");
            return false;
        }

        true
    }

    /// Appends the writes binding `layer` to the plane on `crtc_id`.
    pub(crate) fn update(
        &self,
        plane: u32,
        ty: PlaneType,
        req: &mut AtomicRequest,
        crtc_id: u32,
        layer: &OverlayLayer,
    ) -> Result<(), Error> {
        let buffer = &layer.buffer;
        let frame = layer.display_frame;
        let crop = layer.source_crop;

        req.add_property(plane, self.crtc_id, crtc_id as u64);
        req.add_property(plane, self.fb_id, buffer.fb() as u64);
        req.add_property(plane, self.crtc_x, frame.left as i64 as u64);
        req.add_property(plane, self.crtc_y, frame.top as i64 as u64);

        // Cursor planes cannot scale or crop; they always present the whole
        // buffer at its native size.
        if ty == PlaneType::Cursor {
            req.add_property(plane, self.crtc_w, buffer.width() as u64);
            req.add_property(plane, self.crtc_h, buffer.height() as u64);
        } else {
            req.add_property(plane, self.crtc_w, frame.width() as u64);
            req.add_property(plane, self.crtc_h, frame.height() as u64);
        }

        // SRC_* are 16.16 fixed point
        req.add_property(plane, self.src_x, to_fixed(crop.left));
        req.add_property(plane, self.src_y, to_fixed(crop.top));
        if ty == PlaneType::Cursor {
            req.add_property(plane, self.src_w, (buffer.width() as u64) << 16);
            req.add_property(plane, self.src_h, (buffer.height() as u64) << 16);
        } else {
            req.add_property(plane, self.src_w, to_fixed(crop.width()));
            req.add_property(plane, self.src_h, to_fixed(crop.height()));
        }

        match self.rotation {
            Some(prop) => req.add_property(plane, prop, layer.rotation.bits() as u64),
            None if layer.rotation != Rotation::ROTATE_0 => {
                return Err(Error::UnknownProperty {
                    plane,
                    name: "rotation",
                });
            }
            None => {}
        }

        if let Some(prop) = self.alpha {
            req.add_property(plane, prop, layer.plane_alpha());
        }

        if layer.acquire_fence >= 0 {
            if let Some(prop) = self.in_fence_fd {
                req.add_property(plane, prop, layer.acquire_fence as u64);
            }
        }

        trace!(plane, fb = buffer.fb(), crtc = crtc_id, "queued plane update");
        Ok(())
    }

    /// Appends the writes unbinding the plane from crtc and framebuffer.
    pub(crate) fn disable(&self, plane: u32, req: &mut AtomicRequest) {
        req.add_property(plane, self.crtc_id, 0);
        req.add_property(plane, self.fb_id, 0);
    }
}

fn to_fixed(coord: f32) -> u64 {
    ((coord as u32) as u64) << 16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockPlane;
    use crate::layer::{FRect, OverlayBuffer, Rect};
    use crate::Fourcc;

    fn props_of(mock: &MockPlane) -> PlaneProps {
        PlaneProps::from_properties(mock.id, &mock.properties).unwrap()
    }

    fn test_layer() -> OverlayLayer {
        let mut layer = OverlayLayer::new(0, OverlayBuffer::new(9, 256, 128, Fourcc::Xrgb8888));
        layer.display_frame = Rect::new(10, 20, 650, 500);
        layer.source_crop = FRect::new(0.0, 0.0, 640.0, 480.0);
        layer
    }

    fn value_of(req: &AtomicRequest, prop: u32) -> u64 {
        req.props()
            .iter()
            .find(|(_, p, _)| *p == prop)
            .map(|&(_, _, v)| v)
            .expect("property not written")
    }

    #[test]
    fn update_writes_geometry_in_fixed_point() {
        let mock = MockPlane::new(30, 0, 0x1, &[Fourcc::Xrgb8888]);
        let props = props_of(&mock);
        let mut req = AtomicRequest::new();

        props
            .update(30, PlaneType::Overlay, &mut req, 5, &test_layer())
            .unwrap();

        assert_eq!(value_of(&req, mock.property_id("CRTC_ID")), 5);
        assert_eq!(value_of(&req, mock.property_id("FB_ID")), 9);
        assert_eq!(value_of(&req, mock.property_id("CRTC_X")), 10);
        assert_eq!(value_of(&req, mock.property_id("CRTC_W")), 640);
        assert_eq!(value_of(&req, mock.property_id("CRTC_H")), 480);
        assert_eq!(value_of(&req, mock.property_id("SRC_X")), 0);
        assert_eq!(value_of(&req, mock.property_id("SRC_W")), 640 << 16);
        assert_eq!(value_of(&req, mock.property_id("SRC_H")), 480 << 16);
        // all writes target the plane object
        assert!(req.props().iter().all(|&(obj, _, _)| obj == 30));
    }

    #[test]
    fn cursor_ignores_layer_geometry() {
        let mock = MockPlane::new(31, 2, 0x1, &[Fourcc::Argb8888]);
        let props = props_of(&mock);
        let mut req = AtomicRequest::new();

        props
            .update(31, PlaneType::Cursor, &mut req, 5, &test_layer())
            .unwrap();

        assert_eq!(value_of(&req, mock.property_id("CRTC_W")), 256);
        assert_eq!(value_of(&req, mock.property_id("CRTC_H")), 128);
        assert_eq!(value_of(&req, mock.property_id("SRC_W")), 256 << 16);
        assert_eq!(value_of(&req, mock.property_id("SRC_H")), 128 << 16);
    }

    #[test]
    fn fence_written_only_when_pending_and_supported() {
        let mock = MockPlane::new(30, 0, 0x1, &[Fourcc::Xrgb8888]).with_property("IN_FENCE_FD");
        let props = props_of(&mock);
        let fence_prop = mock.property_id("IN_FENCE_FD");

        let mut req = AtomicRequest::new();
        let mut layer = test_layer();
        props
            .update(30, PlaneType::Overlay, &mut req, 5, &layer)
            .unwrap();
        assert!(!req.props().iter().any(|&(_, p, _)| p == fence_prop));

        layer.acquire_fence = 42;
        let mut req = AtomicRequest::new();
        props
            .update(30, PlaneType::Overlay, &mut req, 5, &layer)
            .unwrap();
        assert_eq!(value_of(&req, fence_prop), 42);

        // pending fence on a plane without the property is dropped, not an error
        let plain = props_of(&MockPlane::new(30, 0, 0x1, &[Fourcc::Xrgb8888]));
        let mut req = AtomicRequest::new();
        plain
            .update(30, PlaneType::Overlay, &mut req, 5, &layer)
            .unwrap();
        assert!(!req.props().iter().any(|&(_, p, _)| p == fence_prop));
    }

    #[test]
    fn rotation_request_without_property_is_an_error() {
        let props = props_of(&MockPlane::new(30, 0, 0x1, &[Fourcc::Xrgb8888]));
        let mut req = AtomicRequest::new();
        let mut layer = test_layer();
        layer.rotation = Rotation::ROTATE_270;

        let err = props
            .update(30, PlaneType::Overlay, &mut req, 5, &layer)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownProperty {
                plane: 30,
                name: "rotation"
            }
        ));
    }

    #[test]
    fn disable_writes_the_same_unbind_twice() {
        let mock = MockPlane::new(30, 0, 0x1, &[Fourcc::Xrgb8888]);
        let props = props_of(&mock);
        let mut req = AtomicRequest::new();

        props.disable(30, &mut req);
        props.disable(30, &mut req);

        let unbind = [
            (30, mock.property_id("CRTC_ID"), 0),
            (30, mock.property_id("FB_ID"), 0),
        ];
        assert_eq!(&req.props()[..2], &unbind);
        assert_eq!(&req.props()[2..], &unbind);
    }

    #[test]
    fn fixed_point_conversion() {
        assert_eq!(to_fixed(1920.0), 1920 << 16);
        assert_eq!(to_fixed(0.0), 0);
        // fractional coordinates truncate
        assert_eq!(to_fixed(2.75), 2 << 16);
    }
}
