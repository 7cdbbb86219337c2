//! Format lookup tables.

use crate::Fourcc;

/// Returns the opaque sibling of an alpha format, if any.
///
/// The sibling has identical component layout with the alpha bits ignored,
/// so a buffer can be rescanned under the opaque format without conversion.
pub const fn get_opaque(format: Fourcc) -> Option<Fourcc> {
    use Fourcc::*;
    match format {
        // 16-bit, 4 bits per channel
        Argb4444 => Some(Xrgb4444),
        Abgr4444 => Some(Xbgr4444),
        Rgba4444 => Some(Rgbx4444),
        Bgra4444 => Some(Bgrx4444),
        // 16-bit, 5 bits per color channel
        Argb1555 => Some(Xrgb1555),
        Abgr1555 => Some(Xbgr1555),
        Rgba5551 => Some(Rgbx5551),
        Bgra5551 => Some(Bgrx5551),
        // 32-bit, 8 bits per channel
        Argb8888 => Some(Xrgb8888),
        Abgr8888 => Some(Xbgr8888),
        Rgba8888 => Some(Rgbx8888),
        Bgra8888 => Some(Bgrx8888),
        // 32-bit, 10 bits per color channel
        Argb2101010 => Some(Xrgb2101010),
        Abgr2101010 => Some(Xbgr2101010),
        Rgba1010102 => Some(Rgbx1010102),
        Bgra1010102 => Some(Bgrx1010102),
        // 64-bit half-precision float
        Argb16161616f => Some(Xrgb16161616f),
        Abgr16161616f => Some(Xbgr16161616f),
        _ => None,
    }
}

/// Returns whether the format carries an alpha channel.
pub const fn has_alpha(format: Fourcc) -> bool {
    get_opaque(format).is_some()
}
