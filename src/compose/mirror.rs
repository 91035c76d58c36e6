//! Mirror-path geometry.
//!
//! Mirroring re-blits one display's composed output onto another display whose
//! resolution and panel orientation differ. The rotation is the delta between
//! the two orientations; the destination rectangle letterboxes the source
//! aspect into the target.

use crate::geometry::{Rect, Rotation, Transform};

/// Per-display geometry supplied by the external display provider.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

/// Source crop, destination rectangle, and transform for mirroring `src` onto
/// `dst`.
pub fn mirror_geometry(src: &DisplayGeometry, dst: &DisplayGeometry) -> (Rect, Rect, Transform) {
    let src_crop = Rect::new(0, 0, src.width as i32, src.height as i32);

    let rotation = dst.rotation.compose(src.rotation.inverse());

    // Aspect of the source as it will land on the target after rotation.
    let (content_w, content_h) = if rotation.swaps_axes() {
        (src.height as i64, src.width as i64)
    } else {
        (src.width as i64, src.height as i64)
    };

    let target_w = dst.width as i64;
    let target_h = dst.height as i64;

    // Fit, preserving aspect: letterbox or pillarbox whichever axis is slack.
    let (fit_w, fit_h) = if content_w * target_h > target_w * content_h {
        (target_w, (content_h * target_w) / content_w.max(1))
    } else {
        ((content_w * target_h) / content_h.max(1), target_h)
    };

    let dst_rect = Rect::new(
        ((target_w - fit_w) / 2) as i32,
        ((target_h - fit_h) / 2) as i32,
        fit_w as i32,
        fit_h as i32,
    );

    (src_crop, dst_rect, Transform::rotate(rotation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom(width: u32, height: u32, rotation: Rotation) -> DisplayGeometry {
        DisplayGeometry {
            width,
            height,
            rotation,
        }
    }

    #[test]
    fn same_aspect_fills_the_target() {
        let (src_crop, dst_rect, xform) = mirror_geometry(
            &geom(1920, 1080, Rotation::Rot0),
            &geom(3840, 2160, Rotation::Rot0),
        );
        assert_eq!(src_crop, Rect::new(0, 0, 1920, 1080));
        assert_eq!(dst_rect, Rect::new(0, 0, 3840, 2160));
        assert_eq!(xform.rotation, Rotation::Rot0);
    }

    #[test]
    fn wider_source_letterboxes_vertically() {
        let (_, dst_rect, _) = mirror_geometry(
            &geom(1920, 1080, Rotation::Rot0),
            &geom(1024, 768, Rotation::Rot0),
        );
        assert_eq!(dst_rect.width, 1024);
        assert_eq!(dst_rect.height, 576);
        assert_eq!(dst_rect.top, (768 - 576) / 2);
        assert_eq!(dst_rect.left, 0);
    }

    #[test]
    fn rotation_delta_between_panels() {
        let (_, _, xform) = mirror_geometry(
            &geom(1080, 1920, Rotation::Rot90),
            &geom(1920, 1080, Rotation::Rot0),
        );
        assert_eq!(xform.rotation, Rotation::Rot270);
    }

    #[test]
    fn rotated_source_fits_by_swapped_aspect() {
        // Portrait panel mirrored onto a landscape sink with a quarter turn:
        // the rotated content is landscape and fills the sink.
        let (_, dst_rect, xform) = mirror_geometry(
            &geom(1080, 1920, Rotation::Rot90),
            &geom(1920, 1080, Rotation::Rot0),
        );
        assert!(xform.rotation.swaps_axes());
        assert_eq!(dst_rect, Rect::new(0, 0, 1920, 1080));
    }
}
