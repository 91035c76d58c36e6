//! Region-of-interest reconciliation for the blit engine.
//!
//! The engine reads a source crop, writes a destination crop, and must touch
//! only whole chroma samples on the output side. [`calculate_roi`] resolves the
//! crop/scale/rotate/alignment constraints into the three rectangles the
//! hardware is actually programmed with. The computation is pure; a degenerate
//! result is not an error here and only surfaces as a backend rejection at
//! trigger time.

use crate::buffer::format::PixelFormat;
use crate::geometry::{Rect, Transform};

/// Inputs to [`calculate_roi`].
#[derive(Clone, Copy, Debug)]
pub struct RoiRequest {
    /// Requested source crop, in source-buffer pixels.
    pub src_crop: Rect,
    /// Requested destination crop, in destination-buffer pixels.
    pub dst_crop: Rect,
    /// Source buffer extent (width, height).
    pub src_extent: (i32, i32),
    /// Destination buffer extent (width, height).
    pub dst_extent: (i32, i32),
    /// Destination pixel format; its chroma subsampling dictates alignment.
    pub dst_format: PixelFormat,
    /// Transform applied by the blit.
    pub transform: Transform,
    /// Source is interlaced; the engine reads one field.
    pub interlaced: bool,
}

/// The reconciled ROI triple (plus the optional content rectangle).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoiSet {
    /// What the engine reads. Unaligned; subsampled/packed reads tolerate odd
    /// crops.
    pub src: Rect,
    /// Where the requested content lands. Origin floor-aligned on subsampled
    /// axes, size as requested.
    pub dst: Rect,
    /// What the engine actually writes: `dst` with its size ceiling-aligned on
    /// the same axes. Always covers `dst`.
    pub output: Rect,
    /// Where visible content begins inside `output`, for letterbox/pillarbox
    /// fill. Present only when requested.
    pub content: Option<Rect>,
}

fn floor2(v: i32) -> i32 {
    v & !1
}

fn ceil2(v: i32) -> i32 {
    (v + 1) & !1
}

/// Shrink a far edge that overruns the buffer extent.
///
/// The shrink is by exactly 2 regardless of overshoot magnitude; this mirrors
/// the engine's rounding workaround and is intentionally not a general clamp.
fn clamp_to_extent(rect: &mut Rect, extent: (i32, i32), what: &str) {
    if rect.right() > extent.0 {
        tracing::warn!(
            target: "overblit::roi",
            "{what} ROI right edge {} exceeds buffer width {}, shrinking width by 2",
            rect.right(),
            extent.0
        );
        rect.width -= 2;
    }
    if rect.bottom() > extent.1 {
        tracing::warn!(
            target: "overblit::roi",
            "{what} ROI bottom edge {} exceeds buffer height {}, shrinking height by 2",
            rect.bottom(),
            extent.1
        );
        rect.height -= 2;
    }
}

/// Reconcile crop/scale/rotate/alignment into the engine's ROI triple.
pub fn calculate_roi(req: &RoiRequest, want_content: bool) -> RoiSet {
    // Alignment need follows the destination format, but the engine rotates
    // before it writes, so a quarter turn moves each source axis onto the other
    // destination axis.
    let (sub_h, sub_v) = req.dst_format.subsampling();
    let (align_x, align_y) = if req.transform.rotation.swaps_axes() {
        (sub_v, sub_h)
    } else {
        (sub_h, sub_v)
    };

    let mut src = req.src_crop;

    let mut dst = req.dst_crop;
    if align_x {
        dst.left = floor2(dst.left);
    }
    if align_y {
        dst.top = floor2(dst.top);
    }

    let mut output = dst;
    if align_x {
        output.width = ceil2(dst.width);
    }
    if align_y {
        output.height = ceil2(dst.height);
    }

    if req.interlaced {
        src.height /= 2;
    }

    clamp_to_extent(&mut src, req.src_extent, "source");
    clamp_to_extent(&mut dst, req.dst_extent, "destination");
    clamp_to_extent(&mut output, req.dst_extent, "output");

    let content = want_content.then(|| {
        let mut content = dst;
        if align_x && output.width != req.dst_crop.width {
            content.left += 1;
        }
        if align_y && output.height != req.dst_crop.height {
            content.top += 1;
        }
        content
    });

    RoiSet {
        src,
        dst,
        output,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rotation, Transform};

    fn request(src_crop: Rect, dst_crop: Rect, dst_format: PixelFormat) -> RoiRequest {
        RoiRequest {
            src_crop,
            dst_crop,
            src_extent: (1920, 1080),
            dst_extent: (1920, 1080),
            dst_format,
            transform: Transform::IDENTITY,
            interlaced: false,
        }
    }

    #[test]
    fn rgb_destination_needs_no_alignment() {
        let req = request(
            Rect::new(1, 3, 101, 51),
            Rect::new(5, 7, 99, 49),
            PixelFormat::Rgba8888,
        );
        let rois = calculate_roi(&req, false);
        assert_eq!(rois.src, req.src_crop);
        assert_eq!(rois.dst, req.dst_crop);
        assert_eq!(rois.output, req.dst_crop);
    }

    #[test]
    fn horizontally_subsampled_aligns_only_x() {
        // Yuyv is 4:2:2: odd left floor-aligns, odd width ceiling-aligns, the
        // vertical axis is untouched.
        let req = request(
            Rect::new(0, 0, 100, 100),
            Rect::new(3, 3, 7, 7),
            PixelFormat::Yuyv,
        );
        let rois = calculate_roi(&req, false);
        assert_eq!(rois.dst, Rect::new(2, 3, 7, 7));
        assert_eq!(rois.output, Rect::new(2, 3, 8, 7));
    }

    #[test]
    fn fully_subsampled_aligns_both_axes() {
        let req = request(
            Rect::new(0, 0, 100, 100),
            Rect::new(3, 5, 7, 9),
            PixelFormat::Nv12,
        );
        let rois = calculate_roi(&req, false);
        assert_eq!(rois.dst, Rect::new(2, 4, 7, 9));
        assert_eq!(rois.output, Rect::new(2, 4, 8, 10));
    }

    #[test]
    fn quarter_turn_flips_alignment_axes() {
        // 4:2:2 destination under Rot90: the horizontal subsampling lands on Y.
        let mut req = request(
            Rect::new(0, 0, 100, 100),
            Rect::new(3, 3, 7, 7),
            PixelFormat::Yuyv,
        );
        req.transform = Transform::rotate(Rotation::Rot90);
        let rois = calculate_roi(&req, false);
        assert_eq!(rois.dst, Rect::new(3, 2, 7, 7));
        assert_eq!(rois.output, Rect::new(3, 2, 7, 8));
    }

    #[test]
    fn source_roi_stays_unaligned() {
        let req = request(
            Rect::new(3, 5, 7, 9),
            Rect::new(0, 0, 64, 64),
            PixelFormat::Nv12,
        );
        let rois = calculate_roi(&req, false);
        assert_eq!(rois.src, Rect::new(3, 5, 7, 9));
    }

    #[test]
    fn interlaced_source_reads_one_field() {
        let mut req = request(
            Rect::new(0, 0, 720, 480),
            Rect::new(0, 0, 720, 480),
            PixelFormat::Rgba8888,
        );
        req.interlaced = true;
        let rois = calculate_roi(&req, false);
        assert_eq!(rois.src.height, 240);
    }

    #[test]
    fn overrun_shrinks_by_exactly_two() {
        let mut req = request(
            Rect::new(0, 0, 1920, 1080),
            Rect::new(0, 0, 1921, 1080),
            PixelFormat::Rgba8888,
        );
        req.dst_extent = (1920, 1080);
        let rois = calculate_roi(&req, false);
        assert_eq!(rois.dst.width, 1919);
        // Shrink is literal, not a clamp to the edge.
        let mut req_big = req;
        req_big.dst_crop.width = 1930;
        let rois_big = calculate_roi(&req_big, false);
        assert_eq!(rois_big.dst.width, 1928);
    }

    #[test]
    fn content_roi_shifts_on_padded_axes_only() {
        let req = request(
            Rect::new(0, 0, 100, 100),
            Rect::new(3, 4, 7, 10),
            PixelFormat::Nv12,
        );
        let rois = calculate_roi(&req, true);
        // X padded (7 -> 8): shift. Y unpadded (10 already even): no shift.
        assert_eq!(rois.content, Some(Rect::new(3, 4, 7, 10)));

        let req2 = request(
            Rect::new(0, 0, 100, 100),
            Rect::new(4, 4, 8, 10),
            PixelFormat::Nv12,
        );
        let rois2 = calculate_roi(&req2, true);
        // Nothing padded: content equals dst.
        assert_eq!(rois2.content, Some(rois2.dst));
    }

    #[test]
    fn calculation_is_pure() {
        let req = request(
            Rect::new(3, 5, 7, 9),
            Rect::new(1, 1, 33, 17),
            PixelFormat::Yv12,
        );
        let a = calculate_roi(&req, true);
        let b = calculate_roi(&req, true);
        assert_eq!(a, b);
    }

    #[test]
    fn output_covers_destination() {
        for (left, top, w, h) in [(3, 3, 7, 7), (0, 0, 2, 2), (5, 9, 11, 13), (2, 4, 6, 8)] {
            let req = request(
                Rect::new(0, 0, 100, 100),
                Rect::new(left, top, w, h),
                PixelFormat::Nv12,
            );
            let rois = calculate_roi(&req, false);
            assert!(rois.output.width >= rois.dst.width);
            assert!(rois.output.height >= rois.dst.height);
            assert!(rois.output.left <= rois.dst.left);
            assert!(rois.output.top <= rois.dst.top);
        }
    }
}
