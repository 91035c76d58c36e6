use smallvec::SmallVec;

use crate::foundation::error::{OverblitError, OverblitResult};

/// Generic pixel formats accepted at the producer boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    Rgba8888,
    Rgbx8888,
    Bgra8888,
    Rgb888,
    Rgb565,
    /// Packed 4:2:2.
    Yuyv,
    /// Semi-planar 4:2:0, UV interleaved.
    Nv12,
    /// Semi-planar 4:2:0, VU interleaved.
    Nv21,
    /// Planar 4:2:0.
    Yv12,
}

impl PixelFormat {
    /// Chroma subsampling per axis: `(horizontal, vertical)`.
    ///
    /// A subsampled axis forces even-coordinate alignment on destination ROIs.
    pub fn subsampling(self) -> (bool, bool) {
        match self {
            PixelFormat::Rgba8888
            | PixelFormat::Rgbx8888
            | PixelFormat::Bgra8888
            | PixelFormat::Rgb888
            | PixelFormat::Rgb565 => (false, false),
            PixelFormat::Yuyv => (true, false),
            PixelFormat::Nv12 | PixelFormat::Nv21 | PixelFormat::Yv12 => (true, true),
        }
    }

    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            PixelFormat::Yuyv | PixelFormat::Nv12 | PixelFormat::Nv21 | PixelFormat::Yv12
        )
    }
}

/// The engine's native color-format selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NativeColorFormat {
    Rgba8888,
    Rgbx8888,
    Bgra8888,
    Rgb888,
    Rgb565,
    YuyvPacked,
    Nv12SemiPlanar,
    Nv21SemiPlanar,
    Yv12Planar,
}

/// YUV quantization range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColorRange {
    Limited,
    Full,
}

/// One plane of a resolved buffer layout. Pitch and size are in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    pub pitch: u32,
    pub size: u32,
}

/// Translation of a generic buffer into the engine's native layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    pub native_format: NativeColorFormat,
    pub color_range: ColorRange,
    /// Pitch of plane 0 in bytes.
    pub pitch: u32,
    pub planes: SmallVec<[PlaneLayout; 3]>,
}

impl BufferConfig {
    /// Total byte size across planes.
    pub fn total_size(&self) -> u32 {
        self.planes.iter().map(|p| p.size).sum()
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }
}

/// The external format-resolver seam: buffer geometry + format code in, native
/// layout out. Implementations must be pure so results can be memoized by field
/// comparison.
pub trait FormatResolver {
    fn resolve(&self, width: u32, height: u32, format: PixelFormat) -> OverblitResult<BufferConfig>;
}

/// Linear-layout resolver: tightly packed planes, no tiling, limited range for
/// YUV sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearResolver;

impl FormatResolver for LinearResolver {
    fn resolve(&self, width: u32, height: u32, format: PixelFormat) -> OverblitResult<BufferConfig> {
        if width == 0 || height == 0 {
            return Err(OverblitError::config(format!(
                "cannot resolve layout for {width}x{height} buffer"
            )));
        }
        if format.is_yuv() && (width % 2 != 0 || height % 2 != 0) && format != PixelFormat::Yuyv {
            return Err(OverblitError::config(format!(
                "4:2:0 layout requires even dimensions, got {width}x{height}"
            )));
        }

        let mut planes: SmallVec<[PlaneLayout; 3]> = SmallVec::new();
        let native_format = match format {
            PixelFormat::Rgba8888 => {
                planes.push(PlaneLayout {
                    pitch: width * 4,
                    size: width * 4 * height,
                });
                NativeColorFormat::Rgba8888
            }
            PixelFormat::Rgbx8888 => {
                planes.push(PlaneLayout {
                    pitch: width * 4,
                    size: width * 4 * height,
                });
                NativeColorFormat::Rgbx8888
            }
            PixelFormat::Bgra8888 => {
                planes.push(PlaneLayout {
                    pitch: width * 4,
                    size: width * 4 * height,
                });
                NativeColorFormat::Bgra8888
            }
            PixelFormat::Rgb888 => {
                planes.push(PlaneLayout {
                    pitch: width * 3,
                    size: width * 3 * height,
                });
                NativeColorFormat::Rgb888
            }
            PixelFormat::Rgb565 => {
                planes.push(PlaneLayout {
                    pitch: width * 2,
                    size: width * 2 * height,
                });
                NativeColorFormat::Rgb565
            }
            PixelFormat::Yuyv => {
                planes.push(PlaneLayout {
                    pitch: width * 2,
                    size: width * 2 * height,
                });
                NativeColorFormat::YuyvPacked
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                planes.push(PlaneLayout {
                    pitch: width,
                    size: width * height,
                });
                planes.push(PlaneLayout {
                    pitch: width,
                    size: width * height / 2,
                });
                if format == PixelFormat::Nv12 {
                    NativeColorFormat::Nv12SemiPlanar
                } else {
                    NativeColorFormat::Nv21SemiPlanar
                }
            }
            PixelFormat::Yv12 => {
                planes.push(PlaneLayout {
                    pitch: width,
                    size: width * height,
                });
                planes.push(PlaneLayout {
                    pitch: width / 2,
                    size: width * height / 4,
                });
                planes.push(PlaneLayout {
                    pitch: width / 2,
                    size: width * height / 4,
                });
                NativeColorFormat::Yv12Planar
            }
        };

        Ok(BufferConfig {
            native_format,
            color_range: if format.is_yuv() {
                ColorRange::Limited
            } else {
                ColorRange::Full
            },
            pitch: planes[0].pitch,
            planes,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CacheKey {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// Memoized wrapper over a [`FormatResolver`].
///
/// The recording is invalidated by field comparison against the previous
/// geometry/format, never by time.
#[derive(Debug, Default)]
pub struct BufferConfigCache {
    recorded: Option<(CacheKey, BufferConfig)>,
    hits: u64,
    recomputes: u64,
}

impl BufferConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &mut self,
        resolver: &dyn FormatResolver,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> OverblitResult<BufferConfig> {
        let key = CacheKey {
            width,
            height,
            format,
        };
        if let Some((recorded_key, cfg)) = &self.recorded
            && *recorded_key == key
        {
            self.hits += 1;
            return Ok(cfg.clone());
        }

        let cfg = resolver.resolve(width, height, format)?;
        self.recomputes += 1;
        self.recorded = Some((key, cfg.clone()));
        Ok(cfg)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn recomputes(&self) -> u64 {
        self.recomputes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_layout_is_single_plane() {
        let cfg = LinearResolver.resolve(1920, 1080, PixelFormat::Rgba8888).unwrap();
        assert_eq!(cfg.plane_count(), 1);
        assert_eq!(cfg.pitch, 1920 * 4);
        assert_eq!(cfg.total_size(), 1920 * 1080 * 4);
        assert_eq!(cfg.color_range, ColorRange::Full);
    }

    #[test]
    fn nv12_layout_is_two_plane_3_halves() {
        let cfg = LinearResolver.resolve(64, 64, PixelFormat::Nv12).unwrap();
        assert_eq!(cfg.plane_count(), 2);
        assert_eq!(cfg.total_size(), 64 * 64 * 3 / 2);
        assert_eq!(cfg.color_range, ColorRange::Limited);
    }

    #[test]
    fn yv12_rejects_odd_dimensions() {
        assert!(LinearResolver.resolve(63, 64, PixelFormat::Yv12).is_err());
    }

    #[test]
    fn subsampling_axes() {
        assert_eq!(PixelFormat::Rgba8888.subsampling(), (false, false));
        assert_eq!(PixelFormat::Yuyv.subsampling(), (true, false));
        assert_eq!(PixelFormat::Nv12.subsampling(), (true, true));
    }

    #[test]
    fn cache_recomputes_only_on_field_change() {
        let mut cache = BufferConfigCache::new();
        let r = LinearResolver;
        cache.resolve(&r, 640, 480, PixelFormat::Rgba8888).unwrap();
        cache.resolve(&r, 640, 480, PixelFormat::Rgba8888).unwrap();
        assert_eq!(cache.recomputes(), 1);
        assert_eq!(cache.hits(), 1);

        cache.resolve(&r, 640, 480, PixelFormat::Nv12).unwrap();
        assert_eq!(cache.recomputes(), 2);
    }
}
