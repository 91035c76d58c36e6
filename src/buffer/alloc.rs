//! The gralloc/ion allocation seam.
//!
//! Buffers handed to the blit engine must carry a real fd: the engine, the
//! overlay stage, and the fence accounting all key off it. [`SystemAllocator`]
//! backs handles with `memfd_create`, sized from the resolved linear layout.
//! Protected allocations take a distinct path (separate name class and a
//! `protected` marking on the handle) so secure content never aliases a normal
//! allocation.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::buffer::format::{FormatResolver, LinearResolver, PixelFormat};
use crate::buffer::queue::BufferQueueConfig;
use crate::foundation::error::{OverblitError, OverblitResult};

/// An allocated output buffer. Immutable once created; shared via `Arc`.
#[derive(Debug)]
pub struct BufferHandle {
    fd: OwnedFd,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Plane-0 pitch in bytes.
    pub pitch: u32,
    /// Total allocation size in bytes.
    pub size: u32,
    pub protected: bool,
    pub compression: bool,
}

impl BufferHandle {
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Whether this handle still satisfies `config` for the given protection
    /// class. A mismatch on any field forces reallocation at the next dequeue.
    pub fn matches(&self, config: &BufferQueueConfig, protected: bool) -> bool {
        self.width == config.width
            && self.height == config.height
            && self.format == config.format
            && self.protected == protected
            && self.compression == config.compression
            && (config.size == 0 || self.size >= config.size)
    }
}

/// Allocation boundary between the queue and the platform allocator.
pub trait BufferAllocator: Send + Sync {
    fn allocate(
        &self,
        config: &BufferQueueConfig,
        protected: bool,
    ) -> OverblitResult<Arc<BufferHandle>>;
}

/// memfd-backed allocator with a linear layout.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    resolver: LinearResolver,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferAllocator for SystemAllocator {
    fn allocate(
        &self,
        config: &BufferQueueConfig,
        protected: bool,
    ) -> OverblitResult<Arc<BufferHandle>> {
        let layout = self
            .resolver
            .resolve(config.width, config.height, config.format)?;
        let size = layout.total_size().max(config.size);

        let name = if protected {
            "overblit:secure"
        } else {
            "overblit:pool"
        };
        let fd = memfd(name, size as u64).map_err(|e| {
            OverblitError::allocation(format!(
                "memfd allocation of {size} bytes for {}x{} {:?} failed: {e}",
                config.width, config.height, config.format
            ))
        })?;

        tracing::debug!(
            target: "overblit::alloc",
            "allocated {}x{} {:?} ({} bytes, protected={protected}) as fd {}",
            config.width,
            config.height,
            config.format,
            size,
            fd.as_raw_fd()
        );

        Ok(Arc::new(BufferHandle {
            fd,
            width: config.width,
            height: config.height,
            format: config.format,
            pitch: layout.pitch,
            size,
            protected,
            compression: config.compression,
        }))
    }
}

fn memfd(name: &str, size: u64) -> io::Result<OwnedFd> {
    let c_name = CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    // Safety: c_name outlives the call; the returned fd is adopted once.
    let fd = unsafe { libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: fd is open and unowned.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    // Safety: sizing an owned memfd.
    let rc = unsafe { libc::ftruncate(owned.as_raw_fd(), size as libc::off_t) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32) -> BufferQueueConfig {
        BufferQueueConfig {
            width,
            height,
            format: PixelFormat::Rgba8888,
            size: 0,
            protect: false,
            compression: false,
        }
    }

    #[test]
    fn allocation_carries_a_real_fd_and_layout() {
        let alloc = SystemAllocator::new();
        let handle = alloc.allocate(&config(64, 32), false).unwrap();
        assert!(handle.raw_fd() >= 0);
        assert_eq!(handle.pitch, 64 * 4);
        assert_eq!(handle.size, 64 * 32 * 4);
        assert!(!handle.protected);
    }

    #[test]
    fn explicit_size_override_wins_when_larger() {
        let alloc = SystemAllocator::new();
        let mut cfg = config(8, 8);
        cfg.size = 4096;
        let handle = alloc.allocate(&cfg, false).unwrap();
        assert_eq!(handle.size, 4096);
    }

    #[test]
    fn mismatch_detection_covers_every_field() {
        let alloc = SystemAllocator::new();
        let cfg = config(64, 32);
        let handle = alloc.allocate(&cfg, false).unwrap();
        assert!(handle.matches(&cfg, false));
        assert!(!handle.matches(&cfg, true));

        let mut wider = cfg.clone();
        wider.width = 128;
        assert!(!handle.matches(&wider, false));

        let mut compressed = cfg.clone();
        compressed.compression = true;
        assert!(!handle.matches(&compressed, false));
    }

    #[test]
    fn zero_dimension_is_a_config_error() {
        let alloc = SystemAllocator::new();
        let cfg = config(0, 32);
        assert!(matches!(
            alloc.allocate(&cfg, false),
            Err(OverblitError::Config(_))
        ));
    }
}
