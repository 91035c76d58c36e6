//! Move-only completion fences.
//!
//! A [`Fence`] owns exactly one fd referring to a one-shot completion signal.
//! Ownership transfers by move (producer→queue, queue→consumer, engine→next
//! stage); the destructor closes the fd exactly once, so the leak/double-close
//! class cannot be expressed. Duplication is explicit via [`Fence::dup`]: a
//! duplicate is an independent handle to the same underlying signal.
//!
//! The software engines in this crate back fences with `eventfd`, which gives
//! every duplicate the same non-consuming, idempotent readiness query.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

/// An owned handle to a one-shot completion signal.
#[derive(Debug)]
pub struct Fence(OwnedFd);

impl Fence {
    /// Wrap an already-owned fd.
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self(fd)
    }

    /// Adopt a raw fd crossing the platform boundary.
    ///
    /// A negative fd means "no fence" and maps to `None`, matching the `-1`
    /// convention on the HAL surface.
    ///
    /// # Safety
    ///
    /// A non-negative `fd` must be open and owned by nobody else; the returned
    /// fence will close it.
    pub unsafe fn from_raw(fd: RawFd) -> Option<Self> {
        if fd < 0 {
            return None;
        }
        // Safety: forwarded from the caller contract.
        Some(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Create an independent handle to the same signal.
    pub fn dup(&self) -> io::Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }

    /// Non-blocking, non-consuming readiness query.
    pub fn is_signalled(&self) -> bool {
        matches!(self.poll_ready(0), Ok(true))
    }

    /// Block until the fence signals. No timeout exists inside this core; an
    /// external watchdog bounds hardware hangs, not cooperative suspension.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            match self.poll_ready(-1) {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Surrender ownership of the fd (for handing across the HAL boundary).
    pub fn into_raw(self) -> RawFd {
        self.0.into_raw_fd()
    }

    fn poll_ready(&self, timeout_ms: libc::c_int) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.0.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // Safety: pfd is a valid pollfd for the lifetime of the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc > 0 && (pfd.revents & libc::POLLIN) != 0)
    }
}

impl AsRawFd for Fence {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Write-side of a software fence. Held by the engine that will complete the
/// operation; dropping it unsignalled abandons the fence (waiters keep waiting,
/// readiness stays false), which mirrors a cancelled hardware job.
#[derive(Debug)]
pub struct FenceSignaller(OwnedFd);

impl FenceSignaller {
    /// Fire the signal. Idempotent: later calls leave the fence signalled.
    pub fn signal(&self) -> io::Result<()> {
        let value: u64 = 1;
        // Safety: writes 8 bytes from a live stack value to an owned eventfd.
        let rc = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                (&raw const value).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Combine two optional fences into one that signals when both have.
///
/// Zero or one input passes straight through without a new fd.
pub fn merge(a: Option<Fence>, b: Option<Fence>) -> io::Result<Option<Fence>> {
    match (a, b) {
        (None, None) => Ok(None),
        (Some(f), None) | (None, Some(f)) => Ok(Some(f)),
        (Some(a), Some(b)) => {
            let (fence, signaller) = fence_pair()?;
            std::thread::spawn(move || {
                let _ = a.wait();
                let _ = b.wait();
                let _ = signaller.signal();
            });
            Ok(Some(fence))
        }
    }
}

/// Create an unsignalled fence plus its signaller.
pub fn fence_pair() -> io::Result<(Fence, FenceSignaller)> {
    let fd = eventfd(0)?;
    let signaller = FenceSignaller(fd.try_clone()?);
    Ok((Fence(fd), signaller))
}

/// Create a fence that is already signalled.
pub fn signalled_fence() -> io::Result<Fence> {
    Ok(Fence(eventfd(1)?))
}

fn eventfd(initial: libc::c_uint) -> io::Result<OwnedFd> {
    // Safety: plain syscall; the returned fd is adopted exactly once below.
    let fd = unsafe { libc::eventfd(initial, libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: fd is open and unowned.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsignalled_then_signalled() {
        let (fence, signaller) = fence_pair().unwrap();
        assert!(!fence.is_signalled());
        signaller.signal().unwrap();
        assert!(fence.is_signalled());
        // Query is non-consuming and idempotent.
        assert!(fence.is_signalled());
        fence.wait().unwrap();
    }

    #[test]
    fn dup_observes_the_same_signal() {
        let (fence, signaller) = fence_pair().unwrap();
        let twin = fence.dup().unwrap();
        drop(fence);
        assert!(!twin.is_signalled());
        signaller.signal().unwrap();
        assert!(twin.is_signalled());
    }

    #[test]
    fn pre_signalled_fence_is_ready() {
        let fence = signalled_fence().unwrap();
        assert!(fence.is_signalled());
    }

    #[test]
    fn merged_fence_needs_both_inputs() {
        let (a, sig_a) = fence_pair().unwrap();
        let (b, sig_b) = fence_pair().unwrap();
        let merged = merge(Some(a), Some(b)).unwrap().unwrap();
        sig_a.signal().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!merged.is_signalled());
        sig_b.signal().unwrap();
        merged.wait().unwrap();
    }

    #[test]
    fn merge_passes_single_fence_through() {
        let fence = signalled_fence().unwrap();
        let out = merge(Some(fence), None).unwrap().unwrap();
        assert!(out.is_signalled());
        assert!(merge(None, None).unwrap().is_none());
    }

    #[test]
    fn negative_raw_fd_means_no_fence() {
        // Safety: -1 never reaches the owning branch.
        assert!(unsafe { Fence::from_raw(-1) }.is_none());
    }
}
