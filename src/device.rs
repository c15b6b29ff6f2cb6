use std::fmt::Debug;

/// Address of a byte in device memory.
///
/// The engine never dereferences these itself, it only offsets them and
/// hands them to kernels and to `Device::copy_host_to_device`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub fn from_raw(addr: u64) -> Self {
        Self(addr)
    }

    pub fn from_host<T>(ptr: *mut T) -> Self {
        Self(ptr as usize as u64)
    }

    pub fn addr(self) -> u64 {
        self.0
    }

    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }
}

/// Address of a host-visible mirror of a tensor, if the caller has one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostPtr(u64);

impl HostPtr {
    pub fn from_host<T>(ptr: *mut T) -> Self {
        Self(ptr as usize as u64)
    }

    pub fn addr(self) -> u64 {
        self.0
    }
}

/// A contiguous span of device memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceRegion {
    pub ptr: Option<DevicePtr>,
    pub size: u64,
}

impl DeviceRegion {
    pub fn new(ptr: DevicePtr, size: u64) -> Self {
        Self { ptr: Some(ptr), size }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Sub-region `[offset, offset + size)`, a null base stays null.
    pub fn slice(&self, offset: u64, size: u64) -> Self {
        Self { ptr: self.ptr.map(|ptr| ptr.offset(offset)), size }
    }

    /// Splits into `[0, at)` and `[at, size)`.
    pub fn split_at(&self, at: u64) -> (Self, Self) {
        let at = at.min(self.size);
        (self.slice(0, at), self.slice(at, self.size - at))
    }
}

/// A device that owns execution streams.
///
/// Streams are opaque to the engine, they are only ever passed through
/// to kernels and back to the device.
pub trait Device: Sized + 'static {
    type DeviceError: Debug;
    type Stream: Debug;

    /// Block until all work queued on `stream` has completed.
    fn synchronise(&self, stream: &Self::Stream) -> Result<(), Self::DeviceError>;

    /// Queue a copy of `src` into device memory at `dst` on `stream`.
    ///
    /// ### Safety
    /// `dst` must point at `src.len()` writable bytes of device memory,
    /// and `src` must stay alive until `stream` is synchronised.
    unsafe fn copy_host_to_device(
        &self,
        stream: &Self::Stream,
        dst: DevicePtr,
        src: &[u8],
    ) -> Result<(), Self::DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_split() {
        let region = DeviceRegion::new(DevicePtr::from_raw(1024), 100);
        let (lo, hi) = region.split_at(40);

        assert_eq!(lo, DeviceRegion::new(DevicePtr::from_raw(1024), 40));
        assert_eq!(hi, DeviceRegion::new(DevicePtr::from_raw(1064), 60));

        let (all, none) = region.split_at(200);
        assert_eq!(all.size, 100);
        assert_eq!(none.size, 0);
    }

    #[test]
    fn null_region_stays_null() {
        let (lo, hi) = DeviceRegion::empty().split_at(0);
        assert!(lo.ptr.is_none());
        assert!(hi.ptr.is_none());
    }
}
