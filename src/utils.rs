use crate::error::{DrvError, DrvResult};

/// Rounds `val` up to `align`, which must be a power of two.
///
/// Returns `None` on overflow.
#[must_use]
pub const fn align_up(val: u64, align: u64) -> Option<u64> {
    match val.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Converts a raw device handle into a per-device array index.
///
/// # Errors
/// Returns `InvalidDevice` if the handle does not name one of the first `max_devices` devices.
pub fn device_index(handle: u32, max_devices: u32) -> DrvResult<usize> {
    if handle >= max_devices {
        log::error!("invalid device {handle}, max device num {max_devices}");
        return Err(DrvError::InvalidDevice(handle));
    }
    Ok(handle as usize)
}

/// Number of occupied slots in a ring of `capacity` slots with the given cursors.
#[must_use]
pub const fn ring_used(write: u32, read: u32, capacity: u32) -> u32 {
    (write + capacity - read) % capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_to_boundary() {
        assert_eq!(align_up(64, 512), Some(512));
        assert_eq!(align_up(512, 512), Some(512));
        assert_eq!(align_up(513, 512), Some(1024));
        assert_eq!(align_up(7, 1), Some(7));
        assert_eq!(align_up(u64::MAX, 512), None);
    }

    #[test]
    fn device_index_is_range_checked() {
        assert_eq!(device_index(0, 1).unwrap(), 0);
        assert!(matches!(device_index(1, 1), Err(DrvError::InvalidDevice(1))));
    }

    #[test]
    fn ring_used_wraps() {
        assert_eq!(ring_used(0, 0, 8), 0);
        assert_eq!(ring_used(5, 2, 8), 3);
        assert_eq!(ring_used(1, 6, 8), 3);
    }
}
