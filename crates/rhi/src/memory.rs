//! Device memory type selection.
//!
//! Buffers and images report a bitmask of memory types they can live in; the
//! caller adds the property flags it needs (device-local, host-visible, ...).
//! [`find_memory_type`] resolves the two into a concrete memory type index.

use ash::vk;

use crate::error::{RhiError, RhiResult};

/// Memory placement requested for a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Fast device memory, not mappable. Filled through a staging copy.
    DeviceLocal,
    /// Mappable memory that needs no explicit flush.
    HostVisible,
}

impl MemoryLocation {
    /// Property flags a memory type must have to serve this location.
    pub fn property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryLocation::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryLocation::HostVisible => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }
}

/// Finds the lowest memory type index allowed by `type_bits` whose property
/// flags contain all of `flags`.
///
/// # Errors
///
/// Returns [`RhiError::NoMatchingMemoryType`] when no type qualifies.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _)| index as u32)
        .ok_or(RhiError::NoMatchingMemoryType { type_bits, flags })
}

/// Builds a memory properties struct from a list of memory type flags, all in heap 0.
pub fn memory_properties_from_flags(
    types: &[vk::MemoryPropertyFlags],
) -> vk::PhysicalDeviceMemoryProperties {
    let mut properties = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: types.len().min(vk::MAX_MEMORY_TYPES) as u32,
        memory_heap_count: 1,
        ..Default::default()
    };
    for (slot, flags) in properties.memory_types.iter_mut().zip(types) {
        *slot = vk::MemoryType {
            property_flags: *flags,
            heap_index: 0,
        };
    }
    properties.memory_heaps[0] = vk::MemoryHeap {
        size: 256 * 1024 * 1024,
        flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
    };
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> vk::PhysicalDeviceMemoryProperties {
        memory_properties_from_flags(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ])
    }

    #[test]
    fn test_find_memory_type_lowest_index() {
        let props = props();
        let host = MemoryLocation::HostVisible.property_flags();
        assert_eq!(find_memory_type(&props, 0b1111, host).unwrap(), 1);
        assert_eq!(
            find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn test_find_memory_type_respects_mask() {
        let props = props();
        let host = MemoryLocation::HostVisible.property_flags();
        // Type 1 masked out, type 2 is a superset of the request.
        assert_eq!(find_memory_type(&props, 0b1100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b1000, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            3
        );
    }

    #[test]
    fn test_find_memory_type_superset_required() {
        let props = props();
        let flags = vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(find_memory_type(&props, u32::MAX, flags).unwrap(), 3);
    }

    #[test]
    fn test_find_memory_type_no_match_is_error() {
        let props = props();
        let err = find_memory_type(&props, 0b0001, MemoryLocation::HostVisible.property_flags())
            .unwrap_err();
        assert!(matches!(
            err,
            RhiError::NoMatchingMemoryType { type_bits: 0b0001, .. }
        ));

        // Never falls back to index 0 for an empty mask.
        assert!(find_memory_type(&props, 0, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn test_find_memory_type_ignores_bits_past_count() {
        let props = props();
        assert!(
            find_memory_type(&props, 1 << 5, vk::MemoryPropertyFlags::empty()).is_err()
        );
    }
}
