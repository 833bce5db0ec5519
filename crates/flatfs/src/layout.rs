use serde::{Deserialize, Serialize};

use crate::MAX_FILE_BLOCKS;

/// Serialized size of one descriptor.
pub const DESCRIPTOR_BYTES: usize = 16;

/// Size of a fresh descriptor; replaced by the real byte count on first write.
pub const SIZE_SENTINEL: u32 = 1;

/// Four little-endian 32-bit words: the file size in bytes, then up to three
/// data-block numbers (0 = slot unused).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Descriptor {
    pub size: u32,
    pub blocks: [u32; MAX_FILE_BLOCKS],
}

impl Descriptor {
    pub fn new(first_block: u32) -> Self {
        Self {
            size: SIZE_SENTINEL,
            blocks: [first_block, 0, 0],
        }
    }

    /// A descriptor is in use iff its size or any block slot is non-zero.
    pub fn is_free(&self) -> bool {
        self.size == 0 && self.blocks.iter().all(|&b| b == 0)
    }

    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_BYTES] {
        let mut bytes = [0u8; DESCRIPTOR_BYTES];
        let config = bincode::config::standard().with_fixed_int_encoding();
        bincode::serde::encode_into_slice(self, &mut bytes, config)
            .expect("descriptor encodes to 16 bytes");
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let config = bincode::config::standard().with_fixed_int_encoding();
        let (descriptor, _) = bincode::serde::decode_from_slice(bytes, config)
            .expect("descriptor decodes from 16 bytes");
        descriptor
    }
}

/// Locate descriptor `index` in the cache: `(block, byte offset)`.
pub fn descriptor_location(index: usize) -> (usize, usize) {
    (
        1 + index / crate::DESCRIPTORS_PER_BLOCK,
        (index % crate::DESCRIPTORS_PER_BLOCK) * DESCRIPTOR_BYTES,
    )
}
