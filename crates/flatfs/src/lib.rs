pub mod directory;
pub mod disk;
pub mod error;
pub mod fs;
pub mod layout;

pub use disk::Ldisk;
pub use error::FsError;
pub use fs::{FileSystem, OftSlot};
pub use layout::Descriptor;

pub const BLOCK_SIZE: usize = 64;
pub const NUM_BLOCKS: usize = 64;
/// Blocks mirrored by the cache: the bitmap plus the descriptor table.
pub const CACHE_BLOCKS: usize = 7;
/// First block available for file data; everything below is reserved.
pub const DATA_START: usize = 7;

pub const DESCRIPTORS_PER_BLOCK: usize = 4;
pub const NUM_DESCRIPTORS: usize = (CACHE_BLOCKS - 1) * DESCRIPTORS_PER_BLOCK;
/// Descriptor index of the root directory.
pub const DIRECTORY_DESCRIPTOR: usize = 0;

/// Data blocks a single file may own.
pub const MAX_FILE_BLOCKS: usize = 3;
pub const MAX_FILE_SIZE: u32 = (MAX_FILE_BLOCKS * BLOCK_SIZE) as u32;
pub const MAX_NAME_LEN: usize = 4;

/// Open-file table slots; slot 0 is pinned to the directory.
pub const OFT_SIZE: usize = 4;

/// One disk block.
pub type Block = [u8; BLOCK_SIZE];
