use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info};

use crate::error::FsError;
use crate::layout::{descriptor_location, Descriptor, DESCRIPTOR_BYTES};
use crate::{Block, BLOCK_SIZE, CACHE_BLOCKS, DATA_START, NUM_BLOCKS, NUM_DESCRIPTORS};

/// Bits per block; one image line is this many `0`/`1` characters.
const BLOCK_BITS: usize = BLOCK_SIZE * 8;

/// The logical disk: the physical block array plus the in-memory cache of
/// blocks 0..=6 through which all bitmap and descriptor mutations go.
pub struct Ldisk {
    blocks: [Block; NUM_BLOCKS],
    cache: [Block; CACHE_BLOCKS],
}

impl Ldisk {
    fn blank() -> Self {
        Self {
            blocks: [[0; BLOCK_SIZE]; NUM_BLOCKS],
            cache: [[0; BLOCK_SIZE]; CACHE_BLOCKS],
        }
    }

    /// A freshly formatted disk with the directory holding its three blocks.
    pub fn formatted() -> Self {
        let mut disk = Self::blank();

        for block in 0..DATA_START {
            disk.set_bit(block);
        }

        let mut directory = Descriptor::new(
            disk.find_free_block()
                .expect("a blank disk has free data blocks"),
        );
        for slot in directory.blocks.iter_mut().skip(1) {
            *slot = disk
                .find_free_block()
                .expect("a blank disk has free data blocks");
        }
        disk.put_descriptor(crate::DIRECTORY_DESCRIPTOR, &directory);

        disk.write_cache();
        info!(
            "formatted disk: {} blocks of {} bytes, directory at {:?}",
            NUM_BLOCKS, BLOCK_SIZE, directory.blocks
        );
        disk
    }

    // --- block I/O (physical array, not the cache) ---

    pub fn read_block(&self, index: usize) -> Block {
        self.blocks[index]
    }

    pub fn write_block(&mut self, index: usize, data: &Block) {
        self.blocks[index] = *data;
    }

    // --- bitmap ---

    fn set_bit(&mut self, block: usize) {
        self.cache[0][block / 8] |= 1 << (block % 8);
    }

    fn clear_bit(&mut self, block: usize) {
        self.cache[0][block / 8] &= !(1 << (block % 8));
    }

    pub fn block_in_use(&self, block: usize) -> bool {
        self.cache[0][block / 8] >> (block % 8) & 1 == 1
    }

    /// Claim the first free data block and return its number.
    pub fn find_free_block(&mut self) -> Result<u32, FsError> {
        for block in DATA_START..NUM_BLOCKS {
            if !self.block_in_use(block) {
                self.set_bit(block);
                debug!("allocated block {block}");
                return Ok(block as u32);
            }
        }
        Err(FsError::DiskFull)
    }

    pub fn release_block(&mut self, block: u32) {
        debug!("released block {block}");
        self.clear_bit(block as usize);
    }

    // --- descriptor table ---

    pub fn descriptor(&self, index: usize) -> Descriptor {
        let (block, offset) = descriptor_location(index);
        Descriptor::from_bytes(&self.cache[block][offset..offset + DESCRIPTOR_BYTES])
    }

    pub(crate) fn put_descriptor(&mut self, index: usize, descriptor: &Descriptor) {
        let (block, offset) = descriptor_location(index);
        self.cache[block][offset..offset + DESCRIPTOR_BYTES].copy_from_slice(&descriptor.to_bytes());
    }

    /// Create a descriptor in the lowest free slot, pointing at `first_block`.
    pub fn init_descriptor(&mut self, first_block: u32) -> Option<usize> {
        for index in 0..NUM_DESCRIPTORS {
            if self.descriptor(index).size == 0 {
                self.put_descriptor(index, &Descriptor::new(first_block));
                debug!("created descriptor {index} -> block {first_block}");
                return Some(index);
            }
        }
        None
    }

    pub fn destroy_descriptor(&mut self, index: usize) {
        debug!("destroyed descriptor {index}");
        self.put_descriptor(index, &Descriptor::default());
    }

    /// Install `new_block` into the first empty block slot of `index`.
    pub fn update_descriptor_blocks(&mut self, index: usize, new_block: u32) {
        let mut descriptor = self.descriptor(index);
        if let Some(slot) = descriptor.blocks.iter_mut().find(|slot| **slot == 0) {
            *slot = new_block;
            self.put_descriptor(index, &descriptor);
        }
    }

    pub fn update_descriptor_size(&mut self, index: usize, size: u32) {
        let mut descriptor = self.descriptor(index);
        descriptor.size = size;
        self.put_descriptor(index, &descriptor);
    }

    // --- cache discipline ---

    fn read_cache(&mut self) {
        self.cache.copy_from_slice(&self.blocks[..CACHE_BLOCKS]);
    }

    fn write_cache(&mut self) {
        self.blocks[..CACHE_BLOCKS].copy_from_slice(&self.cache);
    }

    // --- disk image ---

    /// Flush the cache and write one line of 512 bits per block, bit 0 first.
    pub fn write_image<W: Write>(&mut self, mut writer: W) -> Result<(), FsError> {
        self.write_cache();
        for block in &self.blocks {
            writeln!(writer, "{}", block_to_line(block))?;
        }
        Ok(())
    }

    pub fn read_image<R: BufRead>(reader: R) -> Result<Self, FsError> {
        let mut disk = Self::blank();
        let mut count = 0;
        for (index, line) in reader.lines().enumerate() {
            if index >= NUM_BLOCKS {
                return Err(FsError::BadImage(format!(
                    "more than {NUM_BLOCKS} block lines"
                )));
            }
            disk.blocks[index] = line_to_block(&line?)?;
            count += 1;
        }
        if count != NUM_BLOCKS {
            return Err(FsError::BadImage(format!(
                "expected {NUM_BLOCKS} block lines, found {count}"
            )));
        }
        disk.read_cache();
        Ok(disk)
    }

    pub fn save_image(&mut self, path: &Path) -> Result<(), FsError> {
        let file = File::create(path)?;
        self.write_image(BufWriter::new(file))?;
        info!("saved disk image to {}", path.display());
        Ok(())
    }

    pub fn load_image(path: &Path) -> Result<Self, FsError> {
        let file = File::open(path)?;
        let disk = Self::read_image(BufReader::new(file))?;
        info!("restored disk image from {}", path.display());
        Ok(disk)
    }

    // --- debug dumps ---

    // Dump lines print the most significant bit first (bit 511 down to
    // bit 0), unlike image lines, which are reversed into bit-index order.

    pub fn cache_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.cache.iter().map(block_to_dump_line)
    }

    pub fn disk_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.blocks.iter().map(block_to_dump_line)
    }
}

fn block_to_line(block: &Block) -> String {
    let mut line = String::with_capacity(BLOCK_BITS);
    for byte in block {
        for bit in 0..8 {
            line.push(if byte >> bit & 1 == 1 { '1' } else { '0' });
        }
    }
    line
}

fn block_to_dump_line(block: &Block) -> String {
    block_to_line(block).chars().rev().collect()
}

fn line_to_block(line: &str) -> Result<Block, FsError> {
    let line = line.trim_end();
    if line.len() != BLOCK_BITS {
        return Err(FsError::BadImage(format!(
            "block line is {} characters, expected {BLOCK_BITS}",
            line.len()
        )));
    }
    let mut block = [0u8; BLOCK_SIZE];
    for (index, ch) in line.bytes().enumerate() {
        match ch {
            b'0' => {}
            b'1' => block[index / 8] |= 1 << (index % 8),
            _ => {
                return Err(FsError::BadImage(format!(
                    "unexpected character {:?} in block line",
                    ch as char
                )))
            }
        }
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SIZE_SENTINEL;
    use crate::DIRECTORY_DESCRIPTOR;

    #[test]
    fn formatted_disk_reserves_metadata_and_directory_blocks() {
        let disk = Ldisk::formatted();

        for block in 0..DATA_START + 3 {
            assert!(disk.block_in_use(block), "block {block} should be in use");
        }
        for block in DATA_START + 3..NUM_BLOCKS {
            assert!(!disk.block_in_use(block), "block {block} should be free");
        }

        let directory = disk.descriptor(DIRECTORY_DESCRIPTOR);
        assert_eq!(directory.size, SIZE_SENTINEL);
        assert_eq!(directory.blocks, [7, 8, 9]);
    }

    #[test]
    fn allocates_lowest_free_block_and_reuses_released_ones() {
        let mut disk = Ldisk::formatted();

        assert_eq!(disk.find_free_block().unwrap(), 10);
        assert_eq!(disk.find_free_block().unwrap(), 11);

        disk.release_block(10);
        assert_eq!(disk.find_free_block().unwrap(), 10);
    }

    #[test]
    fn disk_exhaustion_is_an_error() {
        let mut disk = Ldisk::formatted();
        while disk.find_free_block().is_ok() {}
        assert!(matches!(disk.find_free_block(), Err(FsError::DiskFull)));
    }

    #[test]
    fn descriptors_fill_lowest_slot_first_and_run_out() {
        let mut disk = Ldisk::formatted();

        // Slot 0 is the directory; user descriptors start at 1.
        assert_eq!(disk.init_descriptor(10), Some(1));
        assert_eq!(disk.init_descriptor(11), Some(2));

        disk.destroy_descriptor(1);
        assert_eq!(disk.init_descriptor(12), Some(1));

        for _ in 0..NUM_DESCRIPTORS {
            disk.init_descriptor(13);
        }
        assert_eq!(disk.init_descriptor(14), None);
    }

    #[test]
    fn update_descriptor_blocks_fills_first_empty_slot() {
        let mut disk = Ldisk::formatted();
        let index = disk.init_descriptor(10).unwrap();

        disk.update_descriptor_blocks(index, 11);
        disk.update_descriptor_blocks(index, 12);
        assert_eq!(disk.descriptor(index).blocks, [10, 11, 12]);

        // All slots occupied: a further update is a no-op.
        disk.update_descriptor_blocks(index, 13);
        assert_eq!(disk.descriptor(index).blocks, [10, 11, 12]);
    }

    #[test]
    fn image_round_trip_is_bit_exact() {
        let mut disk = Ldisk::formatted();
        let block_10 = {
            let mut data = [0u8; BLOCK_SIZE];
            data[0] = b'x';
            data[63] = 0xA5;
            data
        };
        disk.write_block(10, &block_10);

        let mut image = Vec::new();
        disk.write_image(&mut image).unwrap();

        let lines: Vec<&str> = std::str::from_utf8(&image).unwrap().lines().collect();
        assert_eq!(lines.len(), NUM_BLOCKS);
        assert!(lines.iter().all(|line| line.len() == BLOCK_BITS));

        // Bitmap line: bit i tracks block i, LSB-first within each byte.
        let bitmap = lines[0].as_bytes();
        assert_eq!(&bitmap[..11], b"11111111110");

        let restored = Ldisk::read_image(&image[..]).unwrap();
        assert_eq!(restored.read_block(10), block_10);
        assert_eq!(
            restored.descriptor(DIRECTORY_DESCRIPTOR),
            disk.descriptor(DIRECTORY_DESCRIPTOR)
        );

        let mut image_again = Vec::new();
        let mut restored = restored;
        restored.write_image(&mut image_again).unwrap();
        assert_eq!(image, image_again);
    }

    #[test]
    fn integer_bits_serialize_least_significant_first() {
        let mut disk = Ldisk::formatted();
        disk.update_descriptor_size(DIRECTORY_DESCRIPTOR, 3);

        let mut image = Vec::new();
        disk.write_image(&mut image).unwrap();
        let lines: Vec<&str> = std::str::from_utf8(&image).unwrap().lines().collect();

        // Descriptor 0's size word sits at the head of block 1: 3 = 0b11.
        assert_eq!(&lines[1][..4], "1100");
    }

    #[test]
    fn dump_lines_run_most_significant_bit_first() {
        let disk = Ldisk::formatted();

        // Blocks 0..=9 are in use, so the bitmap's low ten bits are set and
        // land at the tail of the dump line.
        let bitmap = disk.cache_lines().next().unwrap();
        assert_eq!(bitmap, format!("{}{}", "0".repeat(502), "1".repeat(10)));

        let mut disk = disk;
        let mut image = Vec::new();
        disk.write_image(&mut image).unwrap();
        let first_line = std::str::from_utf8(&image).unwrap().lines().next().unwrap();
        assert_eq!(bitmap, first_line.chars().rev().collect::<String>());
    }

    #[test]
    fn malformed_images_are_rejected() {
        assert!(matches!(
            Ldisk::read_image(&b"0101\n"[..]),
            Err(FsError::BadImage(_))
        ));

        let mut image = Vec::new();
        Ldisk::formatted().write_image(&mut image).unwrap();
        image[3] = b'2';
        assert!(matches!(
            Ldisk::read_image(&image[..]),
            Err(FsError::BadImage(_))
        ));
    }
}
