use std::path::Path;

use log::debug;

use crate::directory::{self, RawEntry};
use crate::disk::Ldisk;
use crate::error::FsError;
use crate::layout::SIZE_SENTINEL;
use crate::{
    Block, BLOCK_SIZE, DIRECTORY_DESCRIPTOR, MAX_FILE_BLOCKS, MAX_FILE_SIZE, NUM_DESCRIPTORS,
    OFT_SIZE,
};

#[derive(Debug, Clone)]
pub enum OftSlot {
    Empty,
    Open {
        /// Descriptor index of the open file.
        desc: usize,
        /// Disk block currently resident in the buffer.
        block: u32,
        buffer: Block,
        /// Offset within the buffer of the next read or write.
        cursor: usize,
    },
}

/// The open-file table and the lifecycle operations. The directory is an
/// ordinary file pinned to descriptor 0 and slot 0; user files get 1..=3.
pub struct FileSystem {
    disk: Ldisk,
    oft: [OftSlot; OFT_SIZE],
}

impl FileSystem {
    /// Mount a freshly formatted disk.
    pub fn format() -> Self {
        Self::with_disk(Ldisk::formatted())
    }

    /// Mount a disk restored from a saved image.
    pub fn restore(path: &Path) -> Result<Self, FsError> {
        Ok(Self::with_disk(Ldisk::load_image(path)?))
    }

    fn with_disk(disk: Ldisk) -> Self {
        let mut fs = Self {
            disk,
            oft: [
                OftSlot::Empty,
                OftSlot::Empty,
                OftSlot::Empty,
                OftSlot::Empty,
            ],
        };
        let directory = fs.disk.descriptor(DIRECTORY_DESCRIPTOR);
        let block = directory.blocks[0];
        fs.oft[0] = OftSlot::Open {
            desc: DIRECTORY_DESCRIPTOR,
            block,
            buffer: fs.disk.read_block(block as usize),
            cursor: 0,
        };
        fs
    }

    // --- lifecycle operations ---

    pub fn create(&mut self, name: &str) -> Result<(), FsError> {
        if !directory::is_valid_name(name) {
            return Err(FsError::InvalidName);
        }
        if self.find_entry(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let block = self.disk.find_free_block()?;
        let Some(desc) = self.disk.init_descriptor(block) else {
            self.disk.release_block(block);
            return Err(FsError::NoFreeDescriptor);
        };
        if let Err(err) = self.insert_entry(name, desc) {
            self.disk.destroy_descriptor(desc);
            self.disk.release_block(block);
            return Err(err);
        }

        debug!("created {name:?} -> descriptor {desc}");
        Ok(())
    }

    pub fn destroy(&mut self, name: &str) -> Result<(), FsError> {
        let entry = self.find_entry(name).ok_or(FsError::NotFound)?;
        if entry.desc == DIRECTORY_DESCRIPTOR || entry.desc >= NUM_DESCRIPTORS {
            return Err(FsError::NotFound);
        }

        if let Some(slot) = self.slot_of(entry.desc) {
            self.close(slot)?;
        }

        self.remove_entry(&entry);

        let descriptor = self.disk.descriptor(entry.desc);
        for &block in descriptor.blocks.iter().filter(|&&block| block != 0) {
            self.disk.release_block(block);
        }
        self.disk.destroy_descriptor(entry.desc);

        debug!("destroyed {name:?} (descriptor {})", entry.desc);
        Ok(())
    }

    pub fn open(&mut self, name: &str) -> Result<usize, FsError> {
        let entry = self.find_entry(name).ok_or(FsError::NotFound)?;
        if entry.desc == DIRECTORY_DESCRIPTOR || entry.desc >= NUM_DESCRIPTORS {
            return Err(FsError::NotFound);
        }
        if self.slot_of(entry.desc).is_some() {
            return Err(FsError::AlreadyOpen);
        }
        let slot = (1..OFT_SIZE)
            .find(|&slot| matches!(self.oft[slot], OftSlot::Empty))
            .ok_or(FsError::OftFull)?;

        let descriptor = self.disk.descriptor(entry.desc);
        let block = descriptor.blocks[0];
        self.oft[slot] = OftSlot::Open {
            desc: entry.desc,
            block,
            buffer: self.disk.read_block(block as usize),
            cursor: 0,
        };

        debug!("opened {name:?} in slot {slot}");
        Ok(slot)
    }

    pub fn close(&mut self, slot: usize) -> Result<(), FsError> {
        check_user_slot(slot)?;
        let OftSlot::Open { block, buffer, .. } = &self.oft[slot] else {
            return Err(FsError::BadSlot(slot));
        };
        let (block, buffer) = (*block, *buffer);
        self.disk.write_block(block as usize, &buffer);
        self.oft[slot] = OftSlot::Empty;
        Ok(())
    }

    /// Read up to `count` logical bytes from the current position, returning
    /// the bytes and the number of positions traversed.
    pub fn read(&mut self, slot: usize, count: usize) -> Result<(Vec<u8>, usize), FsError> {
        check_user_slot(slot)?;
        let OftSlot::Open {
            desc,
            block,
            buffer,
            cursor,
        } = &mut self.oft[slot]
        else {
            return Err(FsError::BadSlot(slot));
        };
        let descriptor = self.disk.descriptor(*desc);
        let mut position = descriptor
            .blocks
            .iter()
            .position(|&b| b == *block)
            .unwrap_or(0);

        let mut data = Vec::new();
        let mut traversed = 0;
        while traversed < count {
            if *cursor == BLOCK_SIZE {
                // The buffer was not modified on this path; no flush needed.
                if position + 1 >= MAX_FILE_BLOCKS {
                    break;
                }
                let next = descriptor.blocks[position + 1];
                if next == 0 {
                    break;
                }
                *buffer = self.disk.read_block(next as usize);
                *block = next;
                *cursor = 0;
                position += 1;
            }
            let byte = buffer[*cursor];
            *cursor += 1;
            traversed += 1;
            // Zero bytes are holes: skipped in the output, traversed anyway.
            if byte != 0 {
                data.push(byte);
            }
        }

        Ok((data, traversed))
    }

    /// Write `data` at the current position, growing the file block by block
    /// up to the three-block cap. Returns the bytes actually written.
    pub fn write(&mut self, slot: usize, data: &[u8]) -> Result<usize, FsError> {
        check_user_slot(slot)?;
        let OftSlot::Open {
            desc,
            block,
            buffer,
            cursor,
        } = &mut self.oft[slot]
        else {
            return Err(FsError::BadSlot(slot));
        };
        let desc = *desc;
        let mut descriptor = self.disk.descriptor(desc);
        let mut position = descriptor
            .blocks
            .iter()
            .position(|&b| b == *block)
            .unwrap_or(0);

        let mut written: usize = 0;
        for &byte in data {
            if *cursor == BLOCK_SIZE {
                self.disk.write_block(*block as usize, buffer);
                if position + 1 >= MAX_FILE_BLOCKS {
                    break;
                }
                let mut next = descriptor.blocks[position + 1];
                if next == 0 {
                    // Out of free blocks: stop and keep what already landed.
                    let Ok(fresh) = self.disk.find_free_block() else {
                        break;
                    };
                    self.disk.update_descriptor_blocks(desc, fresh);
                    descriptor.blocks[position + 1] = fresh;
                    next = fresh;
                }
                *buffer = self.disk.read_block(next as usize);
                *block = next;
                *cursor = 0;
                position += 1;
            }
            buffer[*cursor] = byte;
            *cursor += 1;
            written += 1;
        }
        self.disk.write_block(*block as usize, buffer);

        if written > 0 {
            let size = self.disk.descriptor(desc).size;
            let size = if size == SIZE_SENTINEL {
                written as u32
            } else {
                size + written as u32
            };
            self.disk.update_descriptor_size(desc, size.min(MAX_FILE_SIZE));
        }

        Ok(written)
    }

    /// Move the position; seeking to or past the recorded size is an error.
    pub fn seek(&mut self, slot: usize, position: usize) -> Result<usize, FsError> {
        check_user_slot(slot)?;
        let OftSlot::Open {
            desc,
            block,
            buffer,
            cursor,
        } = &mut self.oft[slot]
        else {
            return Err(FsError::BadSlot(slot));
        };
        let descriptor = self.disk.descriptor(*desc);
        if position >= descriptor.size as usize {
            return Err(FsError::SeekOutOfBounds(position));
        }

        let target = descriptor.blocks[position / BLOCK_SIZE];
        if target == 0 {
            // The file never grew this far; leave the slot untouched.
            return Ok(*cursor);
        }
        if target != *block {
            // Flush the outgoing buffer before another block replaces it.
            self.disk.write_block(*block as usize, buffer);
            *buffer = self.disk.read_block(target as usize);
            *block = target;
        }
        *cursor = position % BLOCK_SIZE;
        Ok(position)
    }

    /// File names in directory order.
    pub fn list(&mut self) -> Vec<String> {
        let bytes = self.read_dir();
        directory::scan(&bytes)
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    }

    /// Flush and close every user slot. Slot 0 stays bound; directory
    /// mutations are written through, so its buffer never holds unsaved state.
    pub fn close_all(&mut self) -> Result<(), FsError> {
        for slot in 1..OFT_SIZE {
            if matches!(self.oft[slot], OftSlot::Open { .. }) {
                self.close(slot)?;
            }
        }
        Ok(())
    }

    /// Close user files, flush the metadata cache and write the image.
    pub fn save(&mut self, path: &Path) -> Result<(), FsError> {
        self.close_all()?;
        self.disk.save_image(path)
    }

    // --- inspection (debug dumps, tests) ---

    pub fn disk(&self) -> &Ldisk {
        &self.disk
    }

    /// Occupied OFT slots as `(slot, descriptor index, buffer cursor)`.
    pub fn open_slots(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.oft
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| match entry {
                OftSlot::Open { desc, cursor, .. } => Some((slot, *desc, *cursor)),
                OftSlot::Empty => None,
            })
    }

    // --- directory plumbing ---

    fn slot_of(&self, desc: usize) -> Option<usize> {
        (1..OFT_SIZE).find(|&slot| {
            matches!(self.oft[slot], OftSlot::Open { desc: open, .. } if open == desc)
        })
    }

    /// Concatenate the three directory blocks, leaving the last one resident
    /// in slot 0's working buffer.
    fn read_dir(&mut self) -> Vec<u8> {
        let blocks = self.disk.descriptor(DIRECTORY_DESCRIPTOR).blocks;
        let mut bytes = Vec::with_capacity(MAX_FILE_BLOCKS * BLOCK_SIZE);
        for &block in &blocks {
            let data = self.disk.read_block(block as usize);
            self.load_directory_buffer(block, data);
            bytes.extend_from_slice(&data);
        }
        bytes
    }

    fn load_directory_buffer(&mut self, block_no: u32, data: Block) {
        if let OftSlot::Open { block, buffer, .. } = &mut self.oft[0] {
            *block = block_no;
            *buffer = data;
        }
    }

    fn find_entry(&mut self, name: &str) -> Option<RawEntry> {
        let bytes = self.read_dir();
        directory::scan(&bytes)
            .into_iter()
            .find(|entry| entry.name == name)
    }

    /// Write the encoded entry into the first in-block hole that fits;
    /// entries never span directory blocks.
    fn insert_entry(&mut self, name: &str, desc: usize) -> Result<(), FsError> {
        let encoded = directory::encode_entry(name, desc);
        let blocks = self.disk.descriptor(DIRECTORY_DESCRIPTOR).blocks;
        for (index, &block) in blocks.iter().enumerate() {
            let mut data = self.disk.read_block(block as usize);
            if let Some(offset) = directory::find_hole(&data, encoded.len()) {
                data[offset..offset + encoded.len()].copy_from_slice(&encoded);
                self.disk.write_block(block as usize, &data);
                self.load_directory_buffer(block, data);
                self.bump_directory_size((index * BLOCK_SIZE + offset + encoded.len()) as u32);
                return Ok(());
            }
        }
        Err(FsError::DirectoryFull)
    }

    /// Zero the entry's byte span; the scan skips holes, so no compaction.
    fn remove_entry(&mut self, entry: &RawEntry) {
        let blocks = self.disk.descriptor(DIRECTORY_DESCRIPTOR).blocks;
        let first = entry.start / BLOCK_SIZE;
        let last = (entry.end - 1) / BLOCK_SIZE;
        for index in first..=last {
            let block = blocks[index];
            let mut data = self.disk.read_block(block as usize);
            let from = entry.start.max(index * BLOCK_SIZE) - index * BLOCK_SIZE;
            let to = entry.end.min((index + 1) * BLOCK_SIZE) - index * BLOCK_SIZE;
            data[from..to].fill(0);
            self.disk.write_block(block as usize, &data);
            self.load_directory_buffer(block, data);
        }
    }

    /// The directory's size tracks the high-water end offset of its entries.
    fn bump_directory_size(&mut self, end: u32) {
        let size = self.disk.descriptor(DIRECTORY_DESCRIPTOR).size;
        if size == SIZE_SENTINEL || size < end {
            self.disk.update_descriptor_size(DIRECTORY_DESCRIPTOR, end);
        }
    }
}

fn check_user_slot(slot: usize) -> Result<(), FsError> {
    if (1..OFT_SIZE).contains(&slot) {
        Ok(())
    } else {
        Err(FsError::BadSlot(slot))
    }
}
