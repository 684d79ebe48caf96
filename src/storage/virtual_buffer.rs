//! # Virtual Buffers
//!
//! A `VirtualBuffer` presents a list of discontiguous byte ranges as one
//! linear buffer addressed from 0. Each range (a fragment) is either a region
//! of a mapped block or a heap buffer:
//!
//! ```text
//! linear:    0                 100        130                  230
//!            |-----------------|----------|--------------------|
//! fragments: Block @4120 +100   Memory 30  Block @4220 +100
//! ```
//!
//! ## Why Fragments
//!
//! Blocks have a fixed size and a block region cannot become
//! non-contiguous. Inserting 30 bytes in the middle of a row stored in a
//! block therefore splits the block fragment in two and puts the new bytes
//! in a memory fragment between them. The caller keeps editing the buffer
//! and writes the result back once the structure is stable.
//!
//! ## Rules
//!
//! - `add_buffer()` only works on an unmodified buffer. After a modifying
//!   call (`pwrite`, `pinsert`, `perase`) the buffer must be flushed before
//!   more block fragments can be appended. Violations panic.
//! - `pwrite()` overwrites in place, including bytes inside block fragments.
//!   Bytes past the end go into a trailing memory fragment, if growth is
//!   allowed. A write starting beyond the end zero-fills the gap.
//! - All offsets and sizes are in the buffer's own coordinates.
//!
//! A `VirtualBuffer` borrows its blocks, so every block outlives the buffer
//! and cannot be released while the buffer exists. Edits are not
//! synchronized; one buffer is edited from one place at a time.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use super::block::Block;
use crate::error::StorageError;

#[derive(Debug)]
enum Fragment<'a> {
    Block {
        block: &'a Block,
        /// File reference of the first byte.
        offset: u64,
        size: usize,
    },
    Memory(Vec<u8>),
}

impl Fragment<'_> {
    fn len(&self) -> usize {
        match self {
            Fragment::Block { size, .. } => *size,
            Fragment::Memory(bytes) => bytes.len(),
        }
    }

    fn read(&self, at: usize, dst: &mut [u8]) {
        match self {
            Fragment::Block { block, offset, .. } => {
                let data = block.data(*offset + at as u64);
                dst.copy_from_slice(&data[..dst.len()]);
            }
            Fragment::Memory(bytes) => dst.copy_from_slice(&bytes[at..at + dst.len()]),
        }
    }

    fn write(&mut self, at: usize, src: &[u8]) {
        match self {
            Fragment::Block { block, offset, .. } => {
                let mut data = block.data_mut(*offset + at as u64);
                data[..src.len()].copy_from_slice(src);
            }
            Fragment::Memory(bytes) => bytes[at..at + src.len()].copy_from_slice(src),
        }
    }
}

#[derive(Debug, Default)]
pub struct VirtualBuffer<'a> {
    fragments: SmallVec<[Fragment<'a>; 4]>,
    size: usize,
    modified: bool,
}

impl<'a> VirtualBuffer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer starting with `size` bytes of `block` at file reference
    /// `offset`.
    pub fn with_block(block: &'a Block, offset: u64, size: usize) -> Self {
        let mut buffer = Self::new();
        buffer.add_buffer(block, offset, size);
        buffer
    }

    /// Appends a region of `block` as a new fragment.
    ///
    /// # Panics
    ///
    /// If the buffer was modified since the last flush, or if the region
    /// does not fit inside the block.
    pub fn add_buffer(&mut self, block: &'a Block, offset: u64, size: usize) {
        assert!(
            !self.modified,
            "cannot add a block fragment to a modified virtual buffer"
        );
        let within = (offset % block.page_size() as u64) as usize;
        assert!(
            within + size <= block.page_size(),
            "fragment of {} bytes at {} overflows its block",
            size,
            offset
        );
        if size == 0 {
            return;
        }
        self.fragments.push(Fragment::Block {
            block,
            offset,
            size,
        });
        self.size += size;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn count_buffers(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// `true` when `size` bytes starting at `offset` exist.
    pub fn is_data_available(&self, offset: usize, size: usize) -> bool {
        offset.checked_add(size).is_some_and(|end| end <= self.size)
    }

    /// Index of the fragment holding `offset` and the position inside it.
    /// `offset == size()` maps past the last fragment.
    fn locate(&self, offset: usize) -> (usize, usize) {
        let mut start = 0;
        for (index, fragment) in self.fragments.iter().enumerate() {
            let len = fragment.len();
            if offset < start + len {
                return (index, offset - start);
            }
            start += len;
        }
        (self.fragments.len(), offset - start)
    }

    /// Copies bytes starting at `offset` into `dst`. With `full` the whole
    /// of `dst` must be available or nothing is read; otherwise the read is
    /// cut at the end of the buffer. Returns the number of bytes copied.
    pub fn pread(&self, dst: &mut [u8], offset: usize, full: bool) -> Result<usize> {
        let available = self.size.saturating_sub(offset);
        if full && dst.len() > available {
            bail!(StorageError::Size(format!(
                "read of {} bytes at {} but only {} bytes available",
                dst.len(),
                offset,
                available
            )));
        }

        let count = dst.len().min(available);
        let (mut index, mut within) = self.locate(offset);
        let mut copied = 0;

        while copied < count {
            let fragment = &self.fragments[index];
            let chunk = (fragment.len() - within).min(count - copied);
            fragment.read(within, &mut dst[copied..copied + chunk]);
            copied += chunk;
            index += 1;
            within = 0;
        }

        Ok(count)
    }

    /// Convenience read of `size` bytes at `offset` into a new vector.
    pub fn read_vec(&self, offset: usize, size: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; size];
        self.pread(&mut bytes, offset, true)?;
        Ok(bytes)
    }

    /// Writes `src` at `offset`, overwriting existing bytes. Bytes beyond the
    /// end grow the buffer when `allow_growth` is set and fail with a size
    /// error otherwise, in which case nothing is written.
    pub fn pwrite(&mut self, src: &[u8], offset: usize, allow_growth: bool) -> Result<usize> {
        let end = offset.checked_add(src.len()).filter(|&end| end <= self.size || allow_growth);
        let Some(end) = end else {
            bail!(StorageError::Size(format!(
                "write of {} bytes at {} exceeds buffer size {}",
                src.len(),
                offset,
                self.size
            )));
        };
        if src.is_empty() {
            return Ok(0);
        }

        let overlap_end = end.min(self.size);
        if offset < overlap_end {
            let (mut index, mut within) = self.locate(offset);
            let mut written = 0;
            let overlap = overlap_end - offset;
            while written < overlap {
                let fragment = &mut self.fragments[index];
                let chunk = (fragment.len() - within).min(overlap - written);
                fragment.write(within, &src[written..written + chunk]);
                written += chunk;
                index += 1;
                within = 0;
            }
        }

        if end > self.size {
            let gap = offset.saturating_sub(self.size);
            let tail = &src[self.size.saturating_sub(offset)..];
            let memory = self.trailing_memory();
            memory.resize(memory.len() + gap, 0);
            memory.extend_from_slice(tail);
            self.size = end;
        }

        self.modified = true;
        Ok(src.len())
    }

    /// Inserts `src` at `offset`, shifting the rest of the buffer. Inserting
    /// inside a block fragment splits it around a new memory fragment.
    pub fn pinsert(&mut self, src: &[u8], offset: usize) -> Result<()> {
        ensure!(
            offset <= self.size,
            StorageError::Size(format!("insert at {} is beyond buffer size {}", offset, self.size))
        );
        let Some(new_size) = self.size.checked_add(src.len()) else {
            bail!(StorageError::Size(format!(
                "insert of {} bytes would overflow buffer size {}",
                src.len(),
                self.size
            )));
        };
        if src.is_empty() {
            return Ok(());
        }

        let (index, within) = self.locate(offset);

        if index == self.fragments.len() {
            self.trailing_memory().extend_from_slice(src);
        } else if let Some((block, reference, size)) = self.block_fragment(index) {
            if within == 0 {
                let after_memory =
                    index > 0 && matches!(self.fragments[index - 1], Fragment::Memory(_));
                if !after_memory {
                    self.fragments.insert(index, Fragment::Memory(src.to_vec()));
                } else if let Fragment::Memory(bytes) = &mut self.fragments[index - 1] {
                    bytes.extend_from_slice(src);
                }
            } else {
                self.fragments[index] = Fragment::Block {
                    block,
                    offset: reference,
                    size: within,
                };
                self.fragments.insert(index + 1, Fragment::Memory(src.to_vec()));
                self.fragments.insert(
                    index + 2,
                    Fragment::Block {
                        block,
                        offset: reference + within as u64,
                        size: size - within,
                    },
                );
            }
        } else if let Fragment::Memory(bytes) = &mut self.fragments[index] {
            bytes.splice(within..within, src.iter().copied());
        }

        self.size = new_size;
        self.modified = true;
        Ok(())
    }

    /// Removes `size` bytes starting at `offset`, shrinking, splitting or
    /// dropping fragments as needed.
    pub fn perase(&mut self, offset: usize, size: usize) -> Result<()> {
        if !self.is_data_available(offset, size) {
            bail!(StorageError::Size(format!(
                "erase of {} bytes at {} exceeds buffer size {}",
                size, offset, self.size
            )));
        }

        let mut remaining = size;
        while remaining > 0 {
            let (index, within) = self.locate(offset);
            let fragment_len = self.fragments[index].len();
            let take = (fragment_len - within).min(remaining);

            if within == 0 && take == fragment_len {
                self.fragments.remove(index);
            } else if let Some((block, reference, _)) = self.block_fragment(index) {
                if within == 0 {
                    self.fragments[index] = Fragment::Block {
                        block,
                        offset: reference + take as u64,
                        size: fragment_len - take,
                    };
                } else if within + take == fragment_len {
                    self.fragments[index] = Fragment::Block {
                        block,
                        offset: reference,
                        size: within,
                    };
                } else {
                    self.fragments[index] = Fragment::Block {
                        block,
                        offset: reference,
                        size: within,
                    };
                    self.fragments.insert(
                        index + 1,
                        Fragment::Block {
                            block,
                            offset: reference + (within + take) as u64,
                            size: fragment_len - within - take,
                        },
                    );
                }
            } else if let Fragment::Memory(bytes) = &mut self.fragments[index] {
                bytes.drain(within..within + take);
            }

            remaining -= take;
        }

        self.size -= size;
        if size > 0 {
            self.modified = true;
        }
        Ok(())
    }

    /// Flushes the pages of every block fragment and marks the buffer
    /// unmodified. Memory fragments are kept as they are.
    pub fn flush(&mut self, immediate: bool) -> Result<()> {
        let mut synced: SmallVec<[u64; 4]> = SmallVec::new();
        for fragment in &self.fragments {
            if let Fragment::Block { block, .. } = fragment {
                if !synced.contains(&block.offset()) {
                    block.sync(immediate)?;
                    synced.push(block.offset());
                }
            }
        }
        self.modified = false;
        Ok(())
    }

    fn block_fragment(&self, index: usize) -> Option<(&'a Block, u64, usize)> {
        match self.fragments[index] {
            Fragment::Block {
                block,
                offset,
                size,
            } => Some((block, offset, size)),
            Fragment::Memory(_) => None,
        }
    }

    fn trailing_memory(&mut self) -> &mut Vec<u8> {
        if !matches!(self.fragments.last(), Some(Fragment::Memory(_))) {
            self.fragments.push(Fragment::Memory(Vec::new()));
        }
        match self.fragments.last_mut() {
            Some(Fragment::Memory(bytes)) => bytes,
            _ => unreachable!("a memory fragment was just pushed"),
        }
    }

    /// Describes each fragment as `(is_block, reference, size)`; memory
    /// fragments report reference 0.
    pub fn layout(&self) -> Vec<(bool, u64, usize)> {
        self.fragments
            .iter()
            .map(|f| match f {
                Fragment::Block { offset, size, .. } => (true, *offset, *size),
                Fragment::Memory(bytes) => (false, 0, bytes.len()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use crate::storage::block::tests::file_with_free_blocks;
    use crate::storage::dbfile::DbFile;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn filled_block(file: &mut DbFile, offset: u64) -> Block {
        let block = Block::load(file, offset).unwrap();
        {
            let mut data = block.data_mut(offset + 64);
            for (i, b) in data[..256].iter_mut().enumerate() {
                *b = i as u8;
            }
        }
        block
    }

    #[test]
    fn reads_span_block_fragments() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 2);
        let ps = file.page_size() as u64;
        let a = filled_block(&mut file, 0);
        let b = filled_block(&mut file, ps);

        {
            let mut vb = VirtualBuffer::with_block(&a, 64, 10);
            vb.add_buffer(&b, ps + 64 + 100, 10);

            let bytes = vb.read_vec(5, 10).unwrap();

            assert_eq!(vb.size(), 20);
            assert_eq!(vb.count_buffers(), 2);
            assert_eq!(bytes, vec![5, 6, 7, 8, 9, 100, 101, 102, 103, 104]);
            assert!(!vb.is_modified());
        }

        a.release(&mut file).unwrap();
        b.release(&mut file).unwrap();
    }

    #[test]
    fn short_reads() {
        let vb = {
            let mut vb = VirtualBuffer::new();
            vb.pwrite(&[1, 2, 3], 0, true).unwrap();
            vb
        };
        let mut dst = [0u8; 8];

        let err = vb.pread(&mut dst, 1, true).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Size));

        assert_eq!(vb.pread(&mut dst, 1, false).unwrap(), 2);
        assert_eq!(&dst[..2], &[2, 3]);
        assert_eq!(vb.pread(&mut dst, 10, false).unwrap(), 0);
    }

    #[test]
    fn write_without_growth_is_bounded() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        let a = filled_block(&mut file, 0);

        {
            let mut vb = VirtualBuffer::with_block(&a, 64, 4);

            let err = vb.pwrite(&[9; 5], 0, false).unwrap_err();
            assert_eq!(error_kind(&err), Some(ErrorKind::Size));
            assert_eq!(vb.read_vec(0, 4).unwrap(), vec![0, 1, 2, 3]);

            vb.pwrite(&[9, 9], 1, false).unwrap();
            assert_eq!(vb.read_vec(0, 4).unwrap(), vec![0, 9, 9, 3]);
        }

        // the write went through to the page
        assert_eq!(a.data(65)[..2], [9, 9]);
        a.release(&mut file).unwrap();
    }

    #[test]
    fn growth_appends_to_trailing_memory() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        let a = filled_block(&mut file, 0);

        {
            let mut vb = VirtualBuffer::with_block(&a, 64, 4);
            vb.pwrite(&[7, 7, 7], 2, true).unwrap();
            vb.pwrite(&[8], 8, true).unwrap();

            assert_eq!(vb.size(), 9);
            assert_eq!(vb.count_buffers(), 2);
            assert_eq!(vb.read_vec(0, 9).unwrap(), vec![0, 1, 7, 7, 7, 0, 0, 0, 8]);
        }

        a.release(&mut file).unwrap();
    }

    #[test]
    fn insert_in_block_middle_splits_fragment() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        let a = filled_block(&mut file, 0);

        {
            let mut vb = VirtualBuffer::with_block(&a, 64, 10);
            vb.pinsert(&[0xAA, 0xBB], 4).unwrap();

            assert_eq!(vb.size(), 12);
            assert_eq!(
                vb.layout(),
                vec![(true, 64, 4), (false, 0, 2), (true, 68, 6)]
            );
            assert_eq!(
                vb.read_vec(0, 12).unwrap(),
                vec![0, 1, 2, 3, 0xAA, 0xBB, 4, 5, 6, 7, 8, 9]
            );
            assert!(vb.is_modified());
        }

        // the block itself is untouched
        assert_eq!(a.data(68)[0], 4);
        a.release(&mut file).unwrap();
    }

    #[test]
    fn insert_at_fragment_boundaries_does_not_split() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        let a = filled_block(&mut file, 0);

        {
            let mut vb = VirtualBuffer::with_block(&a, 64, 4);
            vb.pinsert(&[1], 0).unwrap();
            vb.pinsert(&[2], 1).unwrap();
            vb.pinsert(&[3], 6).unwrap();

            assert_eq!(vb.layout(), vec![(false, 0, 2), (true, 64, 4), (false, 0, 1)]);
            assert_eq!(vb.read_vec(0, 7).unwrap(), vec![1, 2, 0, 1, 2, 3, 3]);
        }

        a.release(&mut file).unwrap();
    }

    #[test]
    fn erase_shrinks_splits_and_removes() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        let a = filled_block(&mut file, 0);

        {
            let mut vb = VirtualBuffer::with_block(&a, 64, 10);
            vb.pinsert(&[0xAA, 0xBB], 10).unwrap();

            // middle of the block fragment
            vb.perase(2, 3).unwrap();
            assert_eq!(vb.layout(), vec![(true, 64, 2), (true, 69, 5), (false, 0, 2)]);

            // across the boundary into the memory fragment
            vb.perase(5, 3).unwrap();
            assert_eq!(vb.layout(), vec![(true, 64, 2), (true, 69, 3), (false, 0, 1)]);
            assert_eq!(vb.read_vec(0, 6).unwrap(), vec![0, 1, 5, 6, 7, 0xBB]);

            // a whole fragment
            vb.perase(0, 2).unwrap();
            assert_eq!(vb.size(), 4);
            assert_eq!(vb.count_buffers(), 2);
        }

        a.release(&mut file).unwrap();
    }

    #[test]
    fn erase_beyond_end_fails() {
        let mut vb = VirtualBuffer::new();
        vb.pwrite(&[1, 2, 3], 0, true).unwrap();

        let err = vb.perase(2, 5).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Size));
        assert_eq!(vb.size(), 3);
    }

    #[test]
    fn write_ending_past_usize_max_is_a_size_error() {
        let mut vb = VirtualBuffer::new();
        vb.pwrite(&[1, 2, 3], 0, true).unwrap();

        for allow_growth in [false, true] {
            let err = vb.pwrite(&[9, 9], usize::MAX, allow_growth).unwrap_err();
            assert_eq!(error_kind(&err), Some(ErrorKind::Size));
        }
        let err = vb.pinsert(&[9], usize::MAX).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Size));

        assert_eq!(vb.size(), 3);
        assert_eq!(vb.read_vec(0, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "modified virtual buffer")]
    fn add_after_modification_panics() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        let a = filled_block(&mut file, 0);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut vb = VirtualBuffer::new();
            vb.pwrite(&[1], 0, true).unwrap();
            vb.add_buffer(&a, 64, 4);
        }));
        a.release(&mut file).unwrap();
        std::panic::resume_unwind(result.unwrap_err());
    }

    #[test]
    fn flush_allows_new_fragments() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        let a = filled_block(&mut file, 0);

        {
            let mut vb = VirtualBuffer::with_block(&a, 64, 4);
            vb.pwrite(&[5], 0, false).unwrap();
            vb.flush(true).unwrap();
            vb.add_buffer(&a, 200, 4);

            assert!(!vb.is_modified());
            assert_eq!(vb.size(), 8);
            assert!(vb.is_data_available(4, 4));
            assert!(!vb.is_data_available(5, 4));
        }

        a.release(&mut file).unwrap();
    }

    proptest! {
        #[test]
        fn read_after_write(
            segments in prop::collection::vec(
                (0usize..32, prop::collection::vec(any::<u8>(), 1..64)),
                1..12,
            )
        ) {
            let mut placed = Vec::new();
            let mut cursor = 0;
            for (gap, bytes) in segments {
                cursor += gap;
                placed.push((cursor, bytes.clone()));
                cursor += bytes.len();
            }

            let mut vb = VirtualBuffer::new();
            for (offset, bytes) in placed.iter().rev() {
                vb.pwrite(bytes, *offset, true).unwrap();
            }

            for (offset, bytes) in &placed {
                prop_assert_eq!(&vb.read_vec(*offset, bytes.len()).unwrap(), bytes);
            }
            prop_assert_eq!(vb.size(), cursor);
        }
    }
}
