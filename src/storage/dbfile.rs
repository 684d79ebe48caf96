//! # Page-Mapped Table File
//!
//! `DbFile` owns one on-disk table file and hands out memory mappings of its
//! blocks, one block at a time.
//!
//! ## Why Per-Page Mappings
//!
//! Mapping the whole file means remapping on every growth, which invalidates
//! every outstanding slice. Mapping each block separately keeps existing
//! mappings valid while the file grows: `append_free_block()` only extends
//! the file, it never touches a live mapping.
//!
//! ## Page Cache
//!
//! Mapped pages live in a slot arena:
//!
//! ```text
//! by_offset: { 0 -> slot 0, 32768 -> slot 2, ... }
//!
//! slots:  [ gen 0 | page@0 refs=1 ] [ gen 3 | empty ] [ gen 1 | page@32768 refs=2 ]
//! ```
//!
//! `map(offset)` returns a [`PageHandle`] identified by `(slot, generation)`.
//! Mapping an offset whose page is already mapped bumps the reference count
//! and returns a handle to the same mapping. `release(handle)` consumes the
//! handle; the page is unmapped when its count reaches zero and the slot's
//! generation is bumped so a stale `PageId` can never alias a new mapping.
//!
//! ## Page Size
//!
//! The page size is set exactly once, rounded up to a multiple of the OS page
//! size (mmap offsets must be OS-page aligned). Reading it before it is set,
//! or setting it twice, is a programming error and panics.
//!
//! ## Thread Safety
//!
//! `DbFile` is `Send` but the page cache is not internally synchronized;
//! concurrent use of one instance requires an external lock. The bytes of a
//! mapped page are guarded by a per-page `RwLock`.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::lock::DirLock;
use crate::config::{FREE_BLOCK_NEXT_OFFSET, PAGE_SIZE_FIELD_OFFSET, STRUCTURE_VERSION_OFFSET};
use crate::error::StorageError;
use crate::storage::block::BlockType;
use crate::storage::blocks::FREE_BLOCK_VERSION;

/// Size of the OS virtual memory page.
pub fn os_page_size() -> usize {
    // SAFETY: sysconf has no memory safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Rounds `size` up to the next multiple of the OS page size.
pub fn round_to_os_page(size: usize) -> usize {
    let os = os_page_size();
    size.max(1).div_ceil(os) * os
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    slot: u32,
    generation: u32,
}

#[derive(Debug)]
struct MappedPage {
    offset: u64,
    map: RwLock<MmapMut>,
}

/// One reference to a mapped page. Not `Clone`: every handle accounts for
/// exactly one reference and must be given back through
/// [`DbFile::release`].
#[derive(Debug)]
pub struct PageHandle {
    id: PageId,
    page: Arc<MappedPage>,
}

impl PageHandle {
    pub fn id(&self) -> PageId {
        self.id
    }

    /// File offset of the first byte of the page.
    pub fn offset(&self) -> u64 {
        self.page.offset
    }

    /// Start address of the mapping. Only meaningful for identity checks.
    pub fn as_ptr(&self) -> *const u8 {
        self.page.map.read().as_ptr()
    }

    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.page.map.read(), |m| &m[..])
    }

    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.page.map.write(), |m| &mut m[..])
    }

    /// Flushes the page to storage. With `immediate == false` the flush is
    /// only scheduled.
    pub fn flush(&self, immediate: bool) -> std::io::Result<()> {
        let map = self.page.map.read();
        if immediate {
            map.flush()
        } else {
            map.flush_async()
        }
    }
}

#[derive(Debug)]
struct SlotEntry {
    page: Arc<MappedPage>,
    refs: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<SlotEntry>,
}

#[derive(Debug)]
pub struct DbFile {
    path: PathBuf,
    file: File,
    page_size: Option<usize>,
    sparse: bool,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    by_offset: HashMap<u64, u32>,
}

impl DbFile {
    /// Creates a new, empty file. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| StorageError::io("create", path, e))?;

        tracing::debug!(path = %path.display(), "created table file");

        Ok(Self::with_file(path, file))
    }

    /// Opens an existing file and restores its page size from the header
    /// block.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::io("open", path, e))?;

        let mut db = Self::with_file(path, file);

        let mut raw = [0u8; 4];
        db.read_at(PAGE_SIZE_FIELD_OFFSET as u64, &mut raw)?;
        let page_size = u32::from_le_bytes(raw) as usize;

        if page_size == 0 || page_size % os_page_size() != 0 {
            bail!(StorageError::Corrupt(format!(
                "'{}' records page size {} which is not a multiple of the OS page size {}",
                path.display(),
                page_size,
                os_page_size()
            )));
        }

        db.set_page_size(page_size);

        tracing::debug!(path = %path.display(), page_size, "opened table file");

        Ok(db)
    }

    /// Opens `path`, creating it first if needed. The existence check, the
    /// creation and `init` all run while the directory lock is held, so two
    /// processes never both initialize the same file.
    ///
    /// Returns `true` as second element when the file was created. If `init`
    /// fails the partial file is removed.
    pub fn open_or_create<P, F>(path: P, page_size: usize, init: F) -> Result<(Self, bool)>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut DbFile) -> Result<()>,
    {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let _lock = DirLock::acquire(dir)?;

        if path.exists() {
            return Ok((Self::open(path)?, false));
        }

        let mut db = Self::create(path)?;
        db.set_page_size(page_size);

        if let Err(e) = init(&mut db) {
            drop(db);
            if let Err(rm) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %rm, "failed to remove partially created file");
            }
            return Err(e);
        }

        Ok((db, true))
    }

    fn with_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            page_size: None,
            sparse: false,
            slots: Vec::new(),
            free_slots: Vec::new(),
            by_offset: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_sparse(&mut self, sparse: bool) {
        self.sparse = sparse;
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// Sets the page size, rounded up to the OS page size.
    ///
    /// # Panics
    ///
    /// If the page size was already set.
    pub fn set_page_size(&mut self, size: usize) {
        assert!(
            self.page_size.is_none(),
            "page size of '{}' can only be set once",
            self.path.display()
        );
        self.page_size = Some(round_to_os_page(size));
    }

    /// # Panics
    ///
    /// If the page size was never set.
    pub fn page_size(&self) -> usize {
        match self.page_size {
            Some(size) => size,
            None => panic!("page size of '{}' used before being set", self.path.display()),
        }
    }

    pub fn size(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| StorageError::io("stat", &self.path, e))?;
        Ok(metadata.len())
    }

    pub fn page_count(&self) -> Result<u64> {
        Ok(self.size()? / self.page_size() as u64)
    }

    /// Number of distinct pages currently mapped.
    pub fn mapped_pages(&self) -> usize {
        self.by_offset.len()
    }

    /// Maps the page containing `offset`.
    pub fn map(&mut self, offset: u64) -> Result<PageHandle> {
        let page_size = self.page_size() as u64;
        let start = offset - offset % page_size;

        if let Some(&slot) = self.by_offset.get(&start) {
            let slot_ref = &mut self.slots[slot as usize];
            // INVARIANT: by_offset only points at occupied slots
            let entry = slot_ref.entry.as_mut().unwrap();
            entry.refs += 1;
            tracing::trace!(offset = start, refs = entry.refs, "page cache hit");
            return Ok(PageHandle {
                id: PageId {
                    slot,
                    generation: slot_ref.generation,
                },
                page: Arc::clone(&entry.page),
            });
        }

        let file_size = self.size()?;
        ensure!(
            start + page_size <= file_size,
            StorageError::not_found(
                "page",
                format!("offset {} beyond end of '{}' ({} bytes)", offset, self.path.display(), file_size),
            )
        );

        // SAFETY: MmapOptions::map_mut is unsafe because the mapped file may
        // be modified or truncated by another process. This is safe because:
        // 1. Table files are only written through this engine, which never
        //    shrinks a file
        // 2. start is page aligned and page_size is a multiple of the OS page
        //    size, so the mapping request is well formed
        // 3. start + page_size <= file size was checked above
        // 4. The mapping is owned by an Arc and only reachable through
        //    PageHandle, so it cannot be unmapped while a handle exists
        let map = unsafe {
            MmapOptions::new()
                .offset(start)
                .len(page_size as usize)
                .map_mut(&self.file)
                .map_err(|e| StorageError::io("mmap", &self.path, e))?
        };

        let page = Arc::new(MappedPage {
            offset: start,
            map: RwLock::new(map),
        });

        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };

        let slot_ref = &mut self.slots[slot as usize];
        slot_ref.entry = Some(SlotEntry {
            page: Arc::clone(&page),
            refs: 1,
        });
        self.by_offset.insert(start, slot);

        tracing::trace!(offset = start, slot, "mapped page");

        Ok(PageHandle {
            id: PageId {
                slot,
                generation: slot_ref.generation,
            },
            page,
        })
    }

    /// Gives a page reference back. The page is unmapped once every handle
    /// to it has been released.
    pub fn release(&mut self, handle: PageHandle) -> Result<()> {
        let PageId { slot, generation } = handle.id;

        let known = self
            .slots
            .get(slot as usize)
            .is_some_and(|s| s.generation == generation && s.entry.is_some());
        if !known {
            bail!(StorageError::not_found(
                "mapped page",
                format!("slot {} generation {} in '{}'", slot, generation, self.path.display()),
            ));
        }

        let slot_ref = &mut self.slots[slot as usize];
        // INVARIANT: checked above
        let entry = slot_ref.entry.as_mut().unwrap();
        entry.refs -= 1;

        if entry.refs == 0 {
            let offset = entry.page.offset;
            slot_ref.entry = None;
            slot_ref.generation = slot_ref.generation.wrapping_add(1);
            self.by_offset.remove(&offset);
            self.free_slots.push(slot);
            tracing::trace!(offset, slot, "unmapped page");
        }

        Ok(())
    }

    /// Appends one free block linked to `prev_offset` and returns its offset.
    /// Unless the file is sparse the whole block is written so it does not
    /// become a hole.
    pub fn append_free_block(&mut self, prev_offset: u64) -> Result<u64> {
        let page_size = self.page_size();
        let offset = self.size()?;

        ensure!(
            offset % page_size as u64 == 0,
            StorageError::Corrupt(format!(
                "size {} of '{}' is not a multiple of the page size {}",
                offset,
                self.path.display(),
                page_size
            ))
        );

        let header_len = FREE_BLOCK_NEXT_OFFSET + 8;
        let mut block = vec![0u8; if self.sparse { header_len } else { page_size }];
        block[..4].copy_from_slice(&BlockType::Free.tag());
        block[STRUCTURE_VERSION_OFFSET..STRUCTURE_VERSION_OFFSET + 2]
            .copy_from_slice(&FREE_BLOCK_VERSION.to_le_bytes());
        block[FREE_BLOCK_NEXT_OFFSET..header_len].copy_from_slice(&prev_offset.to_le_bytes());

        self.write_at(offset, &block)?;

        if self.sparse {
            self.file
                .set_len(offset + page_size as u64)
                .map_err(|e| StorageError::io("truncate", &self.path, e))?;
        }

        tracing::trace!(offset, prev_offset, "appended free block");

        Ok(offset)
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| StorageError::io("read", &self.path, e))?;
        Ok(())
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.file
            .write_all_at(data, offset)
            .map_err(|e| StorageError::io("write", &self.path, e))?;
        Ok(())
    }

    /// Flushes file data and metadata. Mapped pages are flushed through
    /// their blocks.
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::io("fsync", &self.path, e))?;
        Ok(())
    }
}

impl Drop for DbFile {
    fn drop(&mut self) {
        if !self.by_offset.is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                pages = self.by_offset.len(),
                "table file closed with pages still mapped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use tempfile::tempdir;

    fn new_file(dir: &Path, pages: usize) -> DbFile {
        let mut db = DbFile::create(dir.join("t.snapdb")).unwrap();
        db.set_page_size(os_page_size());
        let mut prev = 0;
        for _ in 0..pages {
            prev = db.append_free_block(prev).unwrap();
        }
        db
    }

    #[test]
    fn page_size_rounds_up_to_os_page() {
        let dir = tempdir().unwrap();
        let mut db = DbFile::create(dir.path().join("t.snapdb")).unwrap();

        db.set_page_size(os_page_size() + 1);

        assert_eq!(db.page_size(), os_page_size() * 2);
    }

    #[test]
    #[should_panic(expected = "can only be set once")]
    fn page_size_set_twice_panics() {
        let dir = tempdir().unwrap();
        let mut db = DbFile::create(dir.path().join("t.snapdb")).unwrap();

        db.set_page_size(4096);
        db.set_page_size(8192);
    }

    #[test]
    #[should_panic(expected = "used before being set")]
    fn page_size_read_before_set_panics() {
        let dir = tempdir().unwrap();
        let db = DbFile::create(dir.path().join("t.snapdb")).unwrap();

        let _ = db.page_size();
    }

    #[test]
    fn create_fails_when_file_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.snapdb");
        fs::write(&path, b"x").unwrap();

        let err = DbFile::create(&path).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Io));
        assert!(err.to_string().contains("t.snapdb"));
    }

    #[test]
    fn open_missing_file_is_io_error_with_path() {
        let dir = tempdir().unwrap();

        let err = DbFile::open(dir.path().join("missing.snapdb")).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Io));
        assert!(err.to_string().contains("missing.snapdb"));
    }

    #[test]
    fn append_free_block_grows_by_whole_pages() {
        let dir = tempdir().unwrap();
        let mut db = new_file(dir.path(), 0);
        let ps = db.page_size() as u64;

        let first = db.append_free_block(0).unwrap();
        let second = db.append_free_block(first).unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, ps);
        assert_eq!(db.size().unwrap(), 2 * ps);
        assert_eq!(db.page_count().unwrap(), 2);

        let mut header = [0u8; 16];
        db.read_at(second, &mut header).unwrap();
        assert_eq!(&header[..4], b"FREE");
        assert_eq!(u64::from_le_bytes(header[8..16].try_into().unwrap()), first);
    }

    #[test]
    fn sparse_free_blocks_still_extend_the_file() {
        let dir = tempdir().unwrap();
        let mut db = new_file(dir.path(), 0);
        db.set_sparse(true);

        db.append_free_block(0).unwrap();
        db.append_free_block(0).unwrap();

        assert!(db.is_sparse());
        assert_eq!(db.size().unwrap(), 2 * db.page_size() as u64);
    }

    #[test]
    fn map_aligns_to_page_start() {
        let dir = tempdir().unwrap();
        let mut db = new_file(dir.path(), 3);
        let ps = db.page_size() as u64;

        let handle = db.map(ps + 123).unwrap();

        assert_eq!(handle.offset(), ps);
        db.release(handle).unwrap();
    }

    #[test]
    fn map_same_page_returns_cached_mapping() {
        let dir = tempdir().unwrap();
        let mut db = new_file(dir.path(), 2);
        let ps = db.page_size() as u64;

        let a = db.map(ps + 8).unwrap();
        let b = db.map(2 * ps - 1).unwrap();

        assert_eq!(a.id(), b.id());
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_eq!(db.mapped_pages(), 1);

        db.release(a).unwrap();
        assert_eq!(db.mapped_pages(), 1);
        db.release(b).unwrap();
        assert_eq!(db.mapped_pages(), 0);
    }

    #[test]
    fn map_beyond_end_is_not_found() {
        let dir = tempdir().unwrap();
        let mut db = new_file(dir.path(), 1);
        let ps = db.page_size() as u64;

        let err = db.map(ps).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
    }

    #[test]
    fn stale_handle_is_rejected() {
        let dir = tempdir().unwrap();
        let mut db = new_file(dir.path(), 1);

        let a = db.map(0).unwrap();
        let stale = PageHandle {
            id: a.id(),
            page: Arc::clone(&a.page),
        };
        db.release(a).unwrap();

        let err = db.release(stale).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
    }

    #[test]
    fn slot_reuse_bumps_generation() {
        let dir = tempdir().unwrap();
        let mut db = new_file(dir.path(), 2);
        let ps = db.page_size() as u64;

        let a = db.map(0).unwrap();
        let first_id = a.id();
        db.release(a).unwrap();

        let b = db.map(ps).unwrap();
        assert_ne!(b.id(), first_id);
        db.release(b).unwrap();
    }

    #[test]
    fn writes_through_mapping_reach_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.snapdb");
        let ps;
        {
            let mut db = new_file(dir.path(), 2);
            ps = db.page_size() as u64;
            // a real header so that open() can restore the page size
            db.write_at(PAGE_SIZE_FIELD_OFFSET as u64, &(ps as u32).to_le_bytes())
                .unwrap();

            let handle = db.map(ps).unwrap();
            handle.write()[100] = 0xAB;
            handle.flush(true).unwrap();
            db.release(handle).unwrap();
        }

        let db = DbFile::open(&path).unwrap();
        let mut byte = [0u8; 1];
        db.read_at(ps + 100, &mut byte).unwrap();

        assert_eq!(db.page_size() as u64, ps);
        assert_eq!(byte[0], 0xAB);
    }

    #[test]
    fn open_or_create_runs_init_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.snapdb");

        let init = |db: &mut DbFile| {
            let ps = db.page_size() as u64;
            db.append_free_block(0)?;
            db.write_at(PAGE_SIZE_FIELD_OFFSET as u64, &(ps as u32).to_le_bytes())
        };

        let (_, created) = DbFile::open_or_create(&path, 4096, init).unwrap();
        assert!(created);

        let (db, created) = DbFile::open_or_create(&path, 4096, |_| {
            panic!("init must not run for an existing file")
        })
        .unwrap();
        assert!(!created);
        assert_eq!(db.page_size(), round_to_os_page(4096));
    }

    #[test]
    fn failed_init_removes_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.snapdb");

        let result = DbFile::open_or_create(&path, 4096, |_| Err(eyre::eyre!("boom")));

        assert!(result.is_err());
        assert!(!path.exists());
    }
}
