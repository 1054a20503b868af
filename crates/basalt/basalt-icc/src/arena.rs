use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use tracing::warn;

/// Where a pool's sample storage comes from.
///
/// The gateway treats this as opaque memory; the kind only matters for
/// who else can see it (file-backed) and for TLB behavior under real-time
/// load (hugepages).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ArenaKind {
    #[default]
    Heap,
    HugePages,
    FileBacked(PathBuf),
}

enum Backing {
    Heap(#[allow(dead_code)] Box<[u64]>),
    Mmap(#[allow(dead_code)] MmapMut),
}

/// One contiguous, 8-byte-aligned memory region.
///
/// The base pointer is cached at construction; the backing storage is
/// kept alive but never accessed through its owner again, the same
/// pattern as a memory-mapped ring file.
pub struct Arena {
    base: *mut u8,
    len: usize,
    hugepages: bool,
    _backing: Backing,
}

// SAFETY: the region is plain memory owned by `_backing`; all access
// discipline is imposed by the pool built on top.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

/// Default hugepage size exponent requested from the kernel (2 MiB).
const HUGE_PAGE_SHIFT: u8 = 21;

impl Arena {
    pub fn allocate(kind: &ArenaKind, bytes: usize) -> io::Result<Arena> {
        // Backing stores are u64-granular so the base is always aligned
        // for 8-byte sample values.
        let words = bytes.div_ceil(8).max(1);

        match kind {
            ArenaKind::Heap => {
                let mut storage = vec![0u64; words].into_boxed_slice();
                let base = storage.as_mut_ptr() as *mut u8;
                Ok(Arena {
                    base,
                    len: words * 8,
                    hugepages: false,
                    _backing: Backing::Heap(storage),
                })
            }

            ArenaKind::HugePages => {
                match MmapOptions::new()
                    .len(words * 8)
                    .huge(Some(HUGE_PAGE_SHIFT))
                    .map_anon()
                {
                    Ok(mut map) => {
                        let base = map.as_mut_ptr();
                        Ok(Arena {
                            base,
                            len: words * 8,
                            hugepages: true,
                            _backing: Backing::Mmap(map),
                        })
                    }
                    Err(err) => {
                        // No hugepages reserved on this machine; a plain
                        // anonymous mapping keeps the pool usable.
                        warn!(
                            "hugepage mapping of {bytes} bytes failed ({err}), \
                             falling back to regular pages"
                        );
                        let mut map = MmapOptions::new().len(words * 8).map_anon()?;
                        let base = map.as_mut_ptr();
                        Ok(Arena {
                            base,
                            len: words * 8,
                            hugepages: false,
                            _backing: Backing::Mmap(map),
                        })
                    }
                }
            }

            ArenaKind::FileBacked(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(true)
                    .open(path)?;
                file.set_len((words * 8) as u64)?;

                let mut map = unsafe { MmapMut::map_mut(&file)? };
                let base = map.as_mut_ptr();
                Ok(Arena {
                    base,
                    len: words * 8,
                    hugepages: false,
                    _backing: Backing::Mmap(map),
                })
            }
        }
    }

    #[inline(always)]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the kernel actually granted hugepages.
    pub fn uses_hugepages(&self) -> bool {
        self.hugepages
    }
}
