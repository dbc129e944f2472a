use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io;
use std::path::Path;

/// Read-only private (copy-on-write) mapping of a file.
///
/// Pages are shared with every other process mapping the same file, which is
/// what makes the cache lines of a victim binary observable from here.
pub struct MMappedFile {
    map: Mmap,
}

impl MMappedFile {
    pub fn open(path: &Path) -> io::Result<MMappedFile> {
        let file = File::open(path)?;
        // Truncating the file while it is mapped would fault on access.
        let map = unsafe { MmapOptions::new().map_copy_read_only(&file)? };
        Ok(MMappedFile { map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn slice(&self) -> &[u8] {
        &self.map
    }
}
