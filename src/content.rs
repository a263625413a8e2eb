//! In-memory representation of a single open database, WAL, or other file.
//!
//! Mirrors SQLite's on-disk page and WAL-frame layout bit for bit, so that a volatile
//! [Content] can be read and written exactly as a real file would be.

use crate::error::{self, Error};
use crate::shm::Shm;

pub const WAL_HDR_SIZE: usize = 32;
pub const WAL_FRAME_HDR_SIZE: usize = 24;
pub const DEFAULT_PAGE_SIZE: u32 = 4096;
pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Db,
    Wal,
    Other,
}

/// One page of a database, or one frame's page body of a WAL.
#[derive(Debug)]
pub struct Page {
    pub buf: Vec<u8>,
    /// Present only for pages belonging to a WAL [Content]: the 24-byte frame header that
    /// precedes the page body on the wire.
    pub frame_header: Option<[u8; WAL_FRAME_HDR_SIZE]>,
}

impl Page {
    fn zeroed(page_size: u32, wal: bool) -> Self {
        Page {
            buf: vec![0u8; page_size as usize],
            frame_header: wal.then(|| [0u8; WAL_FRAME_HDR_SIZE]),
        }
    }
}

/// The volatile content backing one open filename.
pub struct Content {
    pub name: String,
    pub kind: Kind,
    pub page_size: u32,
    pub pages: Vec<Page>,
    pub refcount: usize,
    /// Only set for `Kind::Wal` content.
    pub wal_header: Option<[u8; WAL_HDR_SIZE]>,
    /// Only set for `Kind::Db` content: the slot index of the paired WAL, once opened.
    pub wal: Option<usize>,
    /// Only ever present for `Kind::Db` content.
    pub shm: Option<Shm>,
}

pub fn validate_page_size(size: u32) -> Result<(), Error> {
    if size < MIN_PAGE_SIZE || size > MAX_PAGE_SIZE || !size.is_power_of_two() {
        return Err(error::InvalidPageSizeSnafu { size }.build());
    }
    Ok(())
}

impl Content {
    pub fn new(name: String, kind: Kind) -> Self {
        Content {
            name,
            kind,
            page_size: 0,
            pages: Vec::new(),
            refcount: 0,
            wal_header: (kind == Kind::Wal).then_some([0u8; WAL_HDR_SIZE]),
            wal: None,
            shm: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 1-based page lookup that creates a zeroed page when `pgno` is exactly one past the end.
    pub fn page_get(&mut self, pgno: u32) -> Result<&mut Page, Error> {
        let pgno = pgno as usize;
        if pgno == 0 || pgno > self.pages.len() + 1 {
            return Err(error::TruncateGrowSnafu {
                from: self.pages.len() as u64,
                to: pgno as u64,
            }
            .build());
        }
        if pgno == self.pages.len() + 1 {
            let page = Page::zeroed(self.page_size, self.kind == Kind::Wal);
            self.pages.push(page);
        }
        Ok(&mut self.pages[pgno - 1])
    }

    pub fn page_lookup(&self, pgno: u32) -> Option<&Page> {
        let pgno = pgno as usize;
        if pgno == 0 || pgno > self.pages.len() {
            return None;
        }
        Some(&self.pages[pgno - 1])
    }

    /// Shrink the content to `new_len` pages (or `new_len == 0` for a WAL reset).
    pub fn truncate(&mut self, new_len: usize) -> Result<(), Error> {
        if self.kind == Kind::Wal {
            if new_len != 0 {
                return Err(error::TruncateGrowSnafu {
                    from: self.pages.len() as u64,
                    to: new_len as u64,
                }
                .build());
            }
            self.pages.clear();
            self.wal_header = Some([0u8; WAL_HDR_SIZE]);
            return Ok(());
        }

        if new_len > self.pages.len() {
            return Err(error::TruncateGrowSnafu {
                from: self.pages.len() as u64,
                to: new_len as u64,
            }
            .build());
        }
        self.pages.truncate(new_len);
        Ok(())
    }

    pub fn file_size(&self) -> u64 {
        match self.kind {
            Kind::Db => self.pages.len() as u64 * self.page_size as u64,
            Kind::Wal => {
                WAL_HDR_SIZE as u64
                    + self.pages.len() as u64 * (WAL_FRAME_HDR_SIZE as u64 + self.page_size as u64)
            }
            Kind::Other => 0,
        }
    }

    pub fn set_page_size(&mut self, size: u32) -> Result<(), Error> {
        validate_page_size(size)?;
        if self.page_size != 0 && self.page_size != size {
            return Err(error::PageSizeFixedSnafu {
                current: self.page_size,
                requested: size,
            }
            .build());
        }
        self.page_size = size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_header_with_no_frames_still_counts_toward_file_size() {
        let mut content = Content::new("test.db-wal".to_string(), Kind::Wal);
        content.page_size = 4096;
        assert_eq!(content.file_size(), WAL_HDR_SIZE as u64);
    }

    #[test]
    fn wal_file_size_grows_by_frame_size_per_page() {
        let mut content = Content::new("test.db-wal".to_string(), Kind::Wal);
        content.page_size = 4096;
        content.page_get(1).unwrap();
        content.page_get(2).unwrap();
        assert_eq!(
            content.file_size(),
            WAL_HDR_SIZE as u64 + 2 * (WAL_FRAME_HDR_SIZE as u64 + 4096)
        );
    }

    #[test]
    fn other_content_reports_zero_size() {
        let content = Content::new("test.db-journal".to_string(), Kind::Other);
        assert_eq!(content.file_size(), 0);
    }
}
