//! The concrete [memqlite_vfs::DatabaseHandle] backing one open file.

use std::fs::File;
use std::os::unix::fs::FileExt as _;
use std::sync::{Arc, Mutex};

use memqlite_vfs::{DatabaseHandle, LockKind, Pragma, ShmLockFlags};

use crate::content::{
    validate_page_size, Content, Kind, WAL_FRAME_HDR_SIZE, WAL_HDR_SIZE,
};
use crate::error::Error;
use crate::header;
use crate::root::Root;
use crate::shm::Shm;

type VfsError = memqlite_vfs::error::Error<Error>;

fn corrupt() -> VfsError {
    memqlite_vfs::error::Error::Corrupt
}

fn protocol() -> VfsError {
    memqlite_vfs::error::Error::Protocol
}

fn no_arg(name: &'static str) -> VfsError {
    memqlite_vfs::error::Error::ExpectedArg { name }
}

enum Backing {
    /// A volatile database, WAL, or other file, backed by the process-wide content store.
    Volatile {
        content: Arc<Mutex<Content>>,
        /// For a WAL handle, the paired database's content (used to adopt its page size).
        db: Option<Arc<Mutex<Content>>>,
    },
    /// A temporary file, delegated to the host OS rather than tracked in [Root].
    Temp(File),
}

pub struct VolatileHandle {
    root: Arc<Root>,
    name: Option<String>,
    backing: Backing,
    delete_on_close: bool,
    lock: LockKind,
}

impl VolatileHandle {
    pub fn open_volatile(
        root: Arc<Root>,
        name: String,
        content: Arc<Mutex<Content>>,
        db: Option<Arc<Mutex<Content>>>,
        delete_on_close: bool,
    ) -> Self {
        VolatileHandle {
            root,
            name: Some(name),
            backing: Backing::Volatile { content, db },
            delete_on_close,
            lock: LockKind::None,
        }
    }

    pub fn open_temp(root: Arc<Root>) -> Result<Self, Error> {
        let file = tempfile::tempfile().map_err(|_| Error::UnsupportedTruncate)?;
        Ok(VolatileHandle {
            root,
            name: None,
            backing: Backing::Temp(file),
            delete_on_close: true,
            lock: LockKind::None,
        })
    }
}

impl Drop for VolatileHandle {
    fn drop(&mut self) {
        if let Some(name) = &self.name {
            self.root.close(name, self.delete_on_close);
        }
    }
}

fn read_db(content: &Content, buf: &mut [u8], offset: u64) -> Result<(), VfsError> {
    let page_size = content.page_size as u64;
    if offset < page_size {
        let page = content.page_lookup(1).ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
        let src = page.buf.get(start..end).ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
        buf.copy_from_slice(src);
        return Ok(());
    }
    if page_size == 0 || offset % page_size != 0 || buf.len() as u64 != page_size {
        return Err(Error::Misaligned {
            offset,
            page_size: content.page_size,
        }
        .into());
    }
    let pgno = (offset / page_size) as u32 + 1;
    let page = content.page_lookup(pgno).ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
    buf.copy_from_slice(&page.buf);
    Ok(())
}

fn read_wal(
    content: &mut Content,
    db: Option<&Arc<Mutex<Content>>>,
    buf: &mut [u8],
    offset: u64,
) -> Result<(), VfsError> {
    if content.page_size == 0 {
        if let Some(db) = db {
            content.page_size = db.lock().unwrap().page_size;
        }
    }
    let page_size = content.page_size as u64;
    let amount = buf.len() as u64;

    if offset == 0 && amount == WAL_HDR_SIZE as u64 {
        let header = content.wal_header.ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
        buf.copy_from_slice(&header);
        return Ok(());
    }
    if offset == WAL_FRAME_HDR_SIZE as u64 && amount == 8 {
        let header = content.wal_header.ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
        buf.copy_from_slice(&header[24..32]);
        return Ok(());
    }
    if offset < WAL_HDR_SIZE as u64 || page_size == 0 {
        return Err(memqlite_vfs::error::Error::UnexpectedEof);
    }

    let frame_size = WAL_FRAME_HDR_SIZE as u64 + page_size;
    let pgno = (offset - WAL_HDR_SIZE as u64) / frame_size + 1;
    let page = content
        .page_lookup(pgno as u32)
        .ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;

    if amount == WAL_FRAME_HDR_SIZE as u64 {
        let fh = page.frame_header.ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
        buf.copy_from_slice(&fh);
    } else if amount == 8 {
        let fh = page.frame_header.ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
        buf.copy_from_slice(&fh[16..24]);
    } else if amount == page_size {
        buf.copy_from_slice(&page.buf);
    } else if amount == WAL_FRAME_HDR_SIZE as u64 + page_size {
        let fh = page.frame_header.ok_or(memqlite_vfs::error::Error::UnexpectedEof)?;
        let (head, body) = buf.split_at_mut(WAL_FRAME_HDR_SIZE);
        head.copy_from_slice(&fh);
        body.copy_from_slice(&page.buf);
    } else {
        return Err(memqlite_vfs::error::Error::UnexpectedEof);
    }
    Ok(())
}

fn write_db(content: &mut Content, buf: &[u8], offset: u64) -> Result<(), VfsError> {
    if offset == 0 {
        let encoded = header::read_db_page_size(buf);
        validate_page_size(encoded)?;
        content.set_page_size(encoded)?;
        let page = content.page_get(1)?;
        let len = buf.len().min(page.buf.len());
        page.buf[..len].copy_from_slice(&buf[..len]);
        return Ok(());
    }
    let page_size = content.page_size as u64;
    if page_size == 0 || offset % page_size != 0 || buf.len() as u64 != page_size {
        return Err(Error::Misaligned {
            offset,
            page_size: content.page_size,
        }
        .into());
    }
    let pgno = (offset / page_size) as u32 + 1;
    let page = content.page_get(pgno)?;
    page.buf.copy_from_slice(buf);
    Ok(())
}

fn write_wal(
    content: &mut Content,
    db: Option<&Arc<Mutex<Content>>>,
    buf: &[u8],
    offset: u64,
) -> Result<(), VfsError> {
    if content.page_size == 0 {
        if let Some(db) = db {
            content.page_size = db.lock().unwrap().page_size;
        }
    }
    let page_size = content.page_size as u64;
    let amount = buf.len() as u64;

    if offset == 0 && amount == WAL_HDR_SIZE as u64 {
        let encoded = header::read_wal_page_size(buf);
        if content.page_size != 0 && encoded != content.page_size {
            return Err(corrupt());
        }
        let mut header_buf = [0u8; WAL_HDR_SIZE];
        header_buf.copy_from_slice(buf);
        content.page_size = encoded;
        content.wal_header = Some(header_buf);
        return Ok(());
    }

    if offset < WAL_HDR_SIZE as u64 || page_size == 0 {
        return Err(Error::Misaligned {
            offset,
            page_size: content.page_size,
        }
        .into());
    }

    let frame_size = WAL_FRAME_HDR_SIZE as u64 + page_size;
    let pgno = (offset - WAL_HDR_SIZE as u64) / frame_size + 1;

    if amount == WAL_FRAME_HDR_SIZE as u64 {
        let page = content.page_get(pgno as u32)?;
        let mut fh = [0u8; WAL_FRAME_HDR_SIZE];
        fh.copy_from_slice(buf);
        page.frame_header = Some(fh);
    } else if amount == page_size {
        let page = content.page_get(pgno as u32)?;
        page.buf.copy_from_slice(buf);
    } else if amount == WAL_FRAME_HDR_SIZE as u64 + page_size {
        let page = content.page_get(pgno as u32)?;
        let (head, body) = buf.split_at(WAL_FRAME_HDR_SIZE);
        let mut fh = [0u8; WAL_FRAME_HDR_SIZE];
        fh.copy_from_slice(head);
        page.frame_header = Some(fh);
        page.buf.copy_from_slice(body);
    } else {
        return Err(Error::Misaligned {
            offset,
            page_size: content.page_size,
        }
        .into());
    }
    Ok(())
}

impl DatabaseHandle for VolatileHandle {
    type Error = Error;

    fn size(&self) -> Result<u64, VfsError> {
        match &self.backing {
            Backing::Temp(file) => Ok(file
                .metadata()
                .map_err(|_| memqlite_vfs::error::Error::UnexpectedEof)?
                .len()),
            Backing::Volatile { content, .. } => Ok(content.lock().unwrap().file_size()),
        }
    }

    fn read_exact_at(&mut self, buf: &mut [u8], offset: u64) -> Result<(), VfsError> {
        match &self.backing {
            Backing::Temp(file) => file
                .read_exact_at(buf, offset)
                .map_err(|_| memqlite_vfs::error::Error::UnexpectedEof),
            Backing::Volatile { content, db } => {
                let mut content = content.lock().unwrap();
                if content.is_empty() {
                    buf.fill(0);
                    return Err(memqlite_vfs::error::Error::UnexpectedEof);
                }
                match content.kind {
                    Kind::Db => read_db(&content, buf, offset),
                    Kind::Wal => read_wal(&mut content, db.as_ref(), buf, offset),
                    Kind::Other => {
                        buf.fill(0);
                        Err(memqlite_vfs::error::Error::UnexpectedEof)
                    }
                }
            }
        }
    }

    fn write_all_at(&mut self, buf: &[u8], offset: u64) -> Result<(), VfsError> {
        match &self.backing {
            Backing::Temp(file) => file
                .write_all_at(buf, offset)
                .map_err(|_| memqlite_vfs::error::Error::WriteZero),
            Backing::Volatile { content, db } => {
                let mut content = content.lock().unwrap();
                match content.kind {
                    Kind::Db => write_db(&mut content, buf, offset),
                    Kind::Wal => write_wal(&mut content, db.as_ref(), buf, offset),
                    Kind::Other => Ok(()),
                }
            }
        }
    }

    fn sync(&mut self, _data_only: bool) -> Result<(), VfsError> {
        match &self.backing {
            Backing::Temp(file) => file
                .sync_all()
                .map_err(|_| memqlite_vfs::error::Error::UnexpectedEof),
            Backing::Volatile { .. } => Err(Error::UnsupportedTruncate.into()),
        }
    }

    fn set_len(&mut self, size: u64) -> Result<(), VfsError> {
        match &self.backing {
            Backing::Temp(file) => file
                .set_len(size)
                .map_err(|_| memqlite_vfs::error::Error::UnexpectedEof),
            Backing::Volatile { content, .. } => {
                let mut content = content.lock().unwrap();
                match content.kind {
                    Kind::Db => {
                        let page_size = content.page_size.max(1) as u64;
                        if size % page_size != 0 {
                            return Err(Error::Misaligned {
                                offset: size,
                                page_size: content.page_size,
                            }
                            .into());
                        }
                        content
                            .truncate((size / page_size) as usize)
                            .map_err(Into::into)
                    }
                    Kind::Wal => {
                        if size != 0 {
                            return Err(protocol());
                        }
                        content.truncate(0).map_err(Into::into)
                    }
                    Kind::Other => Err(Error::UnsupportedTruncate.into()),
                }
            }
        }
    }

    fn lock(&mut self, lock: LockKind) -> Result<bool, VfsError> {
        self.lock = lock;
        Ok(true)
    }

    fn unlock(&mut self, lock: LockKind) -> Result<bool, VfsError> {
        self.lock = lock;
        Ok(true)
    }

    fn reserved(&mut self) -> Result<bool, VfsError> {
        Ok(true)
    }

    fn current_lock(&self) -> Result<LockKind, VfsError> {
        Ok(self.lock)
    }

    fn pragma(&mut self, pragma: Pragma<'_>) -> Result<Option<String>, VfsError> {
        let content = match &self.backing {
            Backing::Volatile { content, .. } => content,
            Backing::Temp(_) => return Err(no_arg("pragma")),
        };

        match pragma.name {
            "page_size" => {
                if let Some(value) = pragma.value {
                    if let Ok(size) = value.parse::<u32>() {
                        if validate_page_size(size).is_ok() {
                            if let Err(err @ Error::PageSizeFixed { .. }) =
                                content.lock().unwrap().set_page_size(size)
                            {
                                return Err(err.into());
                            }
                        }
                    }
                }
                Err(no_arg("page_size"))
            }
            "journal_mode" => {
                if let Some(value) = pragma.value {
                    if !value.eq_ignore_ascii_case("wal") {
                        return Err(Error::UnsupportedJournalMode {
                            mode: value.to_string(),
                        }
                        .into());
                    }
                }
                Err(no_arg("journal_mode"))
            }
            name => Err(no_arg(name)),
        }
    }

    fn shm_map(
        &mut self,
        region: u32,
        region_size: u32,
        extend: bool,
    ) -> Result<Option<*mut u8>, VfsError> {
        let Backing::Volatile { content, .. } = &self.backing else {
            return Ok(None);
        };
        let mut content = content.lock().unwrap();
        if content.shm.is_none() {
            content.shm = Some(Shm::new(region_size));
        }
        content
            .shm
            .as_mut()
            .unwrap()
            .map(region, region_size, extend)
            .map_err(Into::into)
    }

    fn shm_lock(&mut self, offset: u8, n: u8, flags: ShmLockFlags) -> Result<bool, VfsError> {
        let Backing::Volatile { content, .. } = &self.backing else {
            return Ok(true);
        };
        let mut content = content.lock().unwrap();
        let shm = content.shm.get_or_insert_with(|| Shm::new(32768));
        Ok(shm.lock(offset, n, flags.lock, flags.exclusive))
    }

    fn shm_unmap(&mut self, _delete: bool) -> Result<(), VfsError> {
        Ok(())
    }
}
