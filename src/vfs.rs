//! The concrete volatile [memqlite_vfs::Vfs] wiring [Root] and [VolatileHandle] together.

use std::sync::Arc;
use std::time::Duration;

use memqlite_vfs::{OpenAccess, OpenKind, OpenOptions, Vfs};
use rand::RngCore;

use crate::error::Error;
use crate::handle::VolatileHandle;
use crate::root::Root;

type VfsError = memqlite_vfs::error::Error<Error>;

pub struct VolatileVfs {
    root: Arc<Root>,
}

impl VolatileVfs {
    pub fn new() -> Self {
        VolatileVfs {
            root: Arc::new(Root::new()),
        }
    }
}

impl Default for VolatileVfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs for VolatileVfs {
    type Handle = VolatileHandle;
    type Error = Error;

    fn open(&self, db: &str, opts: OpenOptions) -> Result<Self::Handle, VfsError> {
        match opts.kind {
            OpenKind::TempDb | OpenKind::TempJournal | OpenKind::TransientDb | OpenKind::SubJournal => {
                VolatileHandle::open_temp(self.root.clone()).map_err(Into::into)
            }
            OpenKind::MainDb | OpenKind::MainJournal | OpenKind::Wal | OpenKind::SuperJournal => {
                let create = matches!(opts.access, OpenAccess::Create | OpenAccess::CreateNew);
                let exclusive = matches!(opts.access, OpenAccess::CreateNew);
                let (content, db_content) = match self.root.open(db, create, exclusive) {
                    Ok(pair) => pair,
                    Err(Error::OrphanWal) => return Err(memqlite_vfs::error::Error::Corrupt),
                    Err(err) => return Err(err.into()),
                };
                Ok(VolatileHandle::open_volatile(
                    self.root.clone(),
                    db.to_string(),
                    content,
                    db_content,
                    false,
                ))
            }
        }
    }

    fn delete(&self, db: &str) -> Result<(), VfsError> {
        match self.root.delete(db) {
            Ok(()) => Ok(()),
            Err(Error::NotFound { name }) => Err(memqlite_vfs::error::Error::DbNotFound { name }),
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, db: &str) -> Result<bool, VfsError> {
        Ok(self.root.access(db))
    }

    fn access(&self, db: &str, _write: bool) -> Result<bool, VfsError> {
        Ok(self.root.access(db))
    }

    fn temporary_name(&self) -> String {
        format!("memqlite-temp-{:016x}", rand::thread_rng().next_u64())
    }

    fn random(&self, buffer: &mut [i8]) {
        let bytes = unsafe { std::slice::from_raw_parts_mut(buffer.as_mut_ptr() as *mut u8, buffer.len()) };
        rand::thread_rng().fill_bytes(bytes);
    }

    fn sleep(&self, duration: Duration) -> Duration {
        std::thread::sleep(duration);
        duration
    }
}
