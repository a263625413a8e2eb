#![allow(clippy::question_mark)]
//! Bridge a synchronous Rust VFS implementation to SQLite's C VFS ABI.
//!
//! Implement [DatabaseHandle] and [Vfs], then call [register]. Unlike a VFS backed by
//! remote storage, every method here runs to completion without suspending, so the traits
//! are plain `fn`s rather than `async fn`s.

pub mod error;
pub mod io;
pub mod state;
pub mod vfs;

use std::borrow::Cow;
use std::ffi::CString;
use std::mem::size_of;
use std::ptr::null_mut;
use std::sync::Arc;
use std::time::Duration;

use state::{FileState, State};

/// One SQLite PRAGMA directed at a file, along with an optional value being set.
#[derive(Debug, Clone, Copy)]
pub struct Pragma<'a> {
    pub name: &'a str,
    pub value: Option<&'a str>,
}

/// A file opened by a [Vfs].
pub trait DatabaseHandle {
    type Error: std::error::Error;

    /// Return the current size in bytes of the database.
    fn size(&self) -> Result<u64, crate::error::Error<Self::Error>>;

    /// Reads the exact number of bytes required to fill `buf` from the given `offset`.
    fn read_exact_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(), crate::error::Error<Self::Error>>;

    /// Attempts to write an entire `buf` starting from the given `offset`.
    fn write_all_at(
        &mut self,
        buf: &[u8],
        offset: u64,
    ) -> Result<(), crate::error::Error<Self::Error>>;

    /// Make sure all writes are committed. `data_only` requests skipping metadata sync.
    fn sync(&mut self, data_only: bool) -> Result<(), crate::error::Error<Self::Error>>;

    /// Set the file to the specified `size`, truncating or extending it.
    fn set_len(&mut self, size: u64) -> Result<(), crate::error::Error<Self::Error>>;

    /// Lock the file. Returns whether the requested lock could be acquired.
    fn lock(&mut self, lock: LockKind) -> Result<bool, crate::error::Error<Self::Error>>;

    /// Unlock the file.
    fn unlock(&mut self, lock: LockKind) -> Result<bool, crate::error::Error<Self::Error>> {
        self.lock(lock)
    }

    /// Check if this handle's file holds a [LockKind::Reserved], [LockKind::Pending], or
    /// [LockKind::Exclusive] lock.
    fn reserved(&mut self) -> Result<bool, crate::error::Error<Self::Error>>;

    /// Return the current [LockKind] of this handle.
    fn current_lock(&self) -> Result<LockKind, crate::error::Error<Self::Error>>;

    fn set_chunk_size(&self, _chunk_size: usize) -> Result<(), crate::error::Error<Self::Error>> {
        Ok(())
    }

    /// Check if the underlying data got moved or deleted since being opened.
    fn moved(&self) -> Result<bool, crate::error::Error<Self::Error>> {
        Ok(false)
    }

    /// Handle a PRAGMA directed at this file. `Ok(None)` means "handled, no result string";
    /// an `Error::ExpectedArg`-shaped failure or any other error falls back to
    /// `SQLITE_NOTFOUND` so SQLite's own pragma processing continues.
    fn pragma(
        &mut self,
        pragma: Pragma<'_>,
    ) -> Result<Option<String>, crate::error::Error<Self::Error>> {
        let _ = pragma;
        Err(crate::error::Error::ExpectedArg { name: "pragma" })
    }

    /// Map shared-memory region `region` into process memory, extending the SHM to cover it
    /// if `extend` is set and the region does not exist yet. Returns `None` when the region
    /// is absent and `extend` is false.
    fn shm_map(
        &mut self,
        region: u32,
        region_size: u32,
        extend: bool,
    ) -> Result<Option<*mut u8>, crate::error::Error<Self::Error>>;

    /// Acquire or release a span of shared-memory locks.
    fn shm_lock(
        &mut self,
        offset: u8,
        n: u8,
        flags: ShmLockFlags,
    ) -> Result<bool, crate::error::Error<Self::Error>>;

    /// Memory barrier for shared-memory access. Default no-op (single process).
    fn shm_barrier(&mut self) {}

    /// Unmap shared memory, deleting the backing region set if `delete` is set.
    fn shm_unmap(&mut self, delete: bool) -> Result<(), crate::error::Error<Self::Error>>;
}

/// Flags describing a `shm_lock` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmLockFlags {
    pub lock: bool,
    pub exclusive: bool,
}

/// A virtual file system for SQLite.
pub trait Vfs {
    type Handle: DatabaseHandle<Error = Self::Error>;
    type Error: std::error::Error;

    /// Open the database `db` (of type `opts.kind`).
    fn open(
        &self,
        db: &str,
        opts: OpenOptions,
    ) -> Result<Self::Handle, crate::error::Error<Self::Error>>;

    /// Delete the database `db`.
    fn delete(&self, db: &str) -> Result<(), crate::error::Error<Self::Error>>;

    /// Check if a database `db` already exists.
    fn exists(&self, db: &str) -> Result<bool, crate::error::Error<Self::Error>>;

    /// Generate and return a path for a temporary database.
    fn temporary_name(&self) -> String;

    /// Populate the `buffer` with random data.
    fn random(&self, buffer: &mut [i8]);

    /// Sleep for `duration`. Return the duration actually slept.
    fn sleep(&self, duration: Duration) -> Duration;

    /// Check access to `db`. The default implementation always returns `true`.
    fn access(&self, _db: &str, _write: bool) -> Result<bool, crate::error::Error<Self::Error>> {
        Ok(true)
    }

    /// Retrieve the full pathname of a database `db`.
    fn full_pathname<'a>(
        &self,
        db: &'a str,
    ) -> Result<Cow<'a, str>, crate::error::Error<Self::Error>> {
        Ok(db.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    /// The object type that is being opened.
    pub kind: OpenKind,

    /// The access an object is opened with.
    pub access: OpenAccess,

    /// The file should be deleted when it is closed.
    delete_on_close: bool,
}

/// The object type that is being opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpenKind {
    MainDb,
    MainJournal,
    TempDb,
    TempJournal,
    TransientDb,
    SubJournal,
    SuperJournal,
    Wal,
}

/// The access an object is opened with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpenAccess {
    /// Read access.
    Read,

    /// Write access (includes read access).
    Write,

    /// Create the file if it does not exist (includes write and read access).
    Create,

    /// Create the file, but throw if it already exists (includes write and read access).
    CreateNew,
}

/// The lock state a file handle may hold, following SQLite's locking state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// No locks are held. This is the default state.
    None,

    /// The database may be read but not written. Any number of handles can hold [LockKind::Shared]
    /// locks at the same time.
    Shared,

    /// A single writer is planning to write soon but is still only reading. Coexists with
    /// [LockKind::Shared] locks from other handles.
    Reserved,

    /// The holder wants to write as soon as all [LockKind::Shared] locks clear. No new
    /// [LockKind::Shared] locks are granted while pending, though existing ones may continue.
    Pending,

    /// Required to write. Excludes every other lock.
    Exclusive,
}

/// Register a virtual file system ([Vfs]) with SQLite.
pub fn register<F: DatabaseHandle<Error = V::Error>, V: Vfs<Handle = F>>(
    name: &str,
    vfs: V,
    as_default: bool,
) -> Result<(), RegisterError> {
    let io_methods = libsqlite3_sys::sqlite3_io_methods {
        iVersion: 2,
        xClose: Some(io::close::<V, F>),
        xRead: Some(io::read::<V, F>),
        xWrite: Some(io::write::<V, F>),
        xTruncate: Some(io::truncate::<V, F>),
        xSync: Some(io::sync::<V, F>),
        xFileSize: Some(io::file_size::<V, F>),
        xLock: Some(io::lock::<V, F>),
        xUnlock: Some(io::unlock::<V, F>),
        xCheckReservedLock: Some(io::check_reserved_lock::<V, F>),
        xFileControl: Some(io::file_control::<V, F>),
        xSectorSize: Some(io::sector_size::<F>),
        xDeviceCharacteristics: Some(io::device_characteristics::<V, F>),
        xShmMap: Some(io::shm_map::<V, F>),
        xShmLock: Some(io::shm_lock::<V, F>),
        xShmBarrier: Some(io::shm_barrier::<V, F>),
        xShmUnmap: Some(io::shm_unmap::<V, F>),
        xFetch: None,
        xUnfetch: None,
    };
    let name = CString::new(name).map_err(RegisterError::Nul)?;
    let name_ptr = name.as_ptr();
    let ptr = Box::into_raw(Box::new(State {
        name,
        vfs: Arc::new(vfs),
        io_methods,
        last_error: Default::default(),
        next_id: 0,
    }));
    let vfs = Box::into_raw(Box::new(libsqlite3_sys::sqlite3_vfs {
        iVersion: 2,
        szOsFile: size_of::<FileState<V, F>>() as i32,
        mxPathname: MAX_PATH_LENGTH as i32,
        pNext: null_mut(),
        zName: name_ptr,
        pAppData: ptr as _,
        xOpen: Some(vfs::open::<F, V>),
        xDelete: Some(vfs::delete::<V>),
        xAccess: Some(vfs::access::<V>),
        xFullPathname: Some(vfs::full_pathname::<V>),
        xDlOpen: Some(vfs::dlopen::<V>),
        xDlError: Some(vfs::dlerror::<V>),
        xDlSym: Some(vfs::dlsym::<V>),
        xDlClose: Some(vfs::dlclose::<V>),
        xRandomness: Some(vfs::randomness::<V>),
        xSleep: Some(vfs::sleep::<V>),
        xCurrentTime: Some(vfs::current_time::<V>),
        xGetLastError: Some(vfs::get_last_error::<V>),
        xCurrentTimeInt64: Some(vfs::current_time_int64::<V>),
        xSetSystemCall: None,
        xGetSystemCall: None,
        xNextSystemCall: None,
    }));

    let result = unsafe { libsqlite3_sys::sqlite3_vfs_register(vfs, as_default as i32) };
    if result != libsqlite3_sys::SQLITE_OK {
        return Err(RegisterError::Register(result));
    }

    Ok(())
}

const MAX_PATH_LENGTH: usize = 512;

impl OpenOptions {
    fn from_flags(flags: i32) -> Option<Self> {
        Some(OpenOptions {
            kind: OpenKind::from_flags(flags)?,
            access: OpenAccess::from_flags(flags)?,
            delete_on_close: flags & libsqlite3_sys::SQLITE_OPEN_DELETEONCLOSE > 0,
        })
    }

    fn to_flags(&self) -> i32 {
        self.kind.to_flags()
            | self.access.to_flags()
            | if self.delete_on_close {
                libsqlite3_sys::SQLITE_OPEN_DELETEONCLOSE
            } else {
                0
            }
    }
}

impl OpenKind {
    fn from_flags(flags: i32) -> Option<Self> {
        match flags {
            flags if flags & libsqlite3_sys::SQLITE_OPEN_MAIN_DB > 0 => Some(Self::MainDb),
            flags if flags & libsqlite3_sys::SQLITE_OPEN_MAIN_JOURNAL > 0 => {
                Some(Self::MainJournal)
            }
            flags if flags & libsqlite3_sys::SQLITE_OPEN_TEMP_DB > 0 => Some(Self::TempDb),
            flags if flags & libsqlite3_sys::SQLITE_OPEN_TEMP_JOURNAL > 0 => {
                Some(Self::TempJournal)
            }
            flags if flags & libsqlite3_sys::SQLITE_OPEN_TRANSIENT_DB > 0 => {
                Some(Self::TransientDb)
            }
            flags if flags & libsqlite3_sys::SQLITE_OPEN_SUBJOURNAL > 0 => Some(Self::SubJournal),
            flags if flags & libsqlite3_sys::SQLITE_OPEN_SUPER_JOURNAL > 0 => {
                Some(Self::SuperJournal)
            }
            flags if flags & libsqlite3_sys::SQLITE_OPEN_WAL > 0 => Some(Self::Wal),
            _ => None,
        }
    }

    fn to_flags(self) -> i32 {
        match self {
            OpenKind::MainDb => libsqlite3_sys::SQLITE_OPEN_MAIN_DB,
            OpenKind::MainJournal => libsqlite3_sys::SQLITE_OPEN_MAIN_JOURNAL,
            OpenKind::TempDb => libsqlite3_sys::SQLITE_OPEN_TEMP_DB,
            OpenKind::TempJournal => libsqlite3_sys::SQLITE_OPEN_TEMP_JOURNAL,
            OpenKind::TransientDb => libsqlite3_sys::SQLITE_OPEN_TRANSIENT_DB,
            OpenKind::SubJournal => libsqlite3_sys::SQLITE_OPEN_SUBJOURNAL,
            OpenKind::SuperJournal => libsqlite3_sys::SQLITE_OPEN_SUPER_JOURNAL,
            OpenKind::Wal => libsqlite3_sys::SQLITE_OPEN_WAL,
        }
    }
}

impl OpenAccess {
    fn from_flags(flags: i32) -> Option<Self> {
        match flags {
            flags
                if (flags & libsqlite3_sys::SQLITE_OPEN_CREATE > 0)
                    && (flags & libsqlite3_sys::SQLITE_OPEN_EXCLUSIVE > 0) =>
            {
                Some(Self::CreateNew)
            }
            flags if flags & libsqlite3_sys::SQLITE_OPEN_CREATE > 0 => Some(Self::Create),
            flags if flags & libsqlite3_sys::SQLITE_OPEN_READWRITE > 0 => Some(Self::Write),
            flags if flags & libsqlite3_sys::SQLITE_OPEN_READONLY > 0 => Some(Self::Read),
            _ => None,
        }
    }

    fn to_flags(self) -> i32 {
        match self {
            OpenAccess::Read => libsqlite3_sys::SQLITE_OPEN_READONLY,
            OpenAccess::Write => libsqlite3_sys::SQLITE_OPEN_READWRITE,
            OpenAccess::Create => {
                libsqlite3_sys::SQLITE_OPEN_READWRITE | libsqlite3_sys::SQLITE_OPEN_CREATE
            }
            OpenAccess::CreateNew => {
                libsqlite3_sys::SQLITE_OPEN_READWRITE
                    | libsqlite3_sys::SQLITE_OPEN_CREATE
                    | libsqlite3_sys::SQLITE_OPEN_EXCLUSIVE
            }
        }
    }
}

impl LockKind {
    fn from_i32(lock: i32) -> Option<Self> {
        Some(match lock {
            libsqlite3_sys::SQLITE_LOCK_NONE => Self::None,
            libsqlite3_sys::SQLITE_LOCK_SHARED => Self::Shared,
            libsqlite3_sys::SQLITE_LOCK_RESERVED => Self::Reserved,
            libsqlite3_sys::SQLITE_LOCK_PENDING => Self::Pending,
            libsqlite3_sys::SQLITE_LOCK_EXCLUSIVE => Self::Exclusive,
            _ => return None,
        })
    }

    fn to_i32(self) -> i32 {
        match self {
            Self::None => libsqlite3_sys::SQLITE_LOCK_NONE,
            Self::Shared => libsqlite3_sys::SQLITE_LOCK_SHARED,
            Self::Reserved => libsqlite3_sys::SQLITE_LOCK_RESERVED,
            Self::Pending => libsqlite3_sys::SQLITE_LOCK_PENDING,
            Self::Exclusive => libsqlite3_sys::SQLITE_LOCK_EXCLUSIVE,
        }
    }
}

impl PartialOrd for LockKind {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.to_i32().partial_cmp(&other.to_i32())
    }
}

impl Default for LockKind {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug)]
pub enum RegisterError {
    Nul(std::ffi::NulError),
    Register(i32),
}

impl std::error::Error for RegisterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Nul(err) => Some(err),
            Self::Register(_) => None,
        }
    }
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nul(_) => f.write_str("interior nul byte in name found"),
            Self::Register(code) => {
                write!(f, "registering sqlite vfs failed with error code: {}", code)
            }
        }
    }
}

impl From<std::ffi::NulError> for RegisterError {
    fn from(err: std::ffi::NulError) -> Self {
        Self::Nul(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_order() {
        assert!(LockKind::None < LockKind::Shared);
        assert!(LockKind::Shared < LockKind::Reserved);
        assert!(LockKind::Reserved < LockKind::Pending);
        assert!(LockKind::Pending < LockKind::Exclusive);
    }
}
