use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::mem::{self, MaybeUninit};
use std::slice;

use crate::error::Error;
use crate::state::{file_state, null_ptr_error, FileState};
use crate::{DatabaseHandle, LockKind, Pragma, ShmLockFlags, Vfs};

fn close_inner<V: Vfs, F: DatabaseHandle>(file: *mut libsqlite3_sys::sqlite3_file) -> c_int {
    if let Some(f) = unsafe { (file as *mut FileState<V, F>).as_mut() } {
        let ext = unsafe { f.ext.assume_init_mut() };
        if ext.delete_on_close {
            if let Err(err) = Vfs::delete(&*ext.vfs, &ext.db_name) {
                return ext.set_last_error(libsqlite3_sys::SQLITE_DELETE, err);
            }
        }

        let ext = mem::replace(&mut f.ext, MaybeUninit::uninit());
        let ext = unsafe { ext.assume_init() }; // extract the value to drop it
        log::trace!("[{}] close ({})", ext.id, ext.db_name);
    }

    libsqlite3_sys::SQLITE_OK
}

fn read_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    z_buf: *mut c_void,
    i_amt: c_int,
    i_ofst: libsqlite3_sys::sqlite3_int64,
) -> c_int {
    let state = unsafe {
        match file_state::<V, F>(p_file) {
            Ok(f) => f,
            Err(_) => return libsqlite3_sys::SQLITE_IOERR_READ,
        }
    };
    log::trace!(
        "[{}] read offset={} len={} ({})",
        state.id,
        i_ofst,
        i_amt,
        state.db_name
    );

    let out = unsafe { slice::from_raw_parts_mut(z_buf as *mut u8, i_amt as usize) };
    if let Err(err) = state.file.read_exact_at(out, i_ofst as u64) {
        if let Error::UnexpectedEof = err {
            return libsqlite3_sys::SQLITE_IOERR_SHORT_READ;
        }
        return state.set_last_error(libsqlite3_sys::SQLITE_IOERR_READ, err);
    }

    libsqlite3_sys::SQLITE_OK
}

unsafe fn write_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    z: *const c_void,
    i_amt: c_int,
    i_ofst: libsqlite3_sys::sqlite3_int64,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_WRITE,
    };
    log::trace!(
        "[{}] write offset={} len={} ({})",
        state.id,
        i_ofst,
        i_amt,
        state.db_name
    );

    let data = slice::from_raw_parts(z as *const u8, i_amt as usize);
    match state.file.write_all_at(data, i_ofst as u64) {
        Ok(_) => {}
        Err(Error::WriteZero) => return libsqlite3_sys::SQLITE_FULL,
        Err(err @ Error::Corrupt) => return state.set_last_error(libsqlite3_sys::SQLITE_CORRUPT, err),
        Err(err) => return state.set_last_error(libsqlite3_sys::SQLITE_IOERR_WRITE, err),
    }

    libsqlite3_sys::SQLITE_OK
}

unsafe fn truncate_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    size: libsqlite3_sys::sqlite3_int64,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_TRUNCATE,
    };

    let size: u64 = if let Some(chunk_size) = state.chunk_size {
        (((size as usize + chunk_size - 1) / chunk_size) * chunk_size) as u64
    } else {
        size as u64
    };

    log::trace!("[{}] truncate size={} ({})", state.id, size, state.db_name);

    match state.file.set_len(size) {
        Ok(()) => {}
        Err(err @ Error::Protocol) => {
            return state.set_last_error(libsqlite3_sys::SQLITE_PROTOCOL, err);
        }
        Err(err) => return state.set_last_error(libsqlite3_sys::SQLITE_IOERR_TRUNCATE, err),
    }

    libsqlite3_sys::SQLITE_OK
}

unsafe fn sync_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    flags: c_int,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_FSYNC,
    };
    log::trace!("[{}] sync ({})", state.id, state.db_name);

    if let Err(err) = state
        .file
        .sync(flags & libsqlite3_sys::SQLITE_SYNC_DATAONLY > 0)
    {
        return state.set_last_error(libsqlite3_sys::SQLITE_IOERR_FSYNC, err);
    }

    libsqlite3_sys::SQLITE_OK
}

unsafe fn file_size_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    p_size: *mut libsqlite3_sys::sqlite3_int64,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_FSTAT,
    };
    log::trace!("[{}] file_size ({})", state.id, state.db_name);

    if let Err(err) = state.file.size().and_then(|n| {
        let p_size: &mut libsqlite3_sys::sqlite3_int64 =
            p_size.as_mut().ok_or_else(null_ptr_error::<V::Error>)?;
        *p_size = n as libsqlite3_sys::sqlite3_int64;
        Ok(())
    }) {
        return state.set_last_error(libsqlite3_sys::SQLITE_IOERR_FSTAT, err);
    }

    libsqlite3_sys::SQLITE_OK
}

unsafe fn lock_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    e_lock: c_int,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_LOCK,
    };
    log::trace!("[{}] lock ({})", state.id, state.db_name);

    let lock = match LockKind::from_i32(e_lock) {
        Some(lock) => lock,
        None => return libsqlite3_sys::SQLITE_IOERR_LOCK,
    };
    match state.file.lock(lock) {
        Ok(true) => {
            state.has_exclusive_lock = lock == LockKind::Exclusive;
            log::trace!("[{}] lock={:?} ({})", state.id, lock, state.db_name);
            libsqlite3_sys::SQLITE_OK
        }
        Ok(false) => {
            log::trace!(
                "[{}] busy (denied {:?}) ({})",
                state.id,
                lock,
                state.db_name
            );
            libsqlite3_sys::SQLITE_BUSY
        }
        Err(err) => state.set_last_error(libsqlite3_sys::SQLITE_IOERR_LOCK, err),
    }
}

unsafe fn unlock_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    e_lock: c_int,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_UNLOCK,
    };
    log::trace!("[{}] unlock ({})", state.id, state.db_name);

    let lock = match LockKind::from_i32(e_lock) {
        Some(lock) => lock,
        None => return libsqlite3_sys::SQLITE_IOERR_UNLOCK,
    };
    match state.file.unlock(lock) {
        Ok(true) => {
            state.has_exclusive_lock = lock == LockKind::Exclusive;
            log::trace!("[{}] unlock={:?} ({})", state.id, lock, state.db_name);
            libsqlite3_sys::SQLITE_OK
        }
        Ok(false) => libsqlite3_sys::SQLITE_BUSY,
        Err(err) => state.set_last_error(libsqlite3_sys::SQLITE_IOERR_UNLOCK, err),
    }
}

unsafe fn check_reserved_lock_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_CHECKRESERVEDLOCK,
    };
    log::trace!("[{}] check_reserved_lock ({})", state.id, state.db_name);

    if let Err(err) = state.file.reserved().and_then(|is_reserved| {
        let p_res_out: &mut c_int = p_res_out.as_mut().ok_or_else(null_ptr_error)?;
        *p_res_out = is_reserved as c_int;
        Ok(())
    }) {
        return state.set_last_error(libsqlite3_sys::SQLITE_IOERR_CHECKRESERVEDLOCK, err);
    }

    libsqlite3_sys::SQLITE_OK
}

/// Pull `name = value` (or bare `name`) out of a `PRAGMA` file-control argument.
unsafe fn parse_pragma<'a>(p_arg: *mut c_void) -> Option<(&'a str, Option<&'a str>)> {
    // SQLite passes an array of two or three NUL-terminated strings: [name, value, err-out].
    let parr = p_arg as *mut *const c_char;
    let name = (*parr.offset(0)).as_ref().and_then(|_| {
        CStr::from_ptr(*parr.offset(0)).to_str().ok()
    })?;
    let value_ptr = *parr.offset(1);
    let value = if value_ptr.is_null() {
        None
    } else {
        CStr::from_ptr(value_ptr).to_str().ok()
    };
    Some((name, value))
}

unsafe fn file_control_inner<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    op: c_int,
    p_arg: *mut c_void,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_NOTFOUND,
    };
    log::trace!("[{}] file_control op={} ({})", state.id, op, state.db_name);

    // Docs: https://www.sqlite.org/c3ref/c_fcntl_begin_atomic_write.html
    match op {
        libsqlite3_sys::SQLITE_FCNTL_FILE_POINTER
        | libsqlite3_sys::SQLITE_FCNTL_VFS_POINTER
        | libsqlite3_sys::SQLITE_FCNTL_JOURNAL_POINTER
        | libsqlite3_sys::SQLITE_FCNTL_DATA_VERSION
        | libsqlite3_sys::SQLITE_FCNTL_RESERVE_BYTES => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_SYNC_OMITTED => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_LOCKSTATE => match state.file.current_lock() {
            Ok(lock) => {
                if let Some(p_arg) = (p_arg as *mut i32).as_mut() {
                    *p_arg = lock as i32;
                }
                libsqlite3_sys::SQLITE_OK
            }
            Err(err) => state.set_last_error(libsqlite3_sys::SQLITE_ERROR, err),
        },

        libsqlite3_sys::SQLITE_FCNTL_GET_LOCKPROXYFILE
        | libsqlite3_sys::SQLITE_FCNTL_SET_LOCKPROXYFILE => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_LAST_ERRNO => {
            if let Some(p_arg) = (p_arg as *mut i32).as_mut() {
                *p_arg = state.last_errno;
            }
            libsqlite3_sys::SQLITE_OK
        }

        libsqlite3_sys::SQLITE_FCNTL_SIZE_HINT => {
            let size_hint = match (p_arg as *mut i64)
                .as_ref()
                .cloned()
                .and_then(|s| u64::try_from(s).ok())
            {
                Some(chunk_size) => chunk_size,
                None => {
                    return state.set_last_error(
                        libsqlite3_sys::SQLITE_NOTFOUND,
                        Error::ExpectedArg { name: "size_hint" },
                    );
                }
            };

            let current = match state.file.size() {
                Ok(size) => size,
                Err(err) => return state.set_last_error(libsqlite3_sys::SQLITE_ERROR, err),
            };

            if current > size_hint {
                return libsqlite3_sys::SQLITE_OK;
            }

            if let Some(chunk_size) = state.chunk_size {
                let chunk_size = chunk_size as u64;
                let size = ((size_hint + chunk_size - 1) / chunk_size) * chunk_size;
                if let Err(err) = state.file.set_len(size) {
                    return state.set_last_error(libsqlite3_sys::SQLITE_IOERR_TRUNCATE, err);
                }
            } else if let Err(err) = state.file.set_len(size_hint) {
                return state.set_last_error(libsqlite3_sys::SQLITE_IOERR_TRUNCATE, err);
            }

            libsqlite3_sys::SQLITE_OK
        }

        libsqlite3_sys::SQLITE_FCNTL_CHUNK_SIZE => {
            let chunk_size = match (p_arg as *mut i32)
                .as_ref()
                .cloned()
                .and_then(|s| usize::try_from(s).ok())
            {
                Some(chunk_size) => chunk_size,
                None => {
                    return state.set_last_error(
                        libsqlite3_sys::SQLITE_NOTFOUND,
                        Error::ExpectedArg { name: "chunk_size" },
                    );
                }
            };

            if let Err(err) = state.file.set_chunk_size(chunk_size) {
                return state.set_last_error(libsqlite3_sys::SQLITE_ERROR, err);
            }

            state.chunk_size = Some(chunk_size);

            libsqlite3_sys::SQLITE_OK
        }

        libsqlite3_sys::SQLITE_FCNTL_WIN32_AV_RETRY => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_PERSIST_WAL => {
            if let Some(p_arg) = (p_arg as *mut i32).as_mut() {
                if *p_arg < 0 {
                    *p_arg = state.persist_wal as i32;
                } else {
                    state.persist_wal = *p_arg == 1;
                }
            };

            libsqlite3_sys::SQLITE_OK
        }

        libsqlite3_sys::SQLITE_FCNTL_OVERWRITE => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_VFSNAME => {
            if let Some(p_arg) = (p_arg as *mut *const c_char).as_mut() {
                let name = std::mem::ManuallyDrop::new(state.vfs_name.clone());
                *p_arg = name.as_ptr();
            };

            libsqlite3_sys::SQLITE_OK
        }

        libsqlite3_sys::SQLITE_FCNTL_POWERSAFE_OVERWRITE => {
            if let Some(p_arg) = (p_arg as *mut i32).as_mut() {
                if *p_arg < 0 {
                    *p_arg = state.powersafe_overwrite as i32;
                } else {
                    state.powersafe_overwrite = *p_arg == 1;
                }
            };

            libsqlite3_sys::SQLITE_OK
        }

        libsqlite3_sys::SQLITE_FCNTL_PRAGMA => {
            let (name, value) = match parse_pragma(p_arg) {
                Some(parsed) => parsed,
                None => return libsqlite3_sys::SQLITE_NOTFOUND,
            };
            match state.file.pragma(Pragma { name, value }) {
                Ok(result) => {
                    if let Some(result) = result {
                        if let Ok(result) = CString::new(result) {
                            let result = std::mem::ManuallyDrop::new(result);
                            let parr = p_arg as *mut *mut c_char;
                            *parr.offset(0) = result.as_ptr() as *mut c_char;
                        }
                    }
                    libsqlite3_sys::SQLITE_OK
                }
                Err(Error::ExpectedArg { .. }) => libsqlite3_sys::SQLITE_NOTFOUND,
                Err(err) => state.set_last_error(libsqlite3_sys::SQLITE_ERROR, err),
            }
        }

        libsqlite3_sys::SQLITE_FCNTL_BUSYHANDLER => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_TEMPFILENAME => {
            if let Some(p_arg) = (p_arg as *mut *const c_char).as_mut() {
                let name = state.vfs.temporary_name();
                if let Ok(name) = CString::new(name) {
                    let name = std::mem::ManuallyDrop::new(name);
                    *p_arg = name.as_ptr();
                }
            };

            libsqlite3_sys::SQLITE_OK
        }

        libsqlite3_sys::SQLITE_FCNTL_MMAP_SIZE => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_TRACE => {
            let trace = CStr::from_ptr(p_arg as *const c_char);
            log::trace!("{}", trace.to_string_lossy());
            libsqlite3_sys::SQLITE_OK
        }

        libsqlite3_sys::SQLITE_FCNTL_HAS_MOVED => match state.file.moved() {
            Ok(moved) => {
                if let Some(p_arg) = (p_arg as *mut i32).as_mut() {
                    *p_arg = moved as i32;
                }
                libsqlite3_sys::SQLITE_OK
            }
            Err(err) => state.set_last_error(libsqlite3_sys::SQLITE_ERROR, err),
        },

        libsqlite3_sys::SQLITE_FCNTL_SYNC => libsqlite3_sys::SQLITE_OK,
        libsqlite3_sys::SQLITE_FCNTL_COMMIT_PHASETWO => libsqlite3_sys::SQLITE_OK,
        libsqlite3_sys::SQLITE_FCNTL_WIN32_SET_HANDLE => libsqlite3_sys::SQLITE_NOTFOUND,
        libsqlite3_sys::SQLITE_FCNTL_WAL_BLOCK => libsqlite3_sys::SQLITE_NOTFOUND,
        libsqlite3_sys::SQLITE_FCNTL_ZIPVFS => libsqlite3_sys::SQLITE_NOTFOUND,
        libsqlite3_sys::SQLITE_FCNTL_RBU => libsqlite3_sys::SQLITE_NOTFOUND,
        libsqlite3_sys::SQLITE_FCNTL_WIN32_GET_HANDLE => libsqlite3_sys::SQLITE_NOTFOUND,
        libsqlite3_sys::SQLITE_FCNTL_PDB => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_BEGIN_ATOMIC_WRITE
        | libsqlite3_sys::SQLITE_FCNTL_COMMIT_ATOMIC_WRITE
        | libsqlite3_sys::SQLITE_FCNTL_ROLLBACK_ATOMIC_WRITE => libsqlite3_sys::SQLITE_NOTFOUND,

        libsqlite3_sys::SQLITE_FCNTL_LOCK_TIMEOUT => libsqlite3_sys::SQLITE_NOTFOUND,
        libsqlite3_sys::SQLITE_FCNTL_SIZE_LIMIT => libsqlite3_sys::SQLITE_NOTFOUND,
        libsqlite3_sys::SQLITE_FCNTL_CKPT_DONE => libsqlite3_sys::SQLITE_OK,
        libsqlite3_sys::SQLITE_FCNTL_CKPT_START => libsqlite3_sys::SQLITE_OK,
        libsqlite3_sys::SQLITE_FCNTL_EXTERNAL_READER => libsqlite3_sys::SQLITE_NOTFOUND,
        libsqlite3_sys::SQLITE_FCNTL_CKSM_FILE => libsqlite3_sys::SQLITE_NOTFOUND,

        _ => libsqlite3_sys::SQLITE_NOTFOUND,
    }
}

/// Close a file.
pub unsafe extern "C" fn close<V: Vfs, F: DatabaseHandle>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
) -> c_int {
    close_inner::<V, F>(p_file)
}

pub unsafe extern "C" fn read<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    z_buf: *mut c_void,
    i_amt: c_int,
    i_ofst: libsqlite3_sys::sqlite3_int64,
) -> c_int {
    read_inner::<V, F>(p_file, z_buf, i_amt, i_ofst)
}

pub unsafe extern "C" fn write<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    z: *const c_void,
    i_amt: c_int,
    i_ofst: libsqlite3_sys::sqlite3_int64,
) -> c_int {
    write_inner::<V, F>(p_file, z, i_amt, i_ofst)
}

pub unsafe extern "C" fn truncate<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    size: libsqlite3_sys::sqlite3_int64,
) -> c_int {
    truncate_inner::<V, F>(p_file, size)
}

pub unsafe extern "C" fn sync<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    flags: c_int,
) -> c_int {
    sync_inner::<V, F>(p_file, flags)
}

pub unsafe extern "C" fn file_size<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    p_size: *mut libsqlite3_sys::sqlite3_int64,
) -> c_int {
    file_size_inner::<V, F>(p_file, p_size)
}

pub unsafe extern "C" fn lock<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    e_lock: c_int,
) -> c_int {
    lock_inner::<V, F>(p_file, e_lock)
}

pub unsafe extern "C" fn unlock<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    e_lock: c_int,
) -> c_int {
    unlock_inner::<V, F>(p_file, e_lock)
}

pub unsafe extern "C" fn check_reserved_lock<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    check_reserved_lock_inner::<V, F>(p_file, p_res_out)
}

pub unsafe extern "C" fn file_control<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    op: c_int,
    p_arg: *mut c_void,
) -> c_int {
    file_control_inner::<V, F>(p_file, op, p_arg)
}

pub unsafe extern "C" fn sector_size<F>(_p_file: *mut libsqlite3_sys::sqlite3_file) -> c_int {
    log::trace!("sector_size");
    0
}

pub unsafe extern "C" fn device_characteristics<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
) -> c_int {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return 0,
    };

    log::trace!("[{}] device_characteristics", state.id);

    if state.powersafe_overwrite {
        libsqlite3_sys::SQLITE_IOCAP_POWERSAFE_OVERWRITE
    } else {
        0
    }
}

pub unsafe extern "C" fn shm_map<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    region_ix: i32,
    region_size: i32,
    b_extend: i32,
    pp: *mut *mut c_void,
) -> i32 {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_SHMMAP,
    };
    log::trace!(
        "[{}] shm_map pg={} sz={} extend={} ({})",
        state.id,
        region_ix,
        region_size,
        b_extend,
        state.db_name
    );

    match state
        .file
        .shm_map(region_ix as u32, region_size as u32, b_extend != 0)
    {
        Ok(Some(ptr)) => {
            *pp = ptr as *mut c_void;
            libsqlite3_sys::SQLITE_OK
        }
        Ok(None) => {
            *pp = std::ptr::null_mut();
            libsqlite3_sys::SQLITE_OK
        }
        Err(err) => state.set_last_error(libsqlite3_sys::SQLITE_IOERR_SHMMAP, err),
    }
}

pub unsafe extern "C" fn shm_lock<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    offset: i32,
    n: i32,
    flags: i32,
) -> i32 {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_SHMLOCK,
    };
    let lock = flags & libsqlite3_sys::SQLITE_SHM_LOCK > 0;
    let exclusive = flags & libsqlite3_sys::SQLITE_SHM_EXCLUSIVE > 0;
    log::trace!(
        "[{}] shm_lock offset={} n={} lock={} exclusive={} ({})",
        state.id,
        offset,
        n,
        lock,
        exclusive,
        state.db_name
    );

    match state
        .file
        .shm_lock(offset as u8, n as u8, ShmLockFlags { lock, exclusive })
    {
        Ok(true) => libsqlite3_sys::SQLITE_OK,
        Ok(false) => libsqlite3_sys::SQLITE_BUSY,
        Err(err) => state.set_last_error(libsqlite3_sys::SQLITE_IOERR_SHMLOCK, err),
    }
}

pub unsafe extern "C" fn shm_barrier<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
) {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return,
    };
    log::trace!("[{}] shm_barrier ({})", state.id, state.db_name);
    state.file.shm_barrier();
}

pub unsafe extern "C" fn shm_unmap<V: Vfs, F: DatabaseHandle<Error = V::Error>>(
    p_file: *mut libsqlite3_sys::sqlite3_file,
    delete_flags: i32,
) -> i32 {
    let state = match file_state::<V, F>(p_file) {
        Ok(f) => f,
        Err(_) => return libsqlite3_sys::SQLITE_IOERR_SHMMAP,
    };
    log::trace!(
        "[{}] shm_unmap delete={} ({})",
        state.id,
        delete_flags == 1,
        state.db_name
    );

    match state.file.shm_unmap(delete_flags == 1) {
        Ok(()) => libsqlite3_sys::SQLITE_OK,
        Err(err) => state.set_last_error(libsqlite3_sys::SQLITE_ERROR, err),
    }
}
