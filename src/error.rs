use snafu::Snafu;

/// Errors internal to the volatile content store (page/SHM bookkeeping), independent of
/// SQLite's own VFS error codes which [memqlite_vfs::error::Error] carries at the FFI boundary.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("database {name} not found"))]
    NotFound { name: String },

    #[snafu(display("database {name} already exists"))]
    AlreadyExists { name: String },

    #[snafu(display("too many open files"))]
    TooManyFiles,

    #[snafu(display("file {name} is still open ({refs} refs)"))]
    StillOpen { name: String, refs: usize },

    #[snafu(display("wal file has no paired database"))]
    OrphanWal,

    #[snafu(display("changing page size is not supported (already {current}, requested {requested})"))]
    PageSizeFixed { current: u32, requested: u32 },

    #[snafu(display("invalid page size {size}"))]
    InvalidPageSize { size: u32 },

    #[snafu(display("only WAL mode is supported (requested {mode})"))]
    UnsupportedJournalMode { mode: String },

    #[snafu(display("misaligned i/o at offset {offset} for page size {page_size}"))]
    Misaligned { offset: u64, page_size: u32 },

    #[snafu(display("cannot grow a file via truncate (from {from} to {to})"))]
    TruncateGrow { from: u64, to: u64 },

    #[snafu(display("shm region size mismatch: store uses {stored}, got {requested}"))]
    ShmRegionSize { stored: u32, requested: u32 },

    #[snafu(display("truncate is not supported for this file type"))]
    UnsupportedTruncate,
}
