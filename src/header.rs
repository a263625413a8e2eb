//! Reads and writes the page-size fields embedded in SQLite's on-disk header layouts.
//!
//! Both fields are big-endian, unlike most of the rest of the SQLite header, which is why
//! they are parsed with explicit typed views instead of folded into a generic header struct.

use zerocopy::{big_endian::U16, big_endian::U32, AsBytes, FromBytes};

/// Byte offset of the page-size field within a database header.
pub const DB_PAGE_SIZE_OFFSET: usize = 16;
/// Byte offset of the page-size field within a WAL header.
pub const WAL_PAGE_SIZE_OFFSET: usize = 8;

/// Decode the database header's page-size field. A stored value of `1` denotes 65536, since
/// the field itself is only 16 bits wide.
pub fn read_db_page_size(header: &[u8]) -> u32 {
    let raw = U16::read_from(&header[DB_PAGE_SIZE_OFFSET..DB_PAGE_SIZE_OFFSET + 2])
        .unwrap()
        .get();
    if raw == 1 {
        65536
    } else {
        raw as u32
    }
}

pub fn write_db_page_size(header: &mut [u8], page_size: u32) {
    let raw: u16 = if page_size == 65536 { 1 } else { page_size as u16 };
    U16::new(raw)
        .write_to(&mut header[DB_PAGE_SIZE_OFFSET..DB_PAGE_SIZE_OFFSET + 2])
        .unwrap();
}

/// Decode the WAL header's page-size field (high 16 bits are always zero).
pub fn read_wal_page_size(header: &[u8]) -> u32 {
    U32::read_from(&header[WAL_PAGE_SIZE_OFFSET..WAL_PAGE_SIZE_OFFSET + 4])
        .unwrap()
        .get()
}

pub fn write_wal_page_size(header: &mut [u8], page_size: u32) {
    U32::new(page_size)
        .write_to(&mut header[WAL_PAGE_SIZE_OFFSET..WAL_PAGE_SIZE_OFFSET + 4])
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_page_size_round_trips() {
        let mut header = [0u8; 32];
        write_db_page_size(&mut header, 4096);
        assert_eq!(read_db_page_size(&header), 4096);
    }

    #[test]
    fn db_page_size_65536_is_encoded_as_one() {
        let mut header = [0u8; 32];
        write_db_page_size(&mut header, 65536);
        assert_eq!(&header[DB_PAGE_SIZE_OFFSET..DB_PAGE_SIZE_OFFSET + 2], &[0x00, 0x01]);
        assert_eq!(read_db_page_size(&header), 65536);
    }

    #[test]
    fn wal_page_size_round_trips() {
        let mut header = [0u8; 32];
        write_wal_page_size(&mut header, 8192);
        assert_eq!(read_wal_page_size(&header), 8192);
    }
}
