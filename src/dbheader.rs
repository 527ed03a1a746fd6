//! dbheader reads and writes the 100-byte header of a database file.
//!
//! See <https://www.sqlite.org/fileformat.html#the_database_header> for the
//! field-by-field layout this module implements.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("The magic bytes for this file are wrong.")]
    WrongMagic,
    #[error("A field value is not supported by this code, though it may be valid Sqlite format.")]
    Unsupported,
    #[error("The pagesize is not supported by this code, though it may be valid Sqlite format.")]
    UnsupportedPagesize,
    #[error("A field value specified a schema type that is not supported by this code, though it may be valid Sqlite format.")]
    UnsupportedSchema,
    #[error("A field value is invalid per the Sqlite format spec (version 3.0.0).")]
    Invalid,
    #[error("Error reading file.")]
    ReadFailed,
}

pub const SQLITE_DB_HEADER_BYTES: usize = 100;
const SQLITE3_MAGIC_STRING: &[u8] = &[
    0x53, 0x51, 0x4c, 0x69, 0x74, 0x65, 0x20, 0x66, 0x6f, 0x72, 0x6d, 0x61, 0x74, 0x20, 0x33, 0x00,
];
const TWENTY_ZEROS: &[u8] = &[0; 20];
const SQLITE_VERSION_NUMBER: u32 = 3_037_000;

/// Text encoding recorded in the header. This engine's primary contract is UTF-8;
/// the other two are recognized on read so foreign files are not rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    fn from_code(code: u32) -> Result<Self, Error> {
        match code {
            1 => Ok(TextEncoding::Utf8),
            2 => Ok(TextEncoding::Utf16Le),
            3 => Ok(TextEncoding::Utf16Be),
            _ => Err(Error::Invalid),
        }
    }
    fn code(self) -> u32 {
        match self {
            TextEncoding::Utf8 => 1,
            TextEncoding::Utf16Le => 2,
            TextEncoding::Utf16Be => 3,
        }
    }
}

/// The 100-byte database file header, page 1's fixed prefix.
#[derive(Debug, Clone)]
pub struct DbfileHeader {
    pub pagesize: u32,
    pub reserved_per_page: u8,
    pub changecnt: u32,
    pub numpages: u32,
    pub first_freelist_trunk: u32,
    pub freelist_count: u32,
    pub schema_cookie: u32,
    pub schema_format: u32,
    pub text_encoding: TextEncoding,
}

impl DbfileHeader {
    /// Bytes usable for cell content on a page, after the reserved tail
    /// (`page_size - reserved_per_page`). The reserved tail holds the nonce and
    /// authentication tag when page-level encryption is enabled.
    pub fn usable_page_size(&self) -> usize {
        self.pagesize as usize - self.reserved_per_page as usize
    }

    pub fn new_default(pagesize: u32) -> Self {
        DbfileHeader {
            pagesize,
            reserved_per_page: 0,
            changecnt: 1,
            numpages: 1,
            first_freelist_trunk: 0,
            freelist_count: 0,
            schema_cookie: 0,
            schema_format: 4,
            text_encoding: TextEncoding::Utf8,
        }
    }
}

fn bytes_identical<T: Ord>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(v, w)| v == w)
}

pub fn get_header_clone(f: &mut std::fs::File) -> Result<DbfileHeader, Error> {
    let mut v = vec![0_u8; SQLITE_DB_HEADER_BYTES];
    f.seek(SeekFrom::Start(0)).map_err(|_| Error::ReadFailed)?;
    f.read_exact(&mut v[..]).map_err(|_| Error::ReadFailed)?;
    let mut c = Cursor::new(v);
    get_header(&mut c)
}

pub fn get_header<R: Read + Seek>(f: &mut R) -> Result<DbfileHeader, Error> {
    f.seek(SeekFrom::Start(0)).map_err(|_| Error::ReadFailed)?;
    // Offset 0, 16 bytes: the header string "SQLite format 3\0".
    let mut fileid_buffer = [0; 16];
    f.read_exact(&mut fileid_buffer)
        .map_err(|_| Error::ReadFailed)?;
    if !bytes_identical(&fileid_buffer, SQLITE3_MAGIC_STRING) {
        return Err(Error::WrongMagic);
    }
    // Offset 16, 2 bytes: page size, power of two in [512, 32768], or 1 meaning 65536.
    let pagesize: u32 = match f.read_u16::<BigEndian>().map_err(|_| Error::ReadFailed)? {
        n @ (512 | 1024 | 2048 | 4096 | 8192 | 16384 | 32768) => n as u32,
        1 => 65536,
        _ => return Err(Error::UnsupportedPagesize),
    };
    // Offset 18/19: file format write/read version. 1 for legacy, 2 for WAL; we
    // only serve the rollback-journal path so require legacy on both.
    if f.read_u8().map_err(|_| Error::ReadFailed)? != 0x01 {
        return Err(Error::Unsupported);
    }
    if f.read_u8().map_err(|_| Error::ReadFailed)? != 0x01 {
        return Err(Error::Unsupported);
    }
    // Offset 20: reserved space per page (encryption nonce + tag live here).
    let reserved_per_page = f.read_u8().map_err(|_| Error::ReadFailed)?;
    // Offset 21-23: payload fractions, fixed by the format.
    if f.read_u8().map_err(|_| Error::ReadFailed)? != 0x40 {
        return Err(Error::Invalid);
    }
    if f.read_u8().map_err(|_| Error::ReadFailed)? != 0x20 {
        return Err(Error::Invalid);
    }
    if f.read_u8().map_err(|_| Error::ReadFailed)? != 0x20 {
        return Err(Error::Invalid);
    }
    // Offset 24/28: file change counter, in-header page count.
    let changecnt: u32 = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let numpages: u32 = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    // Offset 32/36/40/44: first freelist trunk, freelist page count, schema
    // cookie, schema format (1-4 are all legal; we only write 4).
    let first_freelist_trunk = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let freelist_count = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let schema_cookie = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let schema_format = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    if !(1..=4).contains(&schema_format) {
        return Err(Error::UnsupportedSchema);
    }
    // Offset 48: default page cache size, informational only.
    let _default_cache_size = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    // Offset 52: largest root page in auto-vacuum mode; we don't support auto-vacuum.
    if f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)? != 0x0 {
        return Err(Error::Unsupported);
    }
    // Offset 56: text encoding.
    let text_encoding = TextEncoding::from_code(
        f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?,
    )?;
    // Offset 60: user_version pragma value, informational.
    let _user_version = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    // Offset 64: incremental-vacuum flag; unsupported.
    if f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)? != 0x0 {
        return Err(Error::Unsupported);
    }
    // Offset 68: application ID, informational.
    let _application_id = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    // Offset 72, 20 bytes: reserved for expansion, must be zero.
    let mut reserved_buffer = [0; 20];
    f.read_exact(&mut reserved_buffer)
        .map_err(|_| Error::ReadFailed)?;
    if !bytes_identical(&reserved_buffer, TWENTY_ZEROS) {
        return Err(Error::WrongMagic);
    }
    // Offset 92/96: version-valid-for, SQLITE_VERSION_NUMBER. Both informational;
    // we don't reject on the version number since we write our own.
    let _version_valid_for = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let _version_number = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;

    f.seek(SeekFrom::Start(0)).map_err(|_| Error::ReadFailed)?;
    Ok(DbfileHeader {
        pagesize,
        reserved_per_page,
        changecnt,
        numpages,
        first_freelist_trunk,
        freelist_count,
        schema_cookie,
        schema_format,
        text_encoding,
    })
}

/// Serialize `hdr` into a fresh 100-byte buffer, suitable for writing at file offset 0.
pub fn write_header(hdr: &DbfileHeader) -> Result<[u8; SQLITE_DB_HEADER_BYTES], Error> {
    let mut buf = [0u8; SQLITE_DB_HEADER_BYTES];
    {
        let mut c = Cursor::new(&mut buf[..]);
        c.write_all(SQLITE3_MAGIC_STRING).map_err(|_| Error::ReadFailed)?;
        let pagesize_code = if hdr.pagesize == 65536 {
            1
        } else {
            hdr.pagesize as u16
        };
        c.write_u16::<BigEndian>(pagesize_code)
            .map_err(|_| Error::ReadFailed)?;
        c.write_u8(1).map_err(|_| Error::ReadFailed)?; // write version: legacy
        c.write_u8(1).map_err(|_| Error::ReadFailed)?; // read version: legacy
        c.write_u8(hdr.reserved_per_page).map_err(|_| Error::ReadFailed)?;
        c.write_u8(0x40).map_err(|_| Error::ReadFailed)?;
        c.write_u8(0x20).map_err(|_| Error::ReadFailed)?;
        c.write_u8(0x20).map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(hdr.changecnt).map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(hdr.numpages).map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(hdr.first_freelist_trunk)
            .map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(hdr.freelist_count).map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(hdr.schema_cookie).map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(hdr.schema_format).map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(0).map_err(|_| Error::ReadFailed)?; // default cache size
        c.write_u32::<BigEndian>(0).map_err(|_| Error::ReadFailed)?; // largest root page (no autovacuum)
        c.write_u32::<BigEndian>(hdr.text_encoding.code())
            .map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(0).map_err(|_| Error::ReadFailed)?; // user_version
        c.write_u32::<BigEndian>(0).map_err(|_| Error::ReadFailed)?; // incremental-vacuum
        c.write_u32::<BigEndian>(0).map_err(|_| Error::ReadFailed)?; // application_id
        c.write_all(TWENTY_ZEROS).map_err(|_| Error::ReadFailed)?;
        c.write_u32::<BigEndian>(hdr.changecnt).map_err(|_| Error::ReadFailed)?; // version-valid-for
        c.write_u32::<BigEndian>(SQLITE_VERSION_NUMBER)
            .map_err(|_| Error::ReadFailed)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_write_and_read() {
        let hdr = DbfileHeader::new_default(4096);
        let bytes = write_header(&hdr).unwrap();
        let mut c = Cursor::new(bytes.to_vec());
        let read_back = get_header(&mut c).unwrap();
        assert_eq!(read_back.pagesize, 4096);
        assert_eq!(read_back.schema_format, 4);
        assert_eq!(read_back.text_encoding, TextEncoding::Utf8);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut buf = vec![0u8; SQLITE_DB_HEADER_BYTES];
        buf[0] = b'X';
        let mut c = Cursor::new(buf);
        assert!(matches!(get_header(&mut c), Err(Error::WrongMagic)));
    }

    #[test]
    fn page_size_code_one_means_65536() {
        let hdr = DbfileHeader::new_default(65536);
        let bytes = write_header(&hdr).unwrap();
        let mut c = Cursor::new(bytes.to_vec());
        let read_back = get_header(&mut c).unwrap();
        assert_eq!(read_back.pagesize, 65536);
    }
}
