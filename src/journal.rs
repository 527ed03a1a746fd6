//! Rollback journal: records pre-images of touched pages so a transaction can
//! be rolled back, and so a crash mid-commit can be repaired on next open.
//!
//! Sidecar path is `<db>.journal`. Format (all big-endian):
//! `MAGIC(8) | file_size_before(8) | change_counter(4) | record_count(4)` header,
//! followed by `record_count` records of `page_num(4) | bytes(page_size) | checksum(4)`.
//! The checksum is a simple additive sum, enough to detect a torn write from a
//! crash mid-append; a journal that fails the checksum on any record is
//! discarded wholesale rather than partially replayed.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"rbjrnl01";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error operating on the journal: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal is truncated or has an invalid checksum and was discarded")]
    Corrupt,
}

struct PageRecord {
    page_num: u32,
    bytes: Vec<u8>,
}

fn checksum(page_num: u32, bytes: &[u8]) -> u32 {
    let mut sum = page_num.wrapping_mul(2654435761);
    for &b in bytes {
        sum = sum.wrapping_add(b as u32).wrapping_mul(16777619);
    }
    sum
}

/// A live rollback journal for one transaction. `begin` truncates/creates the
/// sidecar file and writes its header; `log_before` appends a pre-image the
/// first time a page is mutated; `commit` discards the journal; `rollback`
/// replays pre-images onto the data file, in reverse order, then discards it.
pub struct Journal {
    path: PathBuf,
    file: File,
    file_size_before: u64,
    change_counter_before: u32,
    logged_pages: std::collections::HashSet<u32>,
    record_count: u32,
}

impl Journal {
    pub fn journal_path_for(db_path: &Path) -> PathBuf {
        let mut p = db_path.as_os_str().to_owned();
        p.push(".journal");
        PathBuf::from(p)
    }

    /// Opens (creating if needed) the journal and writes its header.
    pub fn begin(db_path: &Path, file_size_before: u64, change_counter_before: u32) -> Result<Self, Error> {
        let path = Self::journal_path_for(db_path);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(MAGIC)?;
        file.write_u64::<BigEndian>(file_size_before)?;
        file.write_u32::<BigEndian>(change_counter_before)?;
        file.write_u32::<BigEndian>(0)?; // record count, patched on commit/extend
        file.flush()?;
        Ok(Journal {
            path,
            file,
            file_size_before,
            change_counter_before,
            logged_pages: std::collections::HashSet::new(),
            record_count: 0,
        })
    }

    /// Whether `page_num` has already had its pre-image logged this transaction.
    pub fn already_logged(&self, page_num: u32) -> bool {
        self.logged_pages.contains(&page_num)
    }

    /// Appends the original bytes of `page_num`, the first time it is touched
    /// in this transaction. A no-op on subsequent touches of the same page.
    pub fn log_before(&mut self, page_num: u32, bytes: &[u8]) -> Result<(), Error> {
        if self.logged_pages.contains(&page_num) {
            return Ok(());
        }
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_u32::<BigEndian>(page_num)?;
        self.file.write_all(bytes)?;
        self.file.write_u32::<BigEndian>(checksum(page_num, bytes))?;
        self.logged_pages.insert(page_num);
        self.record_count += 1;
        self.file.seek(SeekFrom::Start(20))?;
        self.file.write_u32::<BigEndian>(self.record_count)?;
        self.file.flush()?;
        Ok(())
    }

    /// Commit: the caller has already flushed the data file. Delete the
    /// journal so a later open doesn't mistake it for a crash to recover from.
    pub fn commit(self) -> Result<(), Error> {
        drop(self.file);
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Rollback: replay logged pre-images onto `data_file` in reverse order,
    /// truncate it back to its pre-transaction size, then delete the journal.
    pub fn rollback(mut self, data_file: &mut File) -> Result<(), Error> {
        let page_size = self.infer_page_size(data_file)?;
        let records = self.read_records(page_size)?;
        for record in records.iter().rev() {
            let offset = (record.page_num as u64 - 1) * page_size as u64;
            data_file.seek(SeekFrom::Start(offset))?;
            data_file.write_all(&record.bytes)?;
        }
        data_file.set_len(self.file_size_before)?;
        data_file.flush()?;
        drop(self.file);
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn infer_page_size(&self, data_file: &mut File) -> Result<u32, Error> {
        let mut buf = [0u8; 18];
        data_file.seek(SeekFrom::Start(0))?;
        data_file.read_exact(&mut buf)?;
        let code = u16::from_be_bytes([buf[16], buf[17]]);
        Ok(if code == 1 { 65536 } else { code as u32 })
    }

    fn read_records(&mut self, page_size: u32) -> Result<Vec<PageRecord>, Error> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 8];
        self.file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Corrupt);
        }
        self.file.seek(SeekFrom::Start(20))?;
        let declared_count = self.file.read_u32::<BigEndian>()?;
        let mut records = Vec::new();
        for _ in 0..declared_count {
            let page_num = match self.file.read_u32::<BigEndian>() {
                Ok(v) => v,
                Err(_) => return Err(Error::Corrupt),
            };
            let mut bytes = vec![0u8; page_size as usize];
            if self.file.read_exact(&mut bytes).is_err() {
                return Err(Error::Corrupt);
            }
            let stored_checksum = match self.file.read_u32::<BigEndian>() {
                Ok(v) => v,
                Err(_) => return Err(Error::Corrupt),
            };
            if stored_checksum != checksum(page_num, &bytes) {
                return Err(Error::Corrupt);
            }
            records.push(PageRecord { page_num, bytes });
        }
        Ok(records)
    }
}

/// Called on open. If a journal sidecar exists, replay its rollback before any
/// reader or writer is constructed — this is how the engine recovers from a
/// crash that happened mid-commit. A corrupt/truncated journal is discarded
/// rather than replayed, matching the "unchecksummed journal is discarded" rule.
pub fn recover_if_present(db_path: &Path, data_file: &mut File) -> Result<bool, Error> {
    let journal_path = Journal::journal_path_for(db_path);
    if !journal_path.exists() {
        return Ok(false);
    }
    let mut file = match OpenOptions::new().read(true).write(true).open(&journal_path) {
        Ok(f) => f,
        Err(_) => return Ok(false),
    };
    let mut header = [0u8; 20];
    if file.read_exact(&mut header).is_err() {
        let _ = std::fs::remove_file(&journal_path);
        return Ok(false);
    }
    if &header[0..8] != MAGIC {
        let _ = std::fs::remove_file(&journal_path);
        return Ok(false);
    }
    let file_size_before = u64::from_be_bytes(header[8..16].try_into().unwrap());
    let change_counter_before = u32::from_be_bytes(header[16..20].try_into().unwrap());
    let journal = Journal {
        path: journal_path.clone(),
        file,
        file_size_before,
        change_counter_before,
        logged_pages: std::collections::HashSet::new(),
        record_count: 0,
    };
    match journal.rollback(data_file) {
        Ok(()) => Ok(true),
        Err(Error::Corrupt) => {
            let _ = std::fs::remove_file(&journal_path);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("embeddb-journal-test-{name}-{}", std::process::id()));
        p
    }

    #[test]
    fn rollback_restores_original_bytes_and_size() {
        let db_path = temp_path("rollback");
        let _ = std::fs::remove_file(&db_path);
        let mut data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&db_path)
            .unwrap();
        // Minimal fake header so infer_page_size works: page size 512 at offset 16.
        let mut original = vec![0u8; 512];
        original[16] = 0x02; // 0x0200 = 512
        data_file.write_all(&original).unwrap();
        data_file.flush().unwrap();

        let mut journal = Journal::begin(&db_path, 512, 1).unwrap();
        journal.log_before(1, &original).unwrap();

        // Simulate a mutation.
        data_file.seek(SeekFrom::Start(20)).unwrap();
        data_file.write_all(b"mutated").unwrap();
        data_file.flush().unwrap();

        journal.rollback(&mut data_file).unwrap();

        let mut after = vec![0u8; 512];
        data_file.seek(SeekFrom::Start(0)).unwrap();
        data_file.read_exact(&mut after).unwrap();
        assert_eq!(after, original);
        assert!(!Journal::journal_path_for(&db_path).exists());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn commit_deletes_the_journal() {
        let db_path = temp_path("commit");
        let journal = Journal::begin(&db_path, 0, 0).unwrap();
        let path = Journal::journal_path_for(&db_path);
        assert!(path.exists());
        journal.commit().unwrap();
        assert!(!path.exists());
    }
}
