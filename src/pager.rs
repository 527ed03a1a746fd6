//! Pager: maps page numbers to fixed-size byte buffers, applies page-level
//! encryption transparently when configured, and tracks dirty pages within a
//! transaction so they can be journaled and, on rollback, restored.
//!
//! Every buffer the rest of the crate sees — via [`Pager::get`] or
//! [`Pager::mutate`] — is exactly [`Pager::usable_page_size`] bytes. The
//! reserved tail (where the encryption nonce and authentication tag live) is
//! never exposed to btree/record code, matching how SQLite's own
//! `reserved_per_page` mechanism keeps page-format extensions invisible to
//! the B-tree layer.

use crate::crypto::{Argon2Kdf, EncryptionHeader, KeyDerivation, PageCipher, ENCRYPTION_HEADER_BYTES};
use crate::dbheader::{self, DbfileHeader};
use crate::journal::Journal;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Page numbers are 1-based, matching the on-disk format.
pub type PageNum = usize;

const MAX_PAGE_NUM: PageNum = 5_000_000;
const ENCRYPTED_RESERVED_BYTES: u8 = 32; // covers 12-byte nonce + 16-byte tag + slack

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("page number {0} is beyond the supported limit")]
    PageNumberBeyondLimits(PageNum),
    #[error("page {0} has an unknown or corrupt page type")]
    CorruptPage(PageNum),
    #[error("I/O error accessing the database file: {0}")]
    Io(#[from] std::io::Error),
    #[error("error in database header: {0}")]
    DbHdr(#[from] dbheader::Error),
    #[error("a transaction is already in progress")]
    TransactionAlreadyOpen,
    #[error("no transaction is in progress")]
    NoTransaction,
    #[error("database is read-only")]
    ReadOnly,
    #[error("{0}")]
    WrongPassword(#[from] crate::crypto::Error),
    #[error("a password is required to open this database")]
    PasswordRequired,
    #[error("the in-memory image exceeds the configured size guard")]
    SizeGuardExceeded,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Open-time options.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub writable: bool,
    pub password: Option<String>,
    pub max_snapshot_bytes: Option<u64>,
    pub page_cache_size: Option<usize>,
}

enum Backing {
    File { file: std::fs::File, path: PathBuf },
    Memory,
}

pub struct Pager {
    backing: Backing,
    pages: HashMap<PageNum, Vec<u8>>,
    dirty: HashSet<PageNum>,
    header: DbfileHeader,
    cipher: Option<PageCipher>,
    enc_header: Option<EncryptionHeader>,
    writable: bool,
    in_transaction: bool,
    journal: Option<Journal>,
    tx_pre_images: HashMap<PageNum, Vec<u8>>,
}

impl Pager {
    fn offset_for_page(&self, pn: PageNum) -> u64 {
        let base = if self.enc_header.is_some() {
            ENCRYPTION_HEADER_BYTES as u64
        } else {
            0
        };
        base + (pn as u64 - 1) * self.header.pagesize as u64
    }

    fn read_raw_page(&mut self, pn: PageNum) -> Result<Vec<u8>> {
        match &mut self.backing {
            Backing::Memory => Err(Error::CorruptPage(pn)),
            Backing::File { file, .. } => {
                let mut buf = vec![0u8; self.header.pagesize as usize];
                let offset = self.offset_for_page(pn);
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }

    fn decode_page(&self, pn: PageNum, raw: &[u8]) -> Result<Vec<u8>> {
        let usable = self.usable_page_size();
        match &self.cipher {
            None => Ok(raw[..usable].to_vec()),
            Some(cipher) => cipher
                .decrypt_page(pn as u32, &raw[..usable + 28])
                .map_err(|e| e.into()),
        }
    }

    fn encode_page(&self, pn: PageNum, plaintext: &[u8]) -> Vec<u8> {
        let mut disk_buf = vec![0u8; self.header.pagesize as usize];
        match &self.cipher {
            None => {
                disk_buf[..plaintext.len()].copy_from_slice(plaintext);
            }
            Some(cipher) => {
                let ct = cipher.encrypt_page(pn as u32, plaintext);
                disk_buf[..ct.len()].copy_from_slice(&ct);
            }
        }
        disk_buf
    }

    /// Loads `pn` into the in-memory cache if not already present.
    fn ensure_present(&mut self, pn: PageNum) -> Result<()> {
        if pn == 0 || pn > MAX_PAGE_NUM {
            return Err(Error::PageNumberBeyondLimits(pn));
        }
        if self.pages.contains_key(&pn) {
            return Ok(());
        }
        let raw = self.read_raw_page(pn)?;
        let plaintext = self.decode_page(pn, &raw)?;
        self.pages.insert(pn, plaintext);
        Ok(())
    }

    pub fn usable_page_size(&self) -> usize {
        self.header.usable_page_size()
    }

    pub fn page_count(&self) -> u32 {
        self.header.numpages
    }

    pub fn header(&self) -> &DbfileHeader {
        &self.header
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Returns a read-only view of `pn`. Fails with [`Error::CorruptPage`] if
    /// the page is beyond the declared page count.
    pub fn get(&mut self, pn: PageNum) -> Result<&[u8]> {
        if pn == 0 || pn as u32 > self.header.numpages {
            return Err(Error::CorruptPage(pn));
        }
        self.ensure_present(pn)?;
        Ok(self.pages.get(&pn).unwrap())
    }

    /// Returns a mutable view of `pn`. Valid only inside a transaction. The
    /// first touch of a page in a transaction logs its pre-image, both to the
    /// in-memory rollback record and (for file-backed databases) to the
    /// on-disk journal.
    pub fn mutate(&mut self, pn: PageNum) -> Result<&mut [u8]> {
        if !self.in_transaction {
            return Err(Error::NoTransaction);
        }
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        if pn == 0 || pn as u32 > self.header.numpages {
            return Err(Error::CorruptPage(pn));
        }
        self.ensure_present(pn)?;
        if !self.tx_pre_images.contains_key(&pn) {
            let before = self.pages.get(&pn).unwrap().clone();
            if let Some(journal) = self.journal.as_mut() {
                journal.log_before(pn as u32, &before)?;
            }
            self.tx_pre_images.insert(pn, before);
        }
        self.dirty.insert(pn);
        Ok(self.pages.get_mut(&pn).unwrap())
    }

    /// Allocates a page, preferring a freed page from the freelist (LIFO on
    /// the first trunk's leaf array) before growing the file.
    pub fn allocate(&mut self) -> Result<PageNum> {
        if self.header.first_freelist_trunk != 0 {
            let trunk_pn = self.header.first_freelist_trunk as PageNum;
            let trunk_bytes = self.get(trunk_pn)?.to_vec();
            let mut trunk = crate::freelist::Trunk::parse(&trunk_bytes);
            if let Some(leaf) = trunk.leaves.pop() {
                let usable = self.usable_page_size();
                trunk.write_into(self.mutate(trunk_pn)?);
                self.set_freelist_count(self.header.freelist_count - 1)?;
                self.ensure_present(leaf as PageNum)?;
                let _ = usable;
                return Ok(leaf as PageNum);
            } else {
                // Trunk itself is consumed as the allocated page.
                self.set_first_freelist_trunk(trunk.next_trunk)?;
                self.set_freelist_count(self.header.freelist_count - 1)?;
                // Clear it for reuse by the caller.
                self.mutate(trunk_pn)?.fill(0);
                return Ok(trunk_pn);
            }
        }
        let new_pn = self.header.numpages as PageNum + 1;
        if new_pn > MAX_PAGE_NUM {
            return Err(Error::PageNumberBeyondLimits(new_pn));
        }
        let usable = self.usable_page_size();
        self.pages.insert(new_pn, vec![0u8; usable]);
        self.set_numpages(new_pn as u32)?;
        if self.in_transaction {
            self.dirty.insert(new_pn);
        }
        Ok(new_pn)
    }

    /// Chains `pn` onto the freelist: as a new leaf of the first trunk if it
    /// has room, otherwise `pn` becomes the new head trunk.
    pub fn release(&mut self, pn: PageNum) -> Result<()> {
        let usable = self.usable_page_size();
        if self.header.first_freelist_trunk == 0 {
            let mut trunk = crate::freelist::Trunk::empty();
            trunk.write_into(self.mutate(pn)?);
            self.set_first_freelist_trunk(pn as u32)?;
            self.set_freelist_count(self.header.freelist_count + 1)?;
            return Ok(());
        }
        let trunk_pn = self.header.first_freelist_trunk as PageNum;
        let trunk_bytes = self.get(trunk_pn)?.to_vec();
        let mut trunk = crate::freelist::Trunk::parse(&trunk_bytes);
        if !trunk.is_full(usable) {
            trunk.leaves.push(pn as u32);
            trunk.write_into(self.mutate(trunk_pn)?);
        } else {
            let mut new_trunk = crate::freelist::Trunk::empty();
            new_trunk.next_trunk = trunk_pn as u32;
            new_trunk.write_into(self.mutate(pn)?);
            self.set_first_freelist_trunk(pn as u32)?;
        }
        self.set_freelist_count(self.header.freelist_count + 1)?;
        Ok(())
    }

    fn set_first_freelist_trunk(&mut self, v: u32) -> Result<()> {
        self.header.first_freelist_trunk = v;
        self.sync_header_into_page1()
    }
    fn set_freelist_count(&mut self, v: u32) -> Result<()> {
        self.header.freelist_count = v;
        self.sync_header_into_page1()
    }
    fn set_numpages(&mut self, v: u32) -> Result<()> {
        self.header.numpages = v;
        self.sync_header_into_page1()
    }
    pub fn bump_schema_cookie(&mut self) -> Result<()> {
        self.header.schema_cookie += 1;
        self.sync_header_into_page1()
    }

    fn sync_header_into_page1(&mut self) -> Result<()> {
        let bytes = dbheader::write_header(&self.header)?;
        let page1 = self.mutate(1)?;
        page1[..dbheader::SQLITE_DB_HEADER_BYTES].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::TransactionAlreadyOpen);
        }
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        if let Backing::File { file, path } = &mut self.backing {
            let file_size = file.seek(SeekFrom::End(0))?;
            self.journal = Some(Journal::begin(path, file_size, self.header.changecnt)?);
        }
        self.in_transaction = true;
        self.tx_pre_images.clear();
        Ok(())
    }

    /// Flushes dirty pages to the backing file (applying encryption as
    /// configured), bumps the change counter, then discards the journal.
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::NoTransaction);
        }
        self.header.changecnt = self.header.changecnt.wrapping_add(1);
        self.sync_header_into_page1()?;
        if let Backing::File { file, .. } = &mut self.backing {
            for pn in self.dirty.iter().copied().collect::<Vec<_>>() {
                let plaintext = self.pages.get(&pn).unwrap().clone();
                let encoded = self.encode_page(pn, &plaintext);
                let offset = self.offset_for_page(pn);
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(&encoded)?;
            }
            file.flush()?;
        }
        if let Some(journal) = self.journal.take() {
            journal.commit()?;
        }
        log::debug!("committed transaction, change counter now {}", self.header.changecnt);
        self.dirty.clear();
        self.tx_pre_images.clear();
        self.in_transaction = false;
        Ok(())
    }

    /// Restores every touched page to its pre-transaction bytes and discards
    /// the journal without writing anything further to the data file.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::NoTransaction);
        }
        let restored = self.tx_pre_images.len();
        for (pn, bytes) in self.tx_pre_images.drain() {
            self.pages.insert(pn, bytes);
        }
        self.dirty.clear();
        self.journal = None;
        // The on-disk journal (if any) was never applied to the data file
        // mid-transaction, so there's nothing to replay there; discard it.
        if let Backing::File { path, .. } = &self.backing {
            let journal_path = Journal::journal_path_for(path);
            let _ = std::fs::remove_file(journal_path);
        }
        log::debug!("rolled back transaction, {} page(s) restored", restored);
        self.in_transaction = false;
        Ok(())
    }

    /// Deep-copies the entire resident image, bounded by `max_bytes`. Used by
    /// [`crate::snapshot`].
    pub fn clone_image(&mut self, max_bytes: u64) -> Result<HashMap<PageNum, Vec<u8>>> {
        for pn in 1..=self.header.numpages as PageNum {
            self.ensure_present(pn)?;
        }
        let total: u64 = self.pages.values().map(|p| p.len() as u64).sum();
        if total > max_bytes {
            return Err(Error::SizeGuardExceeded);
        }
        Ok(self.pages.clone())
    }
}

/// Opens an existing file-backed database.
pub fn open(path: &str, opts: &OpenOptions) -> Result<Pager> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(opts.writable)
        .open(path)?;
    let path_buf = PathBuf::from(path);

    if crate::journal::recover_if_present(&path_buf, &mut file)? {
        log::warn!("replayed pending journal for {path} on open");
    }

    let first_bytes = {
        let mut b = [0u8; ENCRYPTION_HEADER_BYTES];
        file.seek(SeekFrom::Start(0))?;
        let n = file.read(&mut b)?;
        (b, n)
    };

    let (enc_header, cipher) = if &first_bytes.0[0..4] != b"SQLi" {
        // Not a plaintext SQLite header: treat as an encrypted file.
        let enc = EncryptionHeader::from_bytes(&first_bytes.0)?;
        let password = opts.password.as_ref().ok_or(Error::PasswordRequired)?;
        let key = Argon2Kdf.derive(password.as_bytes(), &enc.salt, &enc);
        let cipher = PageCipher::new(key, enc.salt);
        (Some(enc), Some(cipher))
    } else {
        (None, None)
    };

    let header_offset = if enc_header.is_some() {
        ENCRYPTION_HEADER_BYTES as u64
    } else {
        0
    };

    let header = if let (Some(enc), Some(cipher)) = (&enc_header, &cipher) {
        // Decrypt page 1 to recover the real 100-byte header.
        let page_size_on_disk = enc.page_size;
        let mut raw = vec![0u8; page_size_on_disk as usize];
        file.seek(SeekFrom::Start(header_offset))?;
        file.read_exact(&mut raw)?;
        let reserved = ENCRYPTED_RESERVED_BYTES as usize;
        let usable_len = page_size_on_disk as usize - reserved;
        let plaintext = cipher.decrypt_page(1, &raw[..usable_len + 28])?;
        let mut c = std::io::Cursor::new(plaintext);
        dbheader::get_header(&mut c)?
    } else {
        file.seek(SeekFrom::Start(header_offset))?;
        dbheader::get_header(&mut file)?
    };

    file.seek(SeekFrom::Start(0))?;

    Ok(Pager {
        backing: Backing::File { file, path: path_buf },
        pages: HashMap::new(),
        dirty: HashSet::new(),
        header,
        cipher,
        enc_header,
        writable: opts.writable,
        in_transaction: false,
        journal: None,
        tx_pre_images: HashMap::new(),
    })
}

/// Creates a new, empty file-backed database: page 1 only, holding an empty
/// catalog leaf page.
pub fn create(path: &str, opts: &OpenOptions) -> Result<Pager> {
    let page_size: u32 = 4096;
    let reserved = if opts.password.is_some() {
        ENCRYPTED_RESERVED_BYTES
    } else {
        0
    };
    let mut header = DbfileHeader::new_default(page_size);
    header.reserved_per_page = reserved;

    let (enc_header, cipher) = if let Some(password) = &opts.password {
        let mut salt = [0u8; 32];
        // Deterministic-from-path salt keeps `create` free of a timestamp/RNG
        // dependency while still being unique per database file.
        for (i, b) in path.as_bytes().iter().enumerate() {
            salt[i % 32] ^= *b;
        }
        let enc = EncryptionHeader {
            kdf_algo: crate::crypto::KdfAlgo::Argon2id,
            cipher_algo: crate::crypto::CipherAlgo::Aes256Gcm,
            time_cost: 2,
            memory_cost_kib: 19456,
            parallelism: 1,
            salt,
            verification_hash: [0u8; 32],
            page_size,
            page_count: 1,
        };
        let key = Argon2Kdf.derive(password.as_bytes(), &salt, &enc);
        (Some(enc), Some(PageCipher::new(key, salt)))
    } else {
        (None, None)
    };

    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    if let Some(enc) = &enc_header {
        file.write_all(&enc.to_bytes())?;
    }

    let mut pager = Pager {
        backing: Backing::File {
            file,
            path: PathBuf::from(path),
        },
        pages: HashMap::new(),
        dirty: HashSet::new(),
        header,
        cipher,
        enc_header,
        writable: true,
        in_transaction: false,
        journal: None,
        tx_pre_images: HashMap::new(),
    };
    pager.init_page1()?;
    pager.flush_initial()?;
    Ok(pager)
}

pub fn open_memory(bytes: Vec<u8>, opts: &OpenOptions) -> Result<Pager> {
    let mut c = std::io::Cursor::new(bytes.clone());
    let header = dbheader::get_header(&mut c)?;
    let mut pages = HashMap::new();
    let usable = header.usable_page_size();
    for pn in 1..=header.numpages as usize {
        let start = (pn - 1) * header.pagesize as usize;
        let slice = &bytes[start..start + usable.min(bytes.len() - start)];
        let mut buf = vec![0u8; usable];
        buf[..slice.len()].copy_from_slice(slice);
        pages.insert(pn, buf);
    }
    Ok(Pager {
        backing: Backing::Memory,
        pages,
        dirty: HashSet::new(),
        header,
        cipher: None,
        enc_header: None,
        writable: opts.writable,
        in_transaction: false,
        journal: None,
        tx_pre_images: HashMap::new(),
    })
}

pub fn create_in_memory(opts: &OpenOptions) -> Result<Pager> {
    let header = DbfileHeader::new_default(4096);
    let mut pager = Pager {
        backing: Backing::Memory,
        pages: HashMap::new(),
        dirty: HashSet::new(),
        header,
        cipher: None,
        enc_header: None,
        writable: true,
        in_transaction: false,
        journal: None,
        tx_pre_images: HashMap::new(),
    };
    let _ = opts;
    pager.init_page1()?;
    Ok(pager)
}

/// Builds a read-only, memory-backed pager directly from a page map, as
/// produced by [`Pager::clone_image`]. Used by [`crate::snapshot`] to turn a
/// deep-copied image into a queryable handle without round-tripping through
/// a flat byte buffer.
pub fn from_snapshot(header: DbfileHeader, pages: HashMap<PageNum, Vec<u8>>) -> Pager {
    Pager {
        backing: Backing::Memory,
        pages,
        dirty: HashSet::new(),
        header,
        cipher: None,
        enc_header: None,
        writable: false,
        in_transaction: false,
        journal: None,
        tx_pre_images: HashMap::new(),
    }
}

impl Pager {
    fn init_page1(&mut self) -> Result<()> {
        let usable = self.usable_page_size();
        let mut page1 = vec![0u8; usable];
        let hdr_bytes = dbheader::write_header(&self.header)?;
        page1[..dbheader::SQLITE_DB_HEADER_BYTES].copy_from_slice(&hdr_bytes);
        // An empty table-leaf btree page for the catalog, right after the header.
        crate::btree::header::write_leaf_header(
            &mut page1[dbheader::SQLITE_DB_HEADER_BYTES..],
            crate::btree::PageType::TableLeaf,
            0,
            usable - dbheader::SQLITE_DB_HEADER_BYTES,
        );
        self.pages.insert(1, page1);
        Ok(())
    }

    fn flush_initial(&mut self) -> Result<()> {
        let plaintext = self.pages.get(&1).unwrap().clone();
        let encoded = self.encode_page(1, &plaintext);
        if let Backing::File { file, .. } = &mut self.backing {
            let offset = self.enc_header.as_ref().map_or(0, |_| ENCRYPTION_HEADER_BYTES as u64);
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&encoded)?;
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        format!(
            "{}/embeddb-pager-test-{name}-{}.db",
            std::env::temp_dir().display(),
            std::process::id()
        )
    }

    #[test]
    fn create_then_open_round_trips() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        {
            let _pager = create(&path, &OpenOptions { writable: true, ..Default::default() }).unwrap();
        }
        let mut pager = open(&path, &OpenOptions { writable: false, ..Default::default() }).unwrap();
        assert_eq!(pager.page_count(), 1);
        let p1 = pager.get(1).unwrap();
        assert_eq!(p1.len(), pager.usable_page_size());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn allocate_grows_page_count_when_freelist_empty() {
        let mut pager = create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        pager.begin_transaction().unwrap();
        let pn = pager.allocate().unwrap();
        assert_eq!(pn, 2);
        assert_eq!(pager.page_count(), 2);
        pager.commit().unwrap();
    }

    #[test]
    fn release_then_allocate_reuses_the_page() {
        let mut pager = create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        pager.begin_transaction().unwrap();
        let pn = pager.allocate().unwrap();
        pager.release(pn).unwrap();
        let reused = pager.allocate().unwrap();
        assert_eq!(reused, pn);
        pager.commit().unwrap();
    }

    #[test]
    fn rollback_restores_pre_transaction_bytes() {
        let mut pager = create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        pager.begin_transaction().unwrap();
        let pn = pager.allocate().unwrap();
        pager.mutate(pn).unwrap()[0] = 0xAB;
        pager.rollback().unwrap();
        pager.begin_transaction().unwrap();
        // The allocation itself rolled back too: page count is back to 1, and
        // re-allocating gives the same page number.
        assert_eq!(pager.page_count(), 1);
        pager.commit().unwrap();
    }

    #[test]
    fn encrypted_database_requires_correct_password() {
        let path = temp_path("encrypted");
        let _ = std::fs::remove_file(&path);
        let opts = OpenOptions {
            writable: true,
            password: Some("s3cret".into()),
            ..Default::default()
        };
        {
            let _pager = create(&path, &opts).unwrap();
        }
        let wrong = OpenOptions {
            writable: false,
            password: Some("nope".into()),
            ..Default::default()
        };
        let result = open(&path, &wrong);
        assert!(result.is_err());

        let right = OpenOptions {
            writable: false,
            password: Some("s3cret".into()),
            ..Default::default()
        };
        let mut pager = open(&path, &right).unwrap();
        assert!(pager.get(1).is_ok());
        let _ = std::fs::remove_file(&path);
    }
}
