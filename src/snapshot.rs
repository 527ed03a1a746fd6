//! Read-only, point-in-time database handles.
//!
//! A snapshot deep-copies the pager's resident image at capture time via
//! [`crate::pager::Pager::clone_image`] and wraps the copy in a fresh,
//! read-only [`crate::pager::Pager`]. Because the copy is a separate page
//! map, subsequent writes through the live writer never touch it — queries
//! against the snapshot observe exactly the state at capture time regardless
//! of what happens to the live database afterward.

use crate::db::Db;
use crate::error::Error;
use crate::pager;

pub struct Snapshot {
    db: Db,
}

impl Snapshot {
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Db {
        &mut self.db
    }
}

/// Captures a snapshot of `db`'s current image, refusing to do so if the
/// image exceeds `max_bytes` (`invalid-operation` at capture time).
pub fn create_snapshot(db: &mut Db, max_bytes: u64) -> Result<Snapshot, Error> {
    let header = db.pager().header().clone();
    let pages = db.pager_mut().clone_image(max_bytes).map_err(|e| match e {
        pager::Error::SizeGuardExceeded => {
            Error::InvalidOperation("snapshot exceeds the configured max_snapshot_bytes guard".to_string())
        }
        other => Error::from(other),
    })?;
    let mut snap_pager = pager::from_snapshot(header, pages);
    let catalog = crate::db::load_catalog(&mut snap_pager)?;
    Ok(Snapshot { db: Db::from_parts(snap_pager, catalog) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::OpenOptions;
    use crate::sql_value::SqlValue;

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut db = Db::create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        db.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        {
            let mut w = db.writer();
            w.begin_transaction().unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("a".into())]).unwrap();
            w.commit().unwrap();
        }
        let mut snap = create_snapshot(&mut db, 64 * 1024 * 1024).unwrap();
        {
            let mut w = db.writer();
            w.begin_transaction().unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("b".into())]).unwrap();
            w.commit().unwrap();
        }
        let snap_rows = snap.db_mut().scan_all("t").unwrap();
        assert_eq!(snap_rows.len(), 1);
        let live_rows = db.scan_all("t").unwrap();
        assert_eq!(live_rows.len(), 2);
    }
}
