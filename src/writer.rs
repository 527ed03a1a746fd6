//! Row mutation and DDL execution, plus the writer lifecycle state machine
//! for the writer lifecycle state machine.
//!
//! Every mutating operation goes through `Writer`, which borrows the `Db`
//! for the duration of one transaction. A single writer at a time is
//! permitted (enforced by the pager's own `begin_transaction`/`TransactionAlreadyOpen`
//! check); this type only adds the Idle/InTransaction/Disposed bookkeeping
//! the spec's state machine names.

use crate::btree::{index::IndexCursor, table::TableCursor, RowId};
use crate::db::Db;
use crate::error::Error;
use crate::record;
use crate::schema::{self, StmtKind};
use crate::sql_value::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    InTransaction,
    Disposed,
}

pub struct Writer<'a> {
    db: &'a mut Db,
    state: WriterState,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(db: &'a mut Db) -> Writer<'a> {
        Writer { db, state: WriterState::Idle }
    }

    fn require_in_transaction(&self) -> Result<(), Error> {
        match self.state {
            WriterState::Disposed => Err(Error::ObjectDisposed),
            WriterState::InTransaction => Ok(()),
            WriterState::Idle => Err(Error::InvalidOperation("no transaction is in progress".to_string())),
        }
    }

    pub fn begin_transaction(&mut self) -> Result<(), Error> {
        if self.state == WriterState::Disposed {
            return Err(Error::ObjectDisposed);
        }
        if self.state == WriterState::InTransaction {
            return Err(Error::InvalidOperation("a transaction is already in progress".to_string()));
        }
        self.db.pager_mut().begin_transaction()?;
        self.state = WriterState::InTransaction;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), Error> {
        self.require_in_transaction()?;
        self.db.pager_mut().commit()?;
        self.state = WriterState::Idle;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), Error> {
        self.require_in_transaction()?;
        self.db.pager_mut().rollback()?;
        self.state = WriterState::Idle;
        Ok(())
    }

    pub fn dispose(&mut self) {
        self.state = WriterState::Disposed;
    }

    /// Executes one DDL statement inside the currently open transaction
    /// Recognizes `CREATE TABLE`, `CREATE INDEX`, and
    /// `ALTER TABLE ... {ADD COLUMN, RENAME TO}`, each tolerating
    /// `IF NOT EXISTS`.
    pub fn execute(&mut self, ddl: &str) -> Result<(), Error> {
        self.require_in_transaction()?;
        let kind = schema::statement_kind(ddl).map_err(Error::from)?;
        match kind {
            StmtKind::CreateTable => self.create_table(ddl),
            StmtKind::CreateIndex => self.create_index(ddl),
            StmtKind::AlterTable => self.alter_table(ddl),
        }
    }

    fn tolerates_if_not_exists(ddl: &str) -> bool {
        ddl.to_uppercase().contains("IF NOT EXISTS")
    }

    fn create_table(&mut self, ddl: &str) -> Result<(), Error> {
        let name = schema::parse_create_table_name(ddl).map_err(Error::from)?;
        if self.db.schema().tables.contains_key(&name) {
            return if Self::tolerates_if_not_exists(ddl) {
                Ok(())
            } else {
                Err(Error::Constraint(format!("table {name} already exists")))
            };
        }
        let root_page = self.db.pager_mut().allocate()?;
        crate::btree::table::init_root_page(self.db.pager_mut(), root_page)?;
        crate::db::insert_catalog_row(self.db.pager_mut(), "table", &name, &name, root_page, ddl)?;
        self.db.pager_mut().bump_schema_cookie()?;
        log::info!("created table {name} on page {root_page}");
        Ok(())
    }

    fn create_index(&mut self, ddl: &str) -> Result<(), Error> {
        let name = schema::parse_create_index_name(ddl).map_err(Error::from)?;
        if self.db.schema().indexes.contains_key(&name) {
            return if Self::tolerates_if_not_exists(ddl) {
                Ok(())
            } else {
                Err(Error::Constraint(format!("index {name} already exists")))
            };
        }
        let index_schema = schema::index_schema_from_ddl(&name, 0, ddl).map_err(Error::from)?;
        let table = self.db.table(&index_schema.table_name)?.clone();

        let root_page = self.db.pager_mut().allocate()?;
        crate::btree::index::init_root_page(self.db.pager_mut(), root_page)?;
        crate::db::insert_catalog_row(self.db.pager_mut(), "index", &name, &table.name, root_page, ddl)?;

        // Backfill: every existing row gets an index entry.
        let mut ic = IndexCursor::new(root_page);
        let mut tc = TableCursor::new(table.root_page);
        tc.first(self.db.pager_mut())?;
        let mut rows_indexed = 0u64;
        while let Some((rowid, bytes)) = tc.next(self.db.pager_mut())? {
            let key = build_index_key(&table, &index_schema.columns, rowid, &bytes)?;
            ic.insert(self.db.pager_mut(), &key)?;
            rows_indexed += 1;
        }
        self.db.pager_mut().bump_schema_cookie()?;
        log::info!("created index {name} on {} ({} backfilled rows)", table.name, rows_indexed);
        Ok(())
    }

    fn alter_table(&mut self, ddl: &str) -> Result<(), Error> {
        let (table_name, op) = schema::parse_alter_table_ddl(ddl).map_err(Error::from)?;
        let existing = self.db.table(&table_name)?.clone();
        let new_sql = match &op {
            schema::AlterOp::AddColumn(col) => add_column_to_ddl(&existing.sql, &col.name, &format!("{:?}", col.sql_type)),
            schema::AlterOp::RenameTo(new_name) => rename_table_in_ddl(&existing.sql, &table_name, new_name),
        };
        // Rewrite the catalog row in place: same root page, new `sql` (and
        // `name`/`tbl_name` on rename), same rowid. Simplest correct path is
        // delete-then-reinsert, mirroring how an update with a differently
        // sized record is handled elsewhere.
        let new_name = match &op {
            schema::AlterOp::RenameTo(n) => n.clone(),
            _ => table_name.clone(),
        };
        delete_catalog_row(self.db.pager_mut(), &table_name)?;
        crate::db::insert_catalog_row(self.db.pager_mut(), "table", &new_name, &new_name, existing.root_page, &new_sql)?;
        self.db.pager_mut().bump_schema_cookie()?;
        Ok(())
    }

    /// Inserts one row, mapping logical column order to physical storage
    /// Returns the assigned rowid.
    pub fn insert(&mut self, table_name: &str, logical_values: &[SqlValue]) -> Result<RowId, Error> {
        self.require_in_transaction()?;
        let table = self.db.table(table_name)?.clone();
        if logical_values.len() != table.logical_columns.len() {
            return Err(Error::InvalidArgument(format!(
                "table {} has {} logical columns, got {}",
                table_name,
                table.logical_columns.len(),
                logical_values.len()
            )));
        }
        let physical = expand_logical_row(&table, logical_values)?;
        crate::typed_row::validate_row_for_table(&table, &physical)?;

        let mut tc = TableCursor::new(table.root_page);
        let rowid = match table.rowid_alias_ordinal {
            Some(ord) => match physical[ord] {
                SqlValue::Int(v) => v,
                SqlValue::Null() => self.allocate_rowid(&table)?,
                _ => return Err(Error::Constraint("INTEGER PRIMARY KEY value must be an integer".to_string())),
            },
            None => self.allocate_rowid(&table)?,
        };
        let record_bytes = record::encode_record(&physical);
        tc.insert(self.db.pager_mut(), rowid, &record_bytes)?;

        for index in self.db.indexes_on(&table.name).into_iter().cloned().collect::<Vec<_>>() {
            let key = build_index_key(&table, &index.columns, rowid, &record_bytes)?;
            IndexCursor::new(index.root_page).insert(self.db.pager_mut(), &key)?;
        }
        Ok(rowid)
    }

    fn allocate_rowid(&mut self, table: &schema::TableSchema) -> Result<RowId, Error> {
        let mut tc = TableCursor::new(table.root_page);
        let mut max = 0i64;
        tc.first(self.db.pager_mut())?;
        while let Some((rowid, _)) = tc.next(self.db.pager_mut())? {
            if rowid > max {
                max = rowid;
            }
        }
        Ok(max + 1)
    }

    /// Updates one row by rowid. Re-encodes and, if the new record's size
    /// differs from a simple in-place fit, relies on the table cursor's
    /// insert to split/merge as needed. Returns `false` if no such
    /// row exists.
    pub fn update(&mut self, table_name: &str, rowid: RowId, logical_values: &[SqlValue]) -> Result<bool, Error> {
        self.require_in_transaction()?;
        let table = self.db.table(table_name)?.clone();
        let mut tc = TableCursor::new(table.root_page);
        let existing = tc.seek(self.db.pager_mut(), rowid)?;
        let Some(old_bytes) = existing else { return Ok(false) };

        let physical = expand_logical_row(&table, logical_values)?;
        crate::typed_row::validate_row_for_table(&table, &physical)?;
        let new_bytes = record::encode_record(&physical);

        for index in self.db.indexes_on(&table.name).into_iter().cloned().collect::<Vec<_>>() {
            let old_key = build_index_key(&table, &index.columns, rowid, &old_bytes)?;
            IndexCursor::new(index.root_page).delete(self.db.pager_mut(), &old_key)?;
        }

        tc.delete(self.db.pager_mut(), rowid)?;
        tc.insert(self.db.pager_mut(), rowid, &new_bytes)?;

        for index in self.db.indexes_on(&table.name).into_iter().cloned().collect::<Vec<_>>() {
            let new_key = build_index_key(&table, &index.columns, rowid, &new_bytes)?;
            IndexCursor::new(index.root_page).insert(self.db.pager_mut(), &new_key)?;
        }
        Ok(true)
    }

    /// Deletes one row and every index entry derived from it.
    pub fn delete(&mut self, table_name: &str, rowid: RowId) -> Result<bool, Error> {
        self.require_in_transaction()?;
        let table = self.db.table(table_name)?.clone();
        let mut tc = TableCursor::new(table.root_page);
        let Some(bytes) = tc.seek(self.db.pager_mut(), rowid)? else { return Ok(false) };

        for index in self.db.indexes_on(&table.name).into_iter().cloned().collect::<Vec<_>>() {
            let key = build_index_key(&table, &index.columns, rowid, &bytes)?;
            IndexCursor::new(index.root_page).delete(self.db.pager_mut(), &key)?;
        }
        tc.delete(self.db.pager_mut(), rowid)?;
        Ok(true)
    }

    /// Inserts `records` in groups of `commit_interval`, committing the
    /// writer's own transaction after every successful group and finally at
    /// the end. An empty batch returns an empty vector without
    /// beginning or committing a transaction.
    pub fn insert_batch(
        &mut self,
        table_name: &str,
        records: &[Vec<SqlValue>],
        commit_interval: i64,
    ) -> Result<Vec<RowId>, Error> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if commit_interval <= 0 {
            return Err(Error::InvalidArgument("commit_interval must be positive".to_string()));
        }
        let commit_interval = commit_interval as usize;
        let mut rowids = Vec::with_capacity(records.len());
        let mut since_commit = 0usize;
        self.begin_transaction()?;
        for row in records {
            let rowid = self.insert(table_name, row)?;
            rowids.push(rowid);
            since_commit += 1;
            if since_commit == commit_interval {
                self.commit()?;
                log::debug!("insert_batch committed {} row(s) into {table_name}", rowids.len());
                since_commit = 0;
                if rowids.len() < records.len() {
                    self.begin_transaction()?;
                }
            }
        }
        if since_commit > 0 {
            self.commit()?;
        }
        Ok(rowids)
    }
}

/// Expands logical column values into the table's physical column order,
/// splitting a merged Guid/Decimal128 value into its two physical integers.
fn expand_logical_row(table: &schema::TableSchema, logical_values: &[SqlValue]) -> Result<Vec<SqlValue>, Error> {
    let mut physical = vec![SqlValue::Null(); table.physical_columns.len()];
    for (lc, value) in table.logical_columns.iter().zip(logical_values.iter()) {
        if lc.physical_ordinals.len() == 1 {
            physical[lc.physical_ordinals[0]] = value.clone();
            continue;
        }
        let (hi, lo) = match value {
            SqlValue::Blob(b) if b.len() == 16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(b);
                crate::guid::Guid::from_bytes(bytes).to_parts()
            }
            SqlValue::Null() => (0, 0),
            other => {
                return Err(Error::Constraint(format!(
                    "merged column {} expects a 16-byte value, got {:?}",
                    lc.name, other
                )))
            }
        };
        physical[lc.physical_ordinals[0]] = SqlValue::Int(hi);
        physical[lc.physical_ordinals[1]] = SqlValue::Int(lo);
    }
    Ok(physical)
}

/// Builds an index key: the indexed physical columns' values followed by the
/// rowid, encoded the same way a record is.
fn build_index_key(
    table: &schema::TableSchema,
    index_columns: &[String],
    rowid: RowId,
    record_bytes: &[u8],
) -> Result<Vec<u8>, Error> {
    use crate::table_traits::TableMeta;
    let row = crate::typed_row::from_serialized(&table.column_types(), false, record_bytes)?;
    let mut values = Vec::with_capacity(index_columns.len() + 1);
    for col in index_columns {
        let ord = table
            .physical_ordinal(col)
            .ok_or_else(|| Error::NotFound(format!("no such column: {col}")))?;
        values.push(row.items[ord].clone());
    }
    values.push(SqlValue::Int(rowid));
    Ok(record::encode_record(&values))
}

fn delete_catalog_row(pager: &mut crate::pager::Pager, table_name: &str) -> Result<(), Error> {
    let mut cursor = TableCursor::new(1);
    cursor.first(pager)?;
    let mut target = None;
    while let Some((rowid, bytes)) = cursor.next(pager)? {
        let row = crate::typed_row::from_serialized(
            &[
                crate::sql_type::SqlType::Text,
                crate::sql_type::SqlType::Text,
                crate::sql_type::SqlType::Text,
                crate::sql_type::SqlType::Int,
                crate::sql_type::SqlType::Text,
            ],
            false,
            &bytes,
        )?;
        if let SqlValue::Text(name) = &row.items[1] {
            if name.eq_ignore_ascii_case(table_name) {
                target = Some(rowid);
                break;
            }
        }
    }
    if let Some(rowid) = target {
        cursor.delete(pager, rowid)?;
    }
    Ok(())
}

fn add_column_to_ddl(sql: &str, col_name: &str, col_type: &str) -> String {
    let trimmed = sql.trim_end_matches(';').trim_end();
    match trimmed.rfind(')') {
        Some(idx) => format!("{}, {} {}{}", &trimmed[..idx], col_name, col_type, &trimmed[idx..]),
        None => trimmed.to_string(),
    }
}

fn rename_table_in_ddl(sql: &str, old_name: &str, new_name: &str) -> String {
    // The table name is the first identifier-shaped token after TABLE; a
    // straightforward case-insensitive first-match replace is sufficient
    // since catalog DDL is engine-generated, not arbitrary user text.
    let lower = sql.to_lowercase();
    if let Some(pos) = lower.find(&old_name.to_lowercase()) {
        format!("{}{}{}", &sql[..pos], new_name, &sql[pos + old_name.len()..])
    } else {
        sql.to_string()
    }
}
