//! Top-level database handle: owns the pager, caches the parsed catalog, and
//! is the entry point for readers, writers, and DDL execution.

use crate::error::Error;
use crate::pager::{self, OpenOptions, Pager};
use crate::record;
use crate::schema::{self, Catalog};
use crate::sql_type::SqlType;
use crate::sql_value::SqlValue;

pub(crate) const SCHEMA_TABLE_NAME: &str = "sqlite_schema";
const SCHEMA_ROOT_PAGE: pager::PageNum = 1;

pub struct Db {
    pager: Pager,
    catalog: Catalog,
}

impl Db {
    pub fn open(path: &str, opts: &OpenOptions) -> Result<Db, Error> {
        Self::from_pager(pager::open(path, opts)?)
    }

    pub fn create(path: &str, opts: &OpenOptions) -> Result<Db, Error> {
        Self::from_pager(pager::create(path, opts)?)
    }

    pub fn open_memory(bytes: Vec<u8>, opts: &OpenOptions) -> Result<Db, Error> {
        Self::from_pager(pager::open_memory(bytes, opts)?)
    }

    pub fn create_in_memory(opts: &OpenOptions) -> Result<Db, Error> {
        Self::from_pager(pager::create_in_memory(opts)?)
    }

    fn from_pager(mut pager: Pager) -> Result<Db, Error> {
        let catalog = load_catalog(&mut pager)?;
        Ok(Db { pager, catalog })
    }

    /// Used by [`crate::snapshot`] to wrap an already-built pager (a cloned
    /// image) without re-running open/create bootstrap.
    pub(crate) fn from_parts(pager: Pager, catalog: Catalog) -> Db {
        Db { pager, catalog }
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    pub fn schema(&self) -> &Catalog {
        &self.catalog
    }

    pub fn reload_schema(&mut self) -> Result<(), Error> {
        self.catalog = load_catalog(&mut self.pager)?;
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&schema::TableSchema, Error> {
        self.catalog
            .tables
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::NotFound(format!("no such table: {name}")))
    }

    pub fn indexes_on(&self, table_name: &str) -> Vec<&schema::IndexSchema> {
        self.catalog.indexes_on(table_name)
    }

    /// Runs one DDL statement in its own implicit transaction: allocates a
    /// root page for the new table/index, inserts its catalog row, bumps the
    /// schema cookie, and reloads the cached catalog.
    pub fn execute_ddl(&mut self, ddl: &str) -> Result<(), Error> {
        let mut w = crate::writer::Writer::new(self);
        w.begin_transaction()?;
        w.execute(ddl)?;
        w.commit()?;
        self.reload_schema()
    }

    pub fn writer(&mut self) -> crate::writer::Writer<'_> {
        crate::writer::Writer::new(self)
    }

    pub fn create_reader<'a>(
        &'a mut self,
        table: &str,
        projection: Option<Vec<crate::project::SelectItem>>,
        filter: Option<crate::filter::Expr>,
    ) -> Result<crate::executor::Reader<'a>, Error> {
        crate::executor::Reader::new(self, table, projection, filter)
    }

    /// Convenience used by tests and the snapshot scenarios: scans every
    /// column of `table` and returns the fully materialized rows.
    pub fn scan_all(&mut self, table: &str) -> Result<Vec<crate::typed_row::Row>, Error> {
        let mut reader = self.create_reader(table, None, None)?;
        let mut out = Vec::new();
        while let Some(row) = reader.read()? {
            out.push(row);
        }
        Ok(out)
    }
}

/// Scans the bootstrap catalog tree (page 1) and parses every row's DDL text
/// into a logical schema.
pub fn load_catalog(pager: &mut Pager) -> Result<Catalog, Error> {
    let mut catalog = Catalog::default();
    let mut cursor = crate::btree::table::TableCursor::new(SCHEMA_ROOT_PAGE);
    cursor.first(pager)?;
    while let Some((_rowid, bytes)) = cursor.next(pager)? {
        let row = crate::typed_row::from_serialized(
            &[SqlType::Text, SqlType::Text, SqlType::Text, SqlType::Int, SqlType::Text],
            false,
            &bytes,
        )
        .map_err(|e| Error::CorruptPage(e.to_string()))?;
        let kind = text_of(&row.items[0]);
        let name = text_of(&row.items[1]);
        let root_page = int_of(&row.items[3]) as pager::PageNum;
        let sql = text_of(&row.items[4]);
        match kind.as_str() {
            "table" => {
                let table = schema::table_schema_from_ddl(&name, root_page, &sql)
                    .map_err(|e| Error::InvalidArgument(e.to_string()))?;
                catalog.tables.insert(table.name.clone(), table);
            }
            "index" => {
                let index = schema::index_schema_from_ddl(&name, root_page, &sql)
                    .map_err(|e| Error::InvalidArgument(e.to_string()))?;
                catalog.indexes.insert(index.name.clone(), index);
            }
            _ => {}
        }
    }
    Ok(catalog)
}

fn text_of(v: &SqlValue) -> String {
    match v {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Null() => String::new(),
        other => other.to_string(),
    }
}

fn int_of(v: &SqlValue) -> i64 {
    match v {
        SqlValue::Int(i) => *i,
        _ => 0,
    }
}

/// Builds the catalog row record for a freshly created table/index and
/// inserts it into the bootstrap tree. Shared by `CREATE TABLE`/`CREATE INDEX`
/// handling in [`crate::writer`].
pub(crate) fn insert_catalog_row(
    pager: &mut Pager,
    kind: &str,
    name: &str,
    tbl_name: &str,
    root_page: pager::PageNum,
    sql: &str,
) -> Result<(), Error> {
    let mut cursor = crate::btree::table::TableCursor::new(SCHEMA_ROOT_PAGE);
    let rowid = next_rowid(pager, &mut cursor)?;
    let record = record::encode_record(&[
        SqlValue::Text(kind.to_string()),
        SqlValue::Text(name.to_string()),
        SqlValue::Text(tbl_name.to_string()),
        SqlValue::Int(root_page as i64),
        SqlValue::Text(sql.to_string()),
    ]);
    Ok(cursor.insert(pager, rowid, &record)?)
}

fn next_rowid(pager: &mut Pager, cursor: &mut crate::btree::table::TableCursor) -> Result<i64, Error> {
    let mut max = 0i64;
    cursor.first(pager)?;
    while let Some((rowid, _)) = cursor.next(pager)? {
        if rowid > max {
            max = rowid;
        }
    }
    Ok(max + 1)
}
