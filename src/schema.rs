//! Parses the bootstrap catalog (`sqlite_schema`) into logical column maps.
//!
//! Each catalog row's `sql` text is re-parsed with the grammar in `ddl.pest`
//! to recover the ordered column list, declared types, `PRIMARY KEY` /
//! `WITHOUT ROWID` markers, and index column lists. Columns whose
//! declared name matches `<logical>__hi`/`<logical>__lo` (or
//! `__dhi`/`__dlo`) are grouped into a single logical column so callers can
//! address a 128-bit GUID or decimal as one value.

use std::collections::HashMap;

use pest::Parser;

use crate::pager::PageNum;
use crate::sql_type::SqlType;

#[derive(pest_derive::Parser)]
#[grammar = "ddl.pest"]
struct DdlParser;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse DDL: {0}")]
    Parse(String),
    #[error("ambiguous or unsupported DDL grammar: {0}")]
    Ambiguous(String),
    #[error("unknown column type {0:?}")]
    UnknownType(String),
    #[error("table {0} not found")]
    TableNotFound(String),
    #[error("index {0} not found")]
    IndexNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The logical storage kind of a column as seen by callers, distinct from
/// the raw `SqlType` of its underlying physical column(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalKind {
    Plain(PlainKind),
    Guid,
    Decimal128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlainKind {
    Int,
    Text,
    Blob,
    Real,
}

impl From<SqlType> for PlainKind {
    fn from(t: SqlType) -> PlainKind {
        match t {
            SqlType::Int => PlainKind::Int,
            SqlType::Text => PlainKind::Text,
            SqlType::Blob => PlainKind::Blob,
            SqlType::Real => PlainKind::Real,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub not_null: bool,
}

/// A caller-addressable column. Most logical columns back onto exactly one
/// physical column; merged columns (GUID/decimal) back onto two.
#[derive(Debug, Clone)]
pub struct LogicalColumn {
    pub name: String,
    pub kind: LogicalKind,
    /// Ordinals into `TableSchema::physical_columns`.
    pub physical_ordinals: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub root_page: PageNum,
    pub sql: String,
    pub physical_columns: Vec<ColumnDef>,
    pub logical_columns: Vec<LogicalColumn>,
    pub without_rowid: bool,
    pub strict: bool,
    /// Physical ordinal of an `INTEGER PRIMARY KEY` column, which aliases the rowid.
    pub rowid_alias_ordinal: Option<usize>,
}

impl TableSchema {
    pub fn logical_ordinal(&self, name: &str) -> Option<usize> {
        self.logical_columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn physical_ordinal(&self, name: &str) -> Option<usize> {
        self.physical_columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub name: String,
    pub root_page: PageNum,
    pub table_name: String,
    /// Physical column names of the table, leading column first (sargability
    /// only ever considers the leading column).
    pub columns: Vec<String>,
    pub unique: bool,
}

/// The parsed DDL of one catalog row, before a root page number is known.
enum ParsedColumnDefs {
    Table {
        columns: Vec<ColumnDef>,
        without_rowid: bool,
        strict: bool,
    },
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"'))
        || (s.starts_with('`') && s.ends_with('`'))
        || (s.starts_with('[') && s.ends_with(']'))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn type_name_to_sql_type(raw: &str) -> SqlType {
    // SQLite-style type-affinity matching: the first recognized substring wins.
    // GUID/UUID/FIX128 declared types carry BLOB affinity at the physical level;
    // their logical interpretation is recovered separately via merged-column grouping.
    let up = raw.to_uppercase();
    if up.contains("INT") {
        SqlType::Int
    } else if up.contains("CHAR") || up.contains("TEXT") || up.contains("CLOB") {
        SqlType::Text
    } else if up.contains("REAL") || up.contains("FLOA") || up.contains("DOUB") {
        SqlType::Real
    } else {
        SqlType::Blob
    }
}

fn parse_column_def(pair: pest::iterators::Pair<Rule>) -> ColumnDef {
    let mut name = String::new();
    let mut sql_type = SqlType::Blob;
    let mut is_primary_key = false;
    let mut not_null = false;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::identifier => name = strip_quotes(p.as_str()),
            Rule::type_name => sql_type = type_name_to_sql_type(p.as_str()),
            Rule::column_constraint => {
                let text = p.as_str().to_uppercase();
                if text.starts_with("PRIMARY") {
                    is_primary_key = true;
                } else if text.starts_with("NOT") {
                    not_null = true;
                }
            }
            _ => {}
        }
    }
    ColumnDef { name, sql_type, is_primary_key, not_null }
}

/// Which of the three recognized DDL statements `ddl` is, without fully
/// parsing its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtKind {
    CreateTable,
    CreateIndex,
    AlterTable,
}

pub fn statement_kind(ddl: &str) -> Result<StmtKind> {
    let stmt = DdlParser::parse(Rule::ddl_stmt, ddl)
        .map_err(|e| Error::Parse(e.to_string()))?
        .next()
        .unwrap()
        .into_inner()
        .next()
        .unwrap();
    match stmt.as_rule() {
        Rule::create_table_stmt => Ok(StmtKind::CreateTable),
        Rule::create_index_stmt => Ok(StmtKind::CreateIndex),
        Rule::alter_table_stmt => Ok(StmtKind::AlterTable),
        other => Err(Error::Ambiguous(format!("unrecognized DDL statement: {:?}", other))),
    }
}

/// Parses a `CREATE TABLE` statement's body into its physical column list.
fn parse_create_table_ddl(ddl: &str) -> Result<ParsedColumnDefs> {
    let stmt = DdlParser::parse(Rule::ddl_stmt, ddl)
        .map_err(|e| Error::Parse(e.to_string()))?
        .next()
        .unwrap()
        .into_inner()
        .next()
        .unwrap();
    if stmt.as_rule() != Rule::create_table_stmt {
        return Err(Error::Ambiguous(format!("expected CREATE TABLE, got {:?}", stmt.as_rule())));
    }
    let mut columns = Vec::new();
    let mut without_rowid = false;
    let mut strict = false;
    for p in stmt.into_inner() {
        match p.as_rule() {
            Rule::column_defs => {
                for cd in p.into_inner() {
                    if cd.as_rule() == Rule::column_def {
                        columns.push(parse_column_def(cd));
                    }
                    // table_constraint (composite PRIMARY KEY) deliberately not
                    // expanded into rowid-alias handling: only a single-column
                    // INTEGER PRIMARY KEY aliases the rowid.
                }
            }
            Rule::without_rowid => without_rowid = true,
            Rule::strict => strict = true,
            _ => {}
        }
    }
    Ok(ParsedColumnDefs::Table { columns, without_rowid, strict })
}

/// Extracts just the table name out of a `CREATE TABLE` statement, for
/// writers that need the name before a root page (and hence a full
/// `TableSchema`) exists.
pub fn parse_create_table_name(ddl: &str) -> Result<String> {
    let stmt = DdlParser::parse(Rule::ddl_stmt, ddl)
        .map_err(|e| Error::Parse(e.to_string()))?
        .next()
        .unwrap()
        .into_inner()
        .next()
        .unwrap();
    if stmt.as_rule() != Rule::create_table_stmt {
        return Err(Error::Ambiguous(format!("expected CREATE TABLE, got {:?}", stmt.as_rule())));
    }
    stmt.into_inner()
        .find(|p| p.as_rule() == Rule::identifier)
        .map(|p| strip_quotes(p.as_str()))
        .ok_or_else(|| Error::Ambiguous("CREATE TABLE missing table name".to_string()))
}

/// Parses a `CREATE INDEX` statement into its table name and column list.
fn parse_create_index_ddl(ddl: &str) -> Result<(String, Vec<String>, bool)> {
    let stmt = DdlParser::parse(Rule::ddl_stmt, ddl)
        .map_err(|e| Error::Parse(e.to_string()))?
        .next()
        .unwrap()
        .into_inner()
        .next()
        .unwrap();
    if stmt.as_rule() != Rule::create_index_stmt {
        return Err(Error::Ambiguous(format!("expected CREATE INDEX, got {:?}", stmt.as_rule())));
    }
    let mut identifiers = Vec::new();
    let mut columns = Vec::new();
    let mut unique = false;
    for p in stmt.into_inner() {
        match p.as_rule() {
            Rule::unique => unique = true,
            Rule::identifier => identifiers.push(strip_quotes(p.as_str())),
            Rule::index_cols => {
                for ic in p.into_inner() {
                    let col = ic.into_inner().next().unwrap();
                    columns.push(strip_quotes(col.as_str()));
                }
            }
            _ => {}
        }
    }
    // `identifiers` holds [index_name, table_name] in source order; the
    // index's own name is already known from the catalog row it came from.
    if identifiers.len() < 2 || columns.is_empty() {
        return Err(Error::Ambiguous("CREATE INDEX missing table or column list".to_string()));
    }
    let table_name = identifiers[1].clone();
    Ok((table_name, columns, unique))
}

/// Extracts just the index's own name out of a `CREATE INDEX` statement.
pub fn parse_create_index_name(ddl: &str) -> Result<String> {
    let stmt = DdlParser::parse(Rule::ddl_stmt, ddl)
        .map_err(|e| Error::Parse(e.to_string()))?
        .next()
        .unwrap()
        .into_inner()
        .next()
        .unwrap();
    if stmt.as_rule() != Rule::create_index_stmt {
        return Err(Error::Ambiguous(format!("expected CREATE INDEX, got {:?}", stmt.as_rule())));
    }
    stmt.into_inner()
        .find(|p| p.as_rule() == Rule::identifier)
        .map(|p| strip_quotes(p.as_str()))
        .ok_or_else(|| Error::Ambiguous("CREATE INDEX missing index name".to_string()))
}

/// One DDL mutation recognized from `ALTER TABLE`.
pub enum AlterOp {
    AddColumn(ColumnDef),
    RenameTo(String),
}

pub fn parse_alter_table_ddl(ddl: &str) -> Result<(String, AlterOp)> {
    let stmt = DdlParser::parse(Rule::ddl_stmt, ddl)
        .map_err(|e| Error::Parse(e.to_string()))?
        .next()
        .unwrap()
        .into_inner()
        .next()
        .unwrap();
    if stmt.as_rule() != Rule::alter_table_stmt {
        return Err(Error::Ambiguous(format!("expected ALTER TABLE, got {:?}", stmt.as_rule())));
    }
    let mut inner = stmt.into_inner();
    let table_name = strip_quotes(inner.next().unwrap().as_str());
    let action = inner.next().ok_or_else(|| Error::Ambiguous("ALTER TABLE missing action".to_string()))?;
    match action.as_rule() {
        Rule::add_column => {
            let cd = action.into_inner().find(|p| p.as_rule() == Rule::column_def).unwrap();
            Ok((table_name, AlterOp::AddColumn(parse_column_def(cd))))
        }
        Rule::rename_to => {
            let new_name = strip_quotes(action.into_inner().next().unwrap().as_str());
            Ok((table_name, AlterOp::RenameTo(new_name)))
        }
        _ => Err(Error::Ambiguous("unrecognized ALTER TABLE action".to_string())),
    }
}

/// Splits a merged-column suffix (`__hi`/`__lo`/`__dhi`/`__dlo`) off a
/// physical column name, returning `(logical_name, is_hi_half, kind)`.
fn merge_suffix(name: &str) -> Option<(&str, bool, LogicalKind)> {
    if let Some(base) = name.strip_suffix("__hi") {
        Some((base, true, LogicalKind::Guid))
    } else if let Some(base) = name.strip_suffix("__lo") {
        Some((base, false, LogicalKind::Guid))
    } else if let Some(base) = name.strip_suffix("__dhi") {
        Some((base, true, LogicalKind::Decimal128))
    } else if let Some(base) = name.strip_suffix("__dlo") {
        Some((base, false, LogicalKind::Decimal128))
    } else {
        None
    }
}

/// Groups physical columns into logical columns, merging `__hi`/`__lo`
/// (and `__dhi`/`__dlo`) pairs into a single two-word logical column.
fn build_logical_columns(physical: &[ColumnDef]) -> Vec<LogicalColumn> {
    let mut logical: Vec<LogicalColumn> = Vec::new();
    let mut by_base: HashMap<String, usize> = HashMap::new();
    for (ordinal, col) in physical.iter().enumerate() {
        match merge_suffix(&col.name) {
            Some((base, is_hi, kind)) => {
                let key = base.to_ascii_lowercase();
                if let Some(&idx) = by_base.get(&key) {
                    let entry = &mut logical[idx];
                    if is_hi {
                        entry.physical_ordinals.insert(0, ordinal);
                    } else {
                        entry.physical_ordinals.push(ordinal);
                    }
                } else {
                    by_base.insert(key, logical.len());
                    logical.push(LogicalColumn {
                        name: base.to_string(),
                        kind,
                        physical_ordinals: vec![ordinal],
                    });
                }
            }
            None => {
                logical.push(LogicalColumn {
                    name: col.name.clone(),
                    kind: LogicalKind::Plain(col.sql_type.into()),
                    physical_ordinals: vec![ordinal],
                });
            }
        }
    }
    logical
}

/// Builds a `TableSchema` from one catalog row's `sql` text.
pub fn table_schema_from_ddl(name: &str, root_page: PageNum, ddl: &str) -> Result<TableSchema> {
    let ParsedColumnDefs::Table { columns, without_rowid, strict } = parse_create_table_ddl(ddl)?;
    let rowid_alias_ordinal = if without_rowid {
        None
    } else {
        columns.iter().position(|c| c.is_primary_key && c.sql_type == SqlType::Int)
    };
    let logical_columns = build_logical_columns(&columns);
    Ok(TableSchema {
        name: name.to_string(),
        root_page,
        sql: ddl.to_string(),
        physical_columns: columns,
        logical_columns,
        without_rowid,
        strict,
        rowid_alias_ordinal,
    })
}

/// Builds an `IndexSchema` from one catalog row's `sql` text.
pub fn index_schema_from_ddl(name: &str, root_page: PageNum, ddl: &str) -> Result<IndexSchema> {
    let (table_name, columns, unique) = parse_create_index_ddl(ddl)?;
    Ok(IndexSchema { name: name.to_string(), root_page, table_name, columns, unique })
}

/// The full set of user tables and indexes recovered from the catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tables: HashMap<String, TableSchema>,
    pub indexes: HashMap<String, IndexSchema>,
}

impl Catalog {
    pub fn indexes_on(&self, table_name: &str) -> Vec<&IndexSchema> {
        self.indexes.values().filter(|i| i.table_name.eq_ignore_ascii_case(table_name)).collect()
    }
}

impl crate::table_traits::TableMeta for TableSchema {
    fn column_names(&self) -> Vec<String> {
        self.physical_columns.iter().map(|c| c.name.clone()).collect()
    }
    fn column_types(&self) -> Vec<SqlType> {
        self.physical_columns.iter().map(|c| c.sql_type).collect()
    }
    fn table_name(&self) -> String {
        self.name.clone()
    }
    fn strict(&self) -> bool {
        self.strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_table() {
        let schema = table_schema_from_ddl(
            "users",
            2,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INT)",
        )
        .unwrap();
        assert_eq!(schema.physical_columns.len(), 3);
        assert_eq!(schema.rowid_alias_ordinal, Some(0));
        assert!(!schema.without_rowid);
        assert_eq!(schema.logical_columns.len(), 3);
    }

    #[test]
    fn parses_without_rowid_and_quoted_identifiers() {
        let schema = table_schema_from_ddl(
            "kv",
            3,
            "CREATE TABLE \"kv\" (\"k\" TEXT PRIMARY KEY, \"v\" BLOB) WITHOUT ROWID",
        )
        .unwrap();
        assert!(schema.without_rowid);
        assert_eq!(schema.rowid_alias_ordinal, None);
        assert_eq!(schema.physical_columns[0].name, "k");
    }

    #[test]
    fn groups_merged_guid_columns() {
        let schema = table_schema_from_ddl(
            "widgets",
            4,
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, g__hi INT, g__lo INT)",
        )
        .unwrap();
        let g = schema.logical_columns.iter().find(|c| c.name == "g").unwrap();
        assert_eq!(g.kind, LogicalKind::Guid);
        assert_eq!(g.physical_ordinals, vec![1, 2]);
        assert_eq!(schema.logical_columns.len(), 2);
    }

    #[test]
    fn parses_create_index() {
        let idx = index_schema_from_ddl("idx_users_name", 5, "CREATE INDEX idx_users_name ON users (name)").unwrap();
        assert_eq!(idx.table_name, "users");
        assert_eq!(idx.columns, vec!["name".to_string()]);
        assert!(!idx.unique);
    }

    #[test]
    fn parses_alter_table_add_column() {
        let (table, op) = parse_alter_table_ddl("ALTER TABLE users ADD COLUMN email TEXT").unwrap();
        assert_eq!(table, "users");
        match op {
            AlterOp::AddColumn(cd) => assert_eq!(cd.name, "email"),
            _ => panic!("expected AddColumn"),
        }
    }

    #[test]
    fn parses_alter_table_rename() {
        let (table, op) = parse_alter_table_ddl("ALTER TABLE users RENAME TO people").unwrap();
        assert_eq!(table, "users");
        match op {
            AlterOp::RenameTo(n) => assert_eq!(n, "people"),
            _ => panic!("expected RenameTo"),
        }
    }
}
