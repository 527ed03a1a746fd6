//! Query execution: composes a source cursor, a residual filter, and a
//! projection into one forward-only row stream.
//!
//! The chosen [`crate::filter::Plan`] only narrows which rowids are visited;
//! it is never trusted as the sole source of truth for whether a row
//! matches. Every fetched row is re-checked against the full normalized
//! filter before being returned, so an index plan that over-selects (e.g.
//! scanning past equal keys to find a `>` bound) is still correct, only
//! less efficient than a tighter range would be.

use crate::btree::{index::IndexCursor, table::TableCursor, RowId};
use crate::db::Db;
use crate::error::Error;
use crate::filter::{Expr, Op, Plan};
use crate::project::{self, ProjectAction, SelectItem};
use crate::record::ValueIterator;
use crate::schema::TableSchema;
use crate::sql_type::SqlType;
use crate::sql_value::SqlValue;
use crate::table_traits::TableMeta;
use crate::typed_row::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    TableScan,
    SingleIndexSeek,
    RowIdIntersection,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    pub scanned_rows: u64,
    pub returned_rows: u64,
    pub index_entries_scanned: u64,
    pub index_hits: u64,
}

/// When to stop consuming a single ascending index scan, expressed over the
/// decoded leading-column value of each key.
enum StopCondition {
    None,
    WhileEq(SqlValue),
    WhileLe(SqlValue),
    WhilePrefix(String),
}

enum Source {
    Table(TableCursor),
    Index { cursor: IndexCursor, stop: StopCondition, exhausted: bool, seek_key: Option<Vec<u8>> },
    Intersection { rowids: std::vec::IntoIter<RowId>, all: Vec<RowId> },
}

pub struct Reader<'a> {
    db: &'a mut Db,
    table: TableSchema,
    colnames: Vec<String>,
    filter: Option<Expr>,
    projection: Option<(Vec<ProjectAction>, Vec<String>, Vec<SqlType>)>,
    source: Source,
    strategy: Strategy,
    diag: Diagnostics,
    current_rowid: Option<RowId>,
    after_rowid: RowId,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(
        db: &'a mut Db,
        table_name: &str,
        projection: Option<Vec<SelectItem>>,
        filter: Option<Expr>,
    ) -> Result<Reader<'a>, Error> {
        let table = db.table(table_name)?.clone();
        let colnames = table.column_names();
        let coltypes = table.column_types();

        let filter = filter.map(|e| e.expand_merged_columns(&table).to_nnf());

        let projection = match projection {
            Some(items) => Some(project::build_project(&colnames, &coltypes, &items)?),
            None => None,
        };

        let indexes: Vec<_> = db.indexes_on(&table.name).into_iter().cloned().collect();
        let (plan, strategy) = match &filter {
            Some(expr) => {
                let refs: Vec<&crate::schema::IndexSchema> = indexes.iter().collect();
                let plan = crate::filter::analyze(expr, &table, &refs);
                let strategy = match &plan {
                    Plan::TableScan | Plan::RowIdAliasShortcut => Strategy::TableScan,
                    Plan::SingleIndexSeek { .. } => Strategy::SingleIndexSeek,
                    Plan::RowIdIntersection { .. } => Strategy::RowIdIntersection,
                };
                (plan, strategy)
            }
            None => (Plan::TableScan, Strategy::TableScan),
        };

        let mut diag = Diagnostics::default();
        let source = match &plan {
            Plan::TableScan | Plan::RowIdAliasShortcut => {
                let mut cursor = TableCursor::new(table.root_page);
                cursor.first(db.pager_mut())?;
                Source::Table(cursor)
            }
            Plan::SingleIndexSeek { index_name } => {
                Self::open_index_source(db, &table, &indexes, index_name, filter.as_ref(), &mut diag)?
            }
            Plan::RowIdIntersection { index_names } => {
                let left = Self::collect_index_rowids(db, &table, &indexes, &index_names.0, filter.as_ref(), &mut diag)?;
                let right = Self::collect_index_rowids(db, &table, &indexes, &index_names.1, filter.as_ref(), &mut diag)?;
                let right_set: std::collections::HashSet<RowId> = right.into_iter().collect();
                let mut merged: Vec<RowId> = left.into_iter().filter(|r| right_set.contains(r)).collect();
                merged.sort_unstable();
                Source::Intersection { rowids: merged.clone().into_iter(), all: merged }
            }
        };

        Ok(Reader {
            db,
            table,
            colnames,
            filter,
            projection,
            source,
            strategy,
            diag,
            current_rowid: None,
            after_rowid: 0,
        })
    }

    /// Finds the top-level AND leaf over `column`, if any, returning its
    /// operator and (for the simple comparison operators) literal value.
    fn leaf_for_column<'e>(expr: &'e Expr, column: &str) -> Option<(&'e Op, Option<&'e SqlValue>)> {
        let mut leaves = Vec::new();
        crate::filter::collect_top_level_ands(expr, &mut leaves);
        leaves.into_iter().find_map(|l| match l {
            Expr::Leaf { column: c, op, value } if c.eq_ignore_ascii_case(column) => Some((op, value.as_ref())),
            _ => None,
        })
    }

    fn open_index_source(
        db: &mut Db,
        table: &TableSchema,
        indexes: &[crate::schema::IndexSchema],
        index_name: &str,
        filter: Option<&Expr>,
        diag: &mut Diagnostics,
    ) -> Result<Source, Error> {
        let index = indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(index_name))
            .ok_or_else(|| Error::NotFound(format!("no such index: {index_name}")))?;
        let lead_col = index.columns.first().cloned().unwrap_or_default();
        let leaf = filter.and_then(|e| Self::leaf_for_column(e, &lead_col));

        let mut cursor = IndexCursor::new(index.root_page);
        let (stop, seek_key) = match leaf {
            Some((Op::Eq, Some(v))) => {
                let key = crate::record::encode_record(&[v.clone()]);
                cursor.seek_ge(db.pager_mut(), &key)?;
                (StopCondition::WhileEq(v.clone()), Some(key))
            }
            Some((Op::Ge, Some(v))) | Some((Op::Gt, Some(v))) => {
                let key = crate::record::encode_record(&[v.clone()]);
                cursor.seek_ge(db.pager_mut(), &key)?;
                (StopCondition::None, Some(key))
            }
            Some((Op::Le, Some(v))) | Some((Op::Lt, Some(v))) => {
                cursor.first(db.pager_mut())?;
                (StopCondition::WhileLe(v.clone()), None)
            }
            Some((Op::Between(lo, hi), _)) => {
                let key = crate::record::encode_record(&[lo.clone()]);
                cursor.seek_ge(db.pager_mut(), &key)?;
                (StopCondition::WhileLe(hi.clone()), Some(key))
            }
            Some((Op::StartsWith(prefix), _)) => {
                let key = crate::record::encode_record(&[SqlValue::Text(prefix.clone())]);
                cursor.seek_ge(db.pager_mut(), &key)?;
                (StopCondition::WhilePrefix(prefix.clone()), Some(key))
            }
            Some((Op::In(vals), _)) if !vals.is_empty() => {
                let min = vals.iter().min_by(|a, b| cmp_sql_values(a, b)).cloned().unwrap();
                let key = crate::record::encode_record(&[min]);
                cursor.seek_ge(db.pager_mut(), &key)?;
                (StopCondition::None, Some(key))
            }
            _ => {
                cursor.first(db.pager_mut())?;
                (StopCondition::None, None)
            }
        };
        let _ = table;
        let _ = diag;
        Ok(Source::Index { cursor, stop, exhausted: false, seek_key })
    }

    fn collect_index_rowids(
        db: &mut Db,
        table: &TableSchema,
        indexes: &[crate::schema::IndexSchema],
        index_name: &str,
        filter: Option<&Expr>,
        diag: &mut Diagnostics,
    ) -> Result<Vec<RowId>, Error> {
        let mut source = Self::open_index_source(db, table, indexes, index_name, filter, diag)?;
        let mut out = Vec::new();
        loop {
            match &mut source {
                Source::Index { cursor, stop, exhausted, .. } => {
                    if *exhausted {
                        break;
                    }
                    match cursor.next(db.pager_mut())? {
                        Some(bytes) => {
                            diag.index_entries_scanned += 1;
                            let values: Vec<SqlValue> = ValueIterator::new(&bytes).map(|(st, b)| {
                                crate::serial_type::to_sql_value(&st, b).unwrap_or(SqlValue::Null())
                            }).collect();
                            let leading = values.first().cloned().unwrap_or(SqlValue::Null());
                            if !stop_allows(stop, &leading) {
                                *exhausted = true;
                                break;
                            }
                            if let Some(SqlValue::Int(rowid)) = values.last() {
                                out.push(*rowid);
                            }
                        }
                        None => {
                            *exhausted = true;
                            break;
                        }
                    }
                }
                _ => unreachable!("collect_index_rowids only opens an index source"),
            }
        }
        Ok(out)
    }

    /// Advances the source, returning the next row that satisfies the
    /// residual filter (or `None` when the source is exhausted).
    pub fn read(&mut self) -> Result<Option<Row>, Error> {
        loop {
            let fetched = self.advance_raw()?;
            let Some((rowid, bytes)) = fetched else { return Ok(None) };
            self.diag.scanned_rows += 1;
            if rowid <= self.after_rowid {
                continue;
            }
            let coltypes: Vec<SqlType> = self.table.column_types();
            let row = crate::typed_row::from_serialized(&coltypes, self.table.strict(), &bytes)?;
            let matched = self.filter.as_ref().map(|f| f.matches(&row, &self.colnames)).unwrap_or(true);
            if !matched {
                continue;
            }
            self.current_rowid = Some(rowid);
            self.diag.returned_rows += 1;
            let out = match &self.projection {
                Some((actions, ..)) => project::project_row(actions, &row),
                None => row,
            };
            return Ok(Some(out));
        }
    }

    fn advance_raw(&mut self) -> Result<Option<(RowId, Vec<u8>)>, Error> {
        loop {
            match &mut self.source {
                Source::Table(cursor) => return Ok(cursor.next(self.db.pager_mut())?),
                Source::Index { cursor, stop, exhausted, .. } => {
                    if *exhausted {
                        return Ok(None);
                    }
                    match cursor.next(self.db.pager_mut())? {
                        Some(bytes) => {
                            self.diag.index_entries_scanned += 1;
                            let values: Vec<SqlValue> = ValueIterator::new(&bytes)
                                .map(|(st, b)| crate::serial_type::to_sql_value(&st, b).unwrap_or(SqlValue::Null()))
                                .collect();
                            let leading = values.first().cloned().unwrap_or(SqlValue::Null());
                            if !stop_allows(stop, &leading) {
                                *exhausted = true;
                                return Ok(None);
                            }
                            self.diag.index_hits += 1;
                            let rowid = match values.last() {
                                Some(SqlValue::Int(r)) => *r,
                                _ => return Err(Error::CorruptPage("index key missing rowid tail".to_string())),
                            };
                            let mut tc = TableCursor::new(self.table.root_page);
                            match tc.seek(self.db.pager_mut(), rowid)? {
                                Some(record_bytes) => return Ok(Some((rowid, record_bytes))),
                                None => continue,
                            }
                        }
                        None => {
                            *exhausted = true;
                            return Ok(None);
                        }
                    }
                }
                Source::Intersection { rowids, .. } => match rowids.next() {
                    Some(rowid) => {
                        let mut tc = TableCursor::new(self.table.root_page);
                        match tc.seek(self.db.pager_mut(), rowid)? {
                            Some(record_bytes) => return Ok(Some((rowid, record_bytes))),
                            None => continue,
                        }
                    }
                    None => return Ok(None),
                },
            }
        }
    }

    /// Re-positions the source to resume just past `rowid` (values `<= 0`
    /// mean "from the start"), implementing cursor pagination.
    pub fn after_rowid(&mut self, rowid: RowId) -> Result<(), Error> {
        self.after_rowid = rowid.max(0);
        match &mut self.source {
            Source::Table(cursor) => cursor.first(self.db.pager_mut())?,
            Source::Index { cursor, exhausted, seek_key, .. } => {
                match seek_key {
                    Some(key) => {
                        cursor.seek_ge(self.db.pager_mut(), key)?;
                    }
                    None => cursor.first(self.db.pager_mut())?,
                }
                *exhausted = false;
            }
            Source::Intersection { rowids, all } => {
                *rowids = all.clone().into_iter();
            }
        }
        Ok(())
    }

    pub fn row_id(&self) -> Option<RowId> {
        self.current_rowid
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diag
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Drains the remainder of the stream, sorted by `key` ascending (or
    /// descending when `desc`), stable on ties. A materialized heap stands
    /// in for a heap-based external sort since result sets here always fit
    /// in memory.
    pub fn collect_sorted(&mut self, key: impl Fn(&Row) -> SqlValue, desc: bool) -> Result<Vec<Row>, Error> {
        let mut rows = Vec::new();
        while let Some(row) = self.read()? {
            rows.push(row);
        }
        rows.sort_by(|a, b| {
            let ord = cmp_sql_values(&key(a), &key(b));
            if desc {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(rows)
    }
}

fn stop_allows(stop: &StopCondition, leading: &SqlValue) -> bool {
    match stop {
        StopCondition::None => true,
        StopCondition::WhileEq(v) => cmp_sql_values(leading, v) == std::cmp::Ordering::Equal,
        StopCondition::WhileLe(v) => cmp_sql_values(leading, v) != std::cmp::Ordering::Greater,
        StopCondition::WhilePrefix(p) => matches!(leading, SqlValue::Text(s) if s.starts_with(p.as_str())),
    }
}

fn cmp_sql_values(a: &SqlValue, b: &SqlValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (SqlValue::Null(), SqlValue::Null()) => Ordering::Equal,
        (SqlValue::Null(), _) => Ordering::Less,
        (_, SqlValue::Null()) => Ordering::Greater,
        (SqlValue::Int(x), SqlValue::Int(y)) => x.cmp(y),
        (SqlValue::Real(x), SqlValue::Real(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (SqlValue::Int(x), SqlValue::Real(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (SqlValue::Real(x), SqlValue::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (SqlValue::Text(x), SqlValue::Text(y)) => x.as_bytes().cmp(y.as_bytes()),
        (SqlValue::Blob(x), SqlValue::Blob(y)) => x.cmp(y),
        (SqlValue::Bool(x), SqlValue::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// An aggregate accumulator for one GROUP BY bucket.
#[derive(Debug, Clone)]
pub enum Aggregate {
    CountStar(i64),
    CountCol(i64),
    Sum(Option<f64>),
    Avg { sum: f64, n: i64 },
    Min(Option<SqlValue>),
    Max(Option<SqlValue>),
}

impl Aggregate {
    pub fn new_count_star() -> Aggregate {
        Aggregate::CountStar(0)
    }
    pub fn new_count_col() -> Aggregate {
        Aggregate::CountCol(0)
    }
    pub fn new_sum() -> Aggregate {
        Aggregate::Sum(None)
    }
    pub fn new_avg() -> Aggregate {
        Aggregate::Avg { sum: 0.0, n: 0 }
    }
    pub fn new_min() -> Aggregate {
        Aggregate::Min(None)
    }
    pub fn new_max() -> Aggregate {
        Aggregate::Max(None)
    }

    pub fn accumulate(&mut self, value: &SqlValue) {
        match self {
            Aggregate::CountStar(n) => *n += 1,
            Aggregate::CountCol(n) => {
                if !matches!(value, SqlValue::Null()) {
                    *n += 1;
                }
            }
            Aggregate::Sum(acc) => {
                if let Some(f) = as_f64(value) {
                    *acc = Some(acc.unwrap_or(0.0) + f);
                }
            }
            Aggregate::Avg { sum, n } => {
                if let Some(f) = as_f64(value) {
                    *sum += f;
                    *n += 1;
                }
            }
            Aggregate::Min(cur) => {
                if !matches!(value, SqlValue::Null()) {
                    let replace = match cur {
                        None => true,
                        Some(existing) => cmp_sql_values(value, existing) == std::cmp::Ordering::Less,
                    };
                    if replace {
                        *cur = Some(value.clone());
                    }
                }
            }
            Aggregate::Max(cur) => {
                if !matches!(value, SqlValue::Null()) {
                    let replace = match cur {
                        None => true,
                        Some(existing) => cmp_sql_values(value, existing) == std::cmp::Ordering::Greater,
                    };
                    if replace {
                        *cur = Some(value.clone());
                    }
                }
            }
        }
    }

    pub fn finish(&self) -> SqlValue {
        match self {
            Aggregate::CountStar(n) | Aggregate::CountCol(n) => SqlValue::Int(*n),
            Aggregate::Sum(acc) => acc.map(SqlValue::Real).unwrap_or(SqlValue::Null()),
            Aggregate::Avg { sum, n } => {
                if *n == 0 {
                    SqlValue::Null()
                } else {
                    SqlValue::Real(sum / *n as f64)
                }
            }
            Aggregate::Min(v) | Aggregate::Max(v) => v.clone().unwrap_or(SqlValue::Null()),
        }
    }
}

fn as_f64(v: &SqlValue) -> Option<f64> {
    match v {
        SqlValue::Int(i) => Some(*i as f64),
        SqlValue::Real(f) => Some(*f),
        _ => None,
    }
}

/// Hash `GROUP BY`, keyed by the projected tuple. `key_of`
/// extracts the grouping key from a row; `new_aggs`/`accumulate` build and
/// update one accumulator set per distinct key.
pub fn group_by(
    rows: &[Row],
    key_of: impl Fn(&Row) -> Vec<SqlValue>,
    mut new_aggs: impl FnMut() -> Vec<Aggregate>,
    value_of: impl Fn(&Row, usize) -> SqlValue,
    num_aggs: usize,
) -> Vec<(Vec<SqlValue>, Vec<SqlValue>)> {
    use std::collections::HashMap;
    let mut buckets: HashMap<Vec<u8>, (Vec<SqlValue>, Vec<Aggregate>)> = HashMap::new();
    let mut order: Vec<Vec<u8>> = Vec::new();
    for row in rows {
        let key = key_of(row);
        let fingerprint = crate::record::encode_record(&key);
        let entry = buckets.entry(fingerprint.clone()).or_insert_with(|| {
            order.push(fingerprint.clone());
            (key.clone(), new_aggs())
        });
        for i in 0..num_aggs {
            entry.1[i].accumulate(&value_of(row, i));
        }
    }
    order
        .into_iter()
        .map(|fp| {
            let (key, aggs) = buckets.remove(&fp).unwrap();
            (key, aggs.iter().map(|a| a.finish()).collect())
        })
        .collect()
}

/// `DISTINCT`/set-operation helper: deduplicates rows by the byte
/// fingerprint of their projected tuple, preserving first-seen order
/// `UNION ALL` skips this step entirely (simple concatenation).
pub fn dedup_by_fingerprint(rows: Vec<Row>) -> Vec<Row> {
    use std::collections::HashSet;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let fp = crate::record::encode_record(&row.items);
        if seen.insert(fp) {
            out.push(row);
        }
    }
    out
}

/// `INTERSECT`: rows present in both `a` and `b` (by fingerprint), dedup'd.
pub fn intersect(a: Vec<Row>, b: Vec<Row>) -> Vec<Row> {
    use std::collections::HashSet;
    let b_fps: HashSet<Vec<u8>> = b.iter().map(|r| crate::record::encode_record(&r.items)).collect();
    dedup_by_fingerprint(a.into_iter().filter(|r| b_fps.contains(&crate::record::encode_record(&r.items))).collect())
}

/// `EXCEPT`: rows in `a` not present in `b` (by fingerprint), dedup'd.
pub fn except(a: Vec<Row>, b: Vec<Row>) -> Vec<Row> {
    use std::collections::HashSet;
    let b_fps: HashSet<Vec<u8>> = b.iter().map(|r| crate::record::encode_record(&r.items)).collect();
    dedup_by_fingerprint(a.into_iter().filter(|r| !b_fps.contains(&crate::record::encode_record(&r.items))).collect())
}

/// Bounded top-K selection: keeps the `k` rows with the smallest
/// `score`, ties broken by rowid ascending. `k` must be at least 1.
pub fn top_k(mut scored: Vec<(RowId, f64, Row)>, k: usize) -> Vec<Row> {
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored.into_iter().map(|(_, _, row)| row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::OpenOptions;

    fn setup() -> Db {
        let mut db = Db::create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        db.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, age INT)").unwrap();
        {
            let mut w = db.writer();
            w.begin_transaction().unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("alice".into()), SqlValue::Int(30)]).unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("bob".into()), SqlValue::Int(25)]).unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("carol".into()), SqlValue::Int(40)]).unwrap();
            w.commit().unwrap();
        }
        db
    }

    #[test]
    fn table_scan_returns_all_rows_in_rowid_order() {
        let mut db = setup();
        let mut reader = db.create_reader("t", None, None).unwrap();
        let mut names = Vec::new();
        while let Some(row) = reader.read().unwrap() {
            if let SqlValue::Text(n) = &row.items[1] {
                names.push(n.clone());
            }
        }
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(reader.strategy(), Strategy::TableScan);
    }

    #[test]
    fn filter_applies_residual_predicate() {
        let mut db = setup();
        let filt = Expr::cmp("age", Op::Ge, SqlValue::Int(30));
        let mut reader = db.create_reader("t", None, Some(filt)).unwrap();
        let mut ages = Vec::new();
        while let Some(row) = reader.read().unwrap() {
            if let SqlValue::Int(a) = &row.items[2] {
                ages.push(*a);
            }
        }
        assert_eq!(ages, vec![30, 40]);
    }

    #[test]
    fn projection_selects_named_columns() {
        let mut db = setup();
        let items = vec![SelectItem::Column("name".to_string())];
        let mut reader = db.create_reader("t", Some(items), None).unwrap();
        let row = reader.read().unwrap().unwrap();
        assert_eq!(row.items.len(), 1);
    }

    #[test]
    fn after_rowid_resumes_past_a_given_row() {
        let mut db = setup();
        let mut reader = db.create_reader("t", None, None).unwrap();
        reader.read().unwrap();
        let first_rowid = reader.row_id().unwrap();
        reader.after_rowid(first_rowid).unwrap();
        let row = reader.read().unwrap().unwrap();
        if let SqlValue::Text(n) = &row.items[1] {
            assert_eq!(n, "bob");
        }
    }

    #[test]
    fn after_rowid_resumes_within_an_index_seek_plan() {
        let mut db = Db::create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        db.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, grp TEXT, v INT)").unwrap();
        db.execute_ddl("CREATE INDEX t_grp ON t (grp)").unwrap();
        {
            let mut w = db.writer();
            w.begin_transaction().unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("a".into()), SqlValue::Int(1)]).unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("a".into()), SqlValue::Int(2)]).unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("a".into()), SqlValue::Int(3)]).unwrap();
            w.insert("t", &[SqlValue::Null(), SqlValue::Text("b".into()), SqlValue::Int(4)]).unwrap();
            w.commit().unwrap();
        }

        let filter = Expr::cmp("grp", Op::Eq, SqlValue::Text("a".into()));
        let mut reader = db.create_reader("t", None, Some(filter)).unwrap();
        assert_eq!(reader.strategy(), Strategy::SingleIndexSeek);

        reader.read().unwrap().unwrap();
        let first_rowid = reader.row_id().unwrap();
        reader.after_rowid(first_rowid).unwrap();

        let mut remaining = Vec::new();
        while let Some(row) = reader.read().unwrap() {
            if let SqlValue::Int(v) = &row.items[2] {
                remaining.push(*v);
            }
        }
        assert_eq!(remaining, vec![2, 3]);
    }

    #[test]
    fn group_by_counts_rows_per_bucket() {
        let rows = vec![
            Row { items: vec![SqlValue::Text("x".into()), SqlValue::Int(1)] },
            Row { items: vec![SqlValue::Text("x".into()), SqlValue::Int(2)] },
            Row { items: vec![SqlValue::Text("y".into()), SqlValue::Int(3)] },
        ];
        let out = group_by(
            &rows,
            |r| vec![r.items[0].clone()],
            || vec![Aggregate::new_count_star()],
            |r, _| r.items[1].clone(),
            1,
        );
        assert_eq!(out.len(), 2);
        let x = out.iter().find(|(k, _)| k[0] == SqlValue::Text("x".into())).unwrap();
        assert_eq!(x.1[0], SqlValue::Int(2));
    }

    #[test]
    fn dedup_by_fingerprint_removes_duplicate_projected_rows() {
        let rows = vec![
            Row { items: vec![SqlValue::Int(1)] },
            Row { items: vec![SqlValue::Int(1)] },
            Row { items: vec![SqlValue::Int(2)] },
        ];
        assert_eq!(dedup_by_fingerprint(rows).len(), 2);
    }
}
