//! The "filter-star" predicate tree: a portable representation of a
//! WHERE clause, independent of any particular SQL front end.
//!
//! A tree is built once per query shape, normalized to negation-normal form,
//! and analyzed against a table's indexes to choose an execution plan. The
//! chosen plan decides which rowid stream the executor pulls from; the
//! compiled predicate itself is evaluated against the already-decoded row
//! (`typed_row::Row`) rather than raw page bytes — comparisons still go
//! through `serial_type`'s storage-class ordering, so cross-type comparisons
//! (e.g. an INTEGER column compared to a REAL literal) behave exactly as
//! reading the page bytes directly would.

use crate::schema::TableSchema;
use crate::sql_value::SqlValue;
use crate::typed_row::Row;
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Between(SqlValue, SqlValue),
    In(Vec<SqlValue>),
    NotIn(Vec<SqlValue>),
    IsNull,
    IsNotNull,
    StartsWith(String),
    EndsWith(String),
    Contains(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Leaf { column: String, op: Op, value: Option<SqlValue> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn cmp(column: &str, op: Op, value: SqlValue) -> Expr {
        Expr::Leaf { column: column.to_string(), op, value: Some(value) }
    }

    pub fn is_null(column: &str) -> Expr {
        Expr::Leaf { column: column.to_string(), op: Op::IsNull, value: None }
    }

    pub fn is_not_null(column: &str) -> Expr {
        Expr::Leaf { column: column.to_string(), op: Op::IsNotNull, value: None }
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// Rewrites a merged-column leaf (`g = <guid>`) into the AND of its two
    /// physical-column leaves. Plain columns pass through
    /// unchanged. Boolean combinators recurse.
    pub fn expand_merged_columns(self, table: &TableSchema) -> Expr {
        match self {
            Expr::And(l, r) => Expr::And(
                Box::new(l.expand_merged_columns(table)),
                Box::new(r.expand_merged_columns(table)),
            ),
            Expr::Or(l, r) => Expr::Or(
                Box::new(l.expand_merged_columns(table)),
                Box::new(r.expand_merged_columns(table)),
            ),
            Expr::Not(e) => Expr::Not(Box::new(e.expand_merged_columns(table))),
            Expr::Leaf { column, op, value } => {
                let logical = table.logical_columns.iter().find(|lc| lc.name.eq_ignore_ascii_case(&column));
                match (logical, &op, &value) {
                    (Some(lc), Op::Eq, Some(v)) if lc.physical_ordinals.len() == 2 => {
                        let (hi, lo) = split_merged_value(v);
                        let hi_name = table.physical_columns[lc.physical_ordinals[0]].name.clone();
                        let lo_name = table.physical_columns[lc.physical_ordinals[1]].name.clone();
                        Expr::cmp(&hi_name, Op::Eq, hi).and(Expr::cmp(&lo_name, Op::Eq, lo))
                    }
                    _ => Expr::Leaf { column, op, value },
                }
            }
        }
    }

    /// Pushes NOT down to the leaves (negation-normal form).
    pub fn to_nnf(self) -> Expr {
        match self {
            Expr::Not(inner) => match *inner {
                Expr::Not(e) => e.to_nnf(),
                Expr::And(l, r) => Expr::Or(
                    Box::new(Expr::Not(l).to_nnf()),
                    Box::new(Expr::Not(r).to_nnf()),
                ),
                Expr::Or(l, r) => Expr::And(
                    Box::new(Expr::Not(l).to_nnf()),
                    Box::new(Expr::Not(r).to_nnf()),
                ),
                Expr::Leaf { column, op, value } => Expr::Leaf { column, op: negate_op(op), value },
            },
            Expr::And(l, r) => Expr::And(Box::new(l.to_nnf()), Box::new(r.to_nnf())),
            Expr::Or(l, r) => Expr::Or(Box::new(l.to_nnf()), Box::new(r.to_nnf())),
            leaf => leaf,
        }
    }

    /// Three-valued evaluation against a decoded row. `None` is SQL's
    /// "unknown", which a top-level predicate treats as not-matched.
    pub fn eval(&self, row: &Row, colnames: &[String]) -> Option<bool> {
        match self {
            Expr::Leaf { column, op, value } => {
                let idx = colnames.iter().position(|c| c.eq_ignore_ascii_case(column))?;
                let actual = &row.items[idx];
                eval_leaf(actual, op, value.as_ref())
            }
            Expr::And(l, r) => match (l.eval(row, colnames), r.eval(row, colnames)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Expr::Or(l, r) => match (l.eval(row, colnames), r.eval(row, colnames)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Expr::Not(e) => e.eval(row, colnames).map(|b| !b),
        }
    }

    /// Matches a row under top-level SQL semantics: `unknown` does not pass.
    pub fn matches(&self, row: &Row, colnames: &[String]) -> bool {
        self.eval(row, colnames).unwrap_or(false)
    }

    pub(crate) fn leading_column(&self) -> Option<(&str, &Op)> {
        match self {
            Expr::Leaf { column, op, .. } => Some((column.as_str(), op)),
            _ => None,
        }
    }
}

fn split_merged_value(v: &SqlValue) -> (SqlValue, SqlValue) {
    match v {
        SqlValue::Blob(b) if b.len() == 16 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(b);
            let (hi, lo) = crate::guid::Guid::from_bytes(bytes).to_parts();
            (SqlValue::Int(hi), SqlValue::Int(lo))
        }
        other => (other.clone(), other.clone()),
    }
}

fn negate_op(op: Op) -> Op {
    match op {
        Op::Eq => Op::Ne,
        Op::Ne => Op::Eq,
        Op::Lt => Op::Ge,
        Op::Le => Op::Gt,
        Op::Gt => Op::Le,
        Op::Ge => Op::Lt,
        Op::IsNull => Op::IsNotNull,
        Op::IsNotNull => Op::IsNull,
        Op::In(v) => Op::NotIn(v),
        Op::NotIn(v) => Op::In(v),
        // BETWEEN/STARTS/ENDS/CONTAINS have no single-operator negation;
        // leave the operator as-is and let the caller wrap in Expr::Not
        // rather than compiling a wrong answer.
        other => other,
    }
}

fn sql_value_cmp(a: &SqlValue, b: &SqlValue) -> Option<Ordering> {
    match (a, b) {
        (SqlValue::Null(), SqlValue::Null()) => Some(Ordering::Equal),
        (SqlValue::Null(), _) | (_, SqlValue::Null()) => None,
        (SqlValue::Int(x), SqlValue::Int(y)) => x.partial_cmp(y),
        (SqlValue::Real(x), SqlValue::Real(y)) => x.partial_cmp(y),
        (SqlValue::Int(x), SqlValue::Real(y)) => (*x as f64).partial_cmp(y),
        (SqlValue::Real(x), SqlValue::Int(y)) => x.partial_cmp(&(*y as f64)),
        (SqlValue::Text(x), SqlValue::Text(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        (SqlValue::Blob(x), SqlValue::Blob(y)) => Some(x.cmp(y)),
        (SqlValue::Bool(x), SqlValue::Bool(y)) => x.partial_cmp(y),
        _ => None,
    }
}

fn eval_leaf(actual: &SqlValue, op: &Op, literal: Option<&SqlValue>) -> Option<bool> {
    match op {
        Op::IsNull => Some(matches!(actual, SqlValue::Null())),
        Op::IsNotNull => Some(!matches!(actual, SqlValue::Null())),
        _ if matches!(actual, SqlValue::Null()) => None,
        Op::Eq => Some(sql_value_cmp(actual, literal?)? == Ordering::Equal),
        Op::Ne => Some(sql_value_cmp(actual, literal?)? != Ordering::Equal),
        Op::Lt => Some(sql_value_cmp(actual, literal?)? == Ordering::Less),
        Op::Le => Some(sql_value_cmp(actual, literal?)? != Ordering::Greater),
        Op::Gt => Some(sql_value_cmp(actual, literal?)? == Ordering::Greater),
        Op::Ge => Some(sql_value_cmp(actual, literal?)? != Ordering::Less),
        Op::Between(lo, hi) => Some(
            sql_value_cmp(actual, lo)? != Ordering::Less && sql_value_cmp(actual, hi)? != Ordering::Greater,
        ),
        Op::In(vals) => Some(vals.iter().any(|v| sql_value_cmp(actual, v) == Some(Ordering::Equal))),
        Op::NotIn(vals) => Some(!vals.iter().any(|v| sql_value_cmp(actual, v) == Some(Ordering::Equal))),
        Op::StartsWith(p) => text_of(actual).map(|s| s.starts_with(p.as_str())),
        Op::EndsWith(p) => text_of(actual).map(|s| s.ends_with(p.as_str())),
        Op::Contains(p) => text_of(actual).map(|s| s.contains(p.as_str())),
    }
}

fn text_of(v: &SqlValue) -> Option<&str> {
    match v {
        SqlValue::Text(s) => Some(s.as_str()),
        _ => None,
    }
}

fn is_sargable_op(op: &Op) -> bool {
    matches!(
        op,
        Op::Eq | Op::Le | Op::Lt | Op::Ge | Op::Gt | Op::Between(..) | Op::In(_) | Op::StartsWith(_)
    )
}

/// One of the four execution plans a filter can compile to.
#[derive(Clone, Debug, PartialEq)]
pub enum Plan {
    TableScan,
    SingleIndexSeek { index_name: String },
    RowIdIntersection { index_names: (String, String) },
    RowIdAliasShortcut,
}

/// Walks the AND-chain at the top of a normalized filter tree looking for
/// sargable leaves against `table`'s rowid alias or its indexes.
/// Only a top-level conjunction of leaves is analyzed — predicates nested
/// under OR cannot narrow the scan, so they remain part of the residual.
pub fn analyze(expr: &Expr, table: &TableSchema, indexes: &[&crate::schema::IndexSchema]) -> Plan {
    if let Some(rowid_col) = table.rowid_alias_ordinal.map(|o| table.physical_columns[o].name.clone()) {
        let mut leaves = Vec::new();
        collect_top_level_ands(expr, &mut leaves);
        if leaves.iter().any(|l| {
            l.leading_column()
                .map(|(c, op)| c.eq_ignore_ascii_case(&rowid_col) && is_sargable_op(op))
                .unwrap_or(false)
        }) {
            return Plan::RowIdAliasShortcut;
        }
    }

    let mut leaves = Vec::new();
    collect_top_level_ands(expr, &mut leaves);

    let matching: Vec<&str> = indexes
        .iter()
        .filter(|ix| {
            ix.columns.first().map_or(false, |lead| {
                leaves.iter().any(|l| {
                    l.leading_column()
                        .map(|(c, op)| c.eq_ignore_ascii_case(lead) && is_sargable_op(op))
                        .unwrap_or(false)
                })
            })
        })
        .map(|ix| ix.name.as_str())
        .collect();

    match matching.len() {
        0 => Plan::TableScan,
        1 => Plan::SingleIndexSeek { index_name: matching[0].to_string() },
        _ => Plan::RowIdIntersection { index_names: (matching[0].to_string(), matching[1].to_string()) },
    }
}

pub(crate) fn collect_top_level_ands<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::And(l, r) => {
            collect_top_level_ands(l, out);
            collect_top_level_ands(r, out);
        }
        leaf @ Expr::Leaf { .. } => out.push(leaf),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(vals: Vec<SqlValue>) -> Row {
        Row { items: vals }
    }

    #[test]
    fn eq_matches_and_mismatches() {
        let e = Expr::cmp("age", Op::Eq, SqlValue::Int(30));
        let cols = vec!["age".to_string()];
        assert!(e.matches(&row(vec![SqlValue::Int(30)]), &cols));
        assert!(!e.matches(&row(vec![SqlValue::Int(31)]), &cols));
    }

    #[test]
    fn null_comparisons_are_unknown_and_dont_match() {
        let cols = vec!["age".to_string()];
        for op in [Op::Eq, Op::Ne, Op::Lt, Op::Gt] {
            let e = Expr::Leaf { column: "age".into(), op, value: Some(SqlValue::Int(5)) };
            assert!(!e.matches(&row(vec![SqlValue::Null()]), &cols));
        }
        assert!(Expr::is_null("age").matches(&row(vec![SqlValue::Null()]), &cols));
        assert!(!Expr::is_not_null("age").matches(&row(vec![SqlValue::Null()]), &cols));
    }

    #[test]
    fn nnf_pushes_not_through_and_and_negates_leaves() {
        let e = Expr::Not(Box::new(
            Expr::cmp("a", Op::Eq, SqlValue::Int(1)).and(Expr::cmp("b", Op::Lt, SqlValue::Int(2))),
        ));
        let nnf = e.to_nnf();
        match nnf {
            Expr::Or(l, r) => {
                assert_eq!(*l, Expr::Leaf { column: "a".into(), op: Op::Ne, value: Some(SqlValue::Int(1)) });
                assert_eq!(*r, Expr::Leaf { column: "b".into(), op: Op::Ge, value: Some(SqlValue::Int(2)) });
            }
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn and_short_circuits_on_false_even_with_unknown() {
        let e = Expr::cmp("a", Op::Eq, SqlValue::Int(1)).and(Expr::cmp("b", Op::Eq, SqlValue::Int(2)));
        let cols = vec!["a".to_string(), "b".to_string()];
        // a is false outright, b is unknown (NULL) — AND must still be false, not unknown.
        assert!(!e.matches(&row(vec![SqlValue::Int(9), SqlValue::Null()]), &cols));
    }
}
