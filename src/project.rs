//! Helpers for the projection step of query execution.

use crate::sql_type::SqlType;
use crate::sql_value::SqlValue;
use crate::typed_row::Row;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown column in projection: {0}")]
    UnknownColumn(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What the caller asked to appear in the output, before resolution against
/// the input row's column list.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    Column(String),
    Constant(SqlValue),
    Star,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProjectAction {
    Take(usize),
    Constant(SqlValue),
}

/// Resolves `out_items` against the input row's column list, producing the
/// ordered actions a `project_row` call replays against every row of a scan.
pub fn build_project(
    in_colnames: &[String],
    in_coltypes: &[SqlType],
    out_items: &[SelectItem],
) -> Result<(Vec<ProjectAction>, Vec<String>, Vec<SqlType>)> {
    use std::collections::HashMap;
    let mut input_indexes: HashMap<String, usize> = HashMap::new();
    for (i, c) in in_colnames.iter().enumerate() {
        input_indexes.insert(c.to_ascii_lowercase(), i);
    }

    let mut actions = vec![];
    let mut out_colnames = vec![];
    let mut out_coltypes = vec![];
    for item in out_items {
        match item {
            SelectItem::Star => {
                for i in 0..in_colnames.len() {
                    actions.push(ProjectAction::Take(i));
                    out_colnames.push(in_colnames[i].clone());
                    out_coltypes.push(in_coltypes[i]);
                }
            }
            SelectItem::Column(name) => {
                let idx = *input_indexes
                    .get(&name.to_ascii_lowercase())
                    .ok_or_else(|| Error::UnknownColumn(name.clone()))?;
                actions.push(ProjectAction::Take(idx));
                out_colnames.push(in_colnames[idx].clone());
                out_coltypes.push(in_coltypes[idx]);
            }
            SelectItem::Constant(v) => {
                let t = match v {
                    SqlValue::Int(_) => SqlType::Int,
                    SqlValue::Real(_) => SqlType::Real,
                    SqlValue::Text(_) => SqlType::Text,
                    SqlValue::Blob(_) => SqlType::Blob,
                    SqlValue::Bool(_) => SqlType::Int,
                    SqlValue::Null() => SqlType::Int,
                };
                actions.push(ProjectAction::Constant(v.clone()));
                out_colnames.push("?column?".to_string());
                out_coltypes.push(t);
            }
        }
    }
    Ok((actions, out_colnames, out_coltypes))
}

/// Applies the relational-algebra "project" operator to one row.
pub fn project_row(actions: &[ProjectAction], input: &Row) -> Row {
    let items = actions
        .iter()
        .map(|a| match a {
            ProjectAction::Take(idx) => input.items[*idx].clone(),
            ProjectAction::Constant(v) => v.clone(),
        })
        .collect();
    Row { items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SqlType::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn colnames_only() {
        let colnames = names(&["a", "b", "c", "d", "e"]);
        let coltypes = vec![Int, Int, Real, Real, Text];
        let out = vec![
            SelectItem::Column("a".into()),
            SelectItem::Column("c".into()),
            SelectItem::Column("B".into()),
        ];
        let (actions, out_names, out_types) = build_project(&colnames, &coltypes, &out).unwrap();
        assert_eq!(
            actions,
            vec![ProjectAction::Take(0), ProjectAction::Take(2), ProjectAction::Take(1)]
        );
        assert_eq!(out_names, names(&["a", "c", "b"]));
        assert_eq!(out_types, vec![Int, Real, Int]);
    }

    #[test]
    fn star_and_constant() {
        let colnames = names(&["a", "b"]);
        let coltypes = vec![Int, Text];
        let out = vec![SelectItem::Star, SelectItem::Constant(SqlValue::Int(7))];
        let (actions, out_names, out_types) = build_project(&colnames, &coltypes, &out).unwrap();
        assert_eq!(
            actions,
            vec![ProjectAction::Take(0), ProjectAction::Take(1), ProjectAction::Constant(SqlValue::Int(7))]
        );
        assert_eq!(out_names, vec!["a", "b", "?column?"]);
        assert_eq!(out_types, vec![Int, Text, Int]);
    }

    #[test]
    fn unknown_column_errors() {
        let colnames = names(&["a"]);
        let coltypes = vec![Int];
        let out = vec![SelectItem::Column("missing".into())];
        assert!(build_project(&colnames, &coltypes, &out).is_err());
    }

    #[test]
    fn project_row_take_and_constant() {
        let input = Row {
            items: vec![SqlValue::Int(0), SqlValue::Int(10), SqlValue::Int(20)],
        };
        let actions = vec![
            ProjectAction::Take(2),
            ProjectAction::Constant(SqlValue::Text("x".into())),
        ];
        let out = project_row(&actions, &input);
        assert_eq!(out.items, vec![SqlValue::Int(20), SqlValue::Text("x".into())]);
    }
}
