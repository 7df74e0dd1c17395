//! In-memory distinct, cursor and skip/take over ordered rows.

use std::cmp::Ordering;
use std::collections::HashSet;

use relq_proto::OrderBy;

use super::compare::compare_rows;
use super::planner::LoadPlanNode;
use crate::storage::{codec, Row, StoreError};

/// Where the cursor of a plan level points.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorPosition {
    /// The level has no cursor.
    Unset,
    /// The cursor names no existing record; the page is empty.
    Missing,
    At(Row),
}

/// Apply distinct, cursor, skip and take of a plan level to ordered rows.
pub fn window(
    node: &LoadPlanNode,
    rows: Vec<Row>,
    cursor: &CursorPosition,
) -> Result<Vec<Row>, StoreError> {
    let rows = distinct(rows, &node.distinct)?;
    let rows = match cursor {
        CursorPosition::Unset => rows,
        CursorPosition::Missing => return Ok(Vec::new()),
        CursorPosition::At(at) => {
            let backward = node.take.is_some_and(|t| t < 0);
            after_cursor(rows, at, &node.order, node.cursor_inclusive, backward)
        }
    };
    Ok(paginate(rows, node.skip, node.take))
}

/// Keep the first row of every distinct combination of `fields`.
pub fn distinct(rows: Vec<Row>, fields: &[String]) -> Result<Vec<Row>, StoreError> {
    if fields.is_empty() {
        return Ok(rows);
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if seen.insert(codec::encode_key(&row.project(fields))?) {
            out.push(row);
        }
    }
    Ok(out)
}

/// Keep the rows after the cursor row (before it when `backward`).
///
/// Positions are compared under `order`, which must be total, so the cursor
/// need not itself be among `rows`.
pub fn after_cursor(
    rows: Vec<Row>,
    cursor: &Row,
    order: &[OrderBy],
    inclusive: bool,
    backward: bool,
) -> Vec<Row> {
    let wanted = if backward {
        Ordering::Less
    } else {
        Ordering::Greater
    };
    rows.into_iter()
        .filter(|row| {
            let ord = compare_rows(row, cursor, order);
            ord == wanted || (inclusive && ord == Ordering::Equal)
        })
        .collect()
}

/// Apply skip and take to rows or groups. A negative take counts back from the end, skipping
/// `skip` rows from the end first; the result keeps the original order.
pub fn paginate<T>(rows: Vec<T>, skip: usize, take: Option<i64>) -> Vec<T> {
    match take {
        Some(n) if n < 0 => {
            let end = rows.len().saturating_sub(skip);
            let n = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
            let start = end.saturating_sub(n);
            rows.into_iter().skip(start).take(end - start).collect()
        }
        Some(n) => {
            let n = usize::try_from(n).unwrap_or(usize::MAX);
            rows.into_iter().skip(skip).take(n).collect()
        }
        None => rows.into_iter().skip(skip).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relq_proto::Value;

    fn rows(ids: &[i64]) -> Vec<Row> {
        ids.iter().map(|&i| Row::new().with("id", i)).collect()
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().filter_map(|r| r.value("id").as_i64()).collect()
    }

    #[test]
    fn test_paginate_forward() {
        assert_eq!(ids(&paginate(rows(&[1, 2, 3, 4, 5]), 1, Some(2))), vec![2, 3]);
        assert_eq!(ids(&paginate(rows(&[1, 2, 3]), 5, Some(2))), Vec::<i64>::new());
        assert_eq!(ids(&paginate(rows(&[1, 2, 3]), 1, None)), vec![2, 3]);
    }

    #[test]
    fn test_paginate_backward() {
        assert_eq!(ids(&paginate(rows(&[1, 2, 3, 4, 5]), 0, Some(-2))), vec![4, 5]);
        assert_eq!(ids(&paginate(rows(&[1, 2, 3, 4, 5]), 1, Some(-2))), vec![3, 4]);
        assert_eq!(ids(&paginate(rows(&[1, 2]), 0, Some(-5))), vec![1, 2]);
    }

    #[test]
    fn test_cursor_slices() {
        let order = [OrderBy::asc("id")];
        let cursor = Row::new().with("id", 3);
        assert_eq!(
            ids(&after_cursor(rows(&[1, 2, 3, 4, 5]), &cursor, &order, false, false)),
            vec![4, 5]
        );
        assert_eq!(
            ids(&after_cursor(rows(&[1, 2, 3, 4, 5]), &cursor, &order, true, false)),
            vec![3, 4, 5]
        );
        assert_eq!(
            ids(&after_cursor(rows(&[1, 2, 3, 4, 5]), &cursor, &order, false, true)),
            vec![1, 2]
        );
        // cursor row filtered out of the set still marks the position
        assert_eq!(
            ids(&after_cursor(rows(&[1, 2, 4, 5]), &cursor, &order, false, false)),
            vec![4, 5]
        );
    }

    #[test]
    fn test_distinct_keeps_first() {
        let input = vec![
            Row::new().with("id", 1).with("role", "a"),
            Row::new().with("id", 2).with("role", "b"),
            Row::new().with("id", 3).with("role", "a"),
            Row::new().with("id", 4).with("role", Value::Null),
        ];
        let out = distinct(input, &["role".to_string()]).unwrap();
        assert_eq!(ids(&out), vec![1, 2, 4]);
    }
}
