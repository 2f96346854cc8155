// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

use super::{MergeError, MergedResult, QueryResult};
use crate::{
    statement::{NullOrder, OrderDirection},
    value::SqlValue,
};

/// An ORDER BY item resolved to a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderByColumn {
    pub index: usize,
    pub direction: OrderDirection,
    pub null_order: NullOrder,
}

fn compare_value(a: &SqlValue, b: &SqlValue, column: &OrderByColumn) -> Ordering {
    let nulls_first = column.null_order == NullOrder::First;
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if nulls_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if nulls_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match column.direction {
            OrderDirection::Asc => a.compare(b),
            OrderDirection::Desc => a.compare(b).reverse(),
        },
    }
}

/// Compares two sort keys item by item.
pub fn compare_keys(a: &[SqlValue], b: &[SqlValue], columns: &[OrderByColumn]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .zip(columns.iter())
        .map(|((a, b), column)| compare_value(a, b, column))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Reads the sort key of the current row.
pub fn read_key<R: QueryResult + ?Sized>(
    result: &R,
    columns: &[OrderByColumn],
) -> Result<Vec<SqlValue>, MergeError> {
    columns.iter().map(|c| result.value(c.index)).collect()
}

/// A cursor positioned on a row, ordered by that row's key.
struct OrderByValue {
    result: Box<dyn QueryResult>,
    /// Route position of the cursor, breaks ties.
    position: usize,
    columns: Arc<[OrderByColumn]>,
    key: Vec<SqlValue>,
}

impl OrderByValue {
    fn next(&mut self) -> Result<bool, MergeError> {
        if !self.result.next()? {
            return Ok(false);
        }
        self.key = read_key(self.result.as_ref(), &self.columns)?;
        Ok(true)
    }
}

// `BinaryHeap` pops the greatest value, so the smallest row compares greatest.
impl Ord for OrderByValue {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&other.key, &self.key, &self.columns)
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for OrderByValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderByValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderByValue {}

/// K-way merge of cursors that are each sorted by the same ORDER BY.
pub struct OrderByStreamMergedResult {
    heap: BinaryHeap<OrderByValue>,
    first_next: bool,
    column_count: usize,
    labels: Vec<Option<String>>,
}

impl OrderByStreamMergedResult {
    pub fn new(
        results: Vec<Box<dyn QueryResult>>,
        columns: Vec<OrderByColumn>,
    ) -> Result<Self, MergeError> {
        let columns: Arc<[OrderByColumn]> = columns.into();
        let column_count = results.first().map_or(0, |r| r.column_count());
        let labels = results
            .first()
            .map(|r| (0..column_count).map(|i| r.column_label(i)).collect())
            .unwrap_or_default();

        let mut heap = BinaryHeap::with_capacity(results.len());
        for (position, result) in results.into_iter().enumerate() {
            let mut value = OrderByValue { result, position, columns: columns.clone(), key: vec![] };
            if value.next()? {
                heap.push(value);
            }
        }

        Ok(OrderByStreamMergedResult { heap, first_next: true, column_count, labels })
    }
}

impl MergedResult for OrderByStreamMergedResult {
    fn next(&mut self) -> Result<bool, MergeError> {
        if self.heap.is_empty() {
            return Ok(false);
        }
        if self.first_next {
            self.first_next = false;
            return Ok(true);
        }

        if let Some(mut top) = self.heap.pop() {
            if top.next()? {
                self.heap.push(top);
            }
        }
        Ok(!self.heap.is_empty())
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        self.heap.peek().ok_or(MergeError::NoCurrentRow)?.result.value(index)
    }

    fn column_count(&self) -> usize {
        self.column_count
    }

    fn column_label(&self, index: usize) -> Option<String> {
        self.labels.get(index).cloned().flatten()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::merge::{test::int_results, MemoryQueryResult};

    fn asc(index: usize) -> OrderByColumn {
        OrderByColumn { index, direction: OrderDirection::Asc, null_order: NullOrder::First }
    }

    fn drain(merged: &mut dyn MergedResult, index: usize) -> Vec<SqlValue> {
        let mut values = vec![];
        while merged.next().unwrap() {
            values.push(merged.value(index).unwrap());
        }
        values
    }

    #[test]
    fn test_three_way_merge() {
        let results = int_results(&[&[1, 4, 7], &[2, 5, 8], &[3, 6, 9]]);
        let mut merged = OrderByStreamMergedResult::new(results, vec![asc(0)]).unwrap();
        assert_eq!(drain(&mut merged, 0), (1..=9).map(SqlValue::Int).collect::<Vec<_>>());
        assert!(!merged.next().unwrap());
    }

    #[test]
    fn test_descending_with_nulls_last_and_ties() {
        let row = |k: Option<i64>, shard: i64| {
            vec![k.map_or(SqlValue::Null, SqlValue::Int), SqlValue::Int(shard)]
        };
        let labels = vec!["k".to_string(), "shard".to_string()];
        let results: Vec<Box<dyn QueryResult>> = vec![
            Box::new(MemoryQueryResult::new(labels.clone(), vec![row(Some(5), 0), row(None, 0)])),
            Box::new(MemoryQueryResult::new(labels, vec![row(Some(5), 1), row(Some(3), 1)])),
        ];
        let desc = OrderByColumn { index: 0, direction: OrderDirection::Desc, null_order: NullOrder::Last };
        let mut merged = OrderByStreamMergedResult::new(results, vec![desc]).unwrap();

        let mut rows = vec![];
        while merged.next().unwrap() {
            rows.push((merged.value(0).unwrap(), merged.value(1).unwrap()));
        }
        assert_eq!(
            rows,
            vec![
                (SqlValue::Int(5), SqlValue::Int(0)),
                (SqlValue::Int(5), SqlValue::Int(1)),
                (SqlValue::Int(3), SqlValue::Int(1)),
                (SqlValue::Null, SqlValue::Int(0)),
            ]
        );
    }

    #[test]
    fn test_empty_cursors() {
        let mut merged = OrderByStreamMergedResult::new(int_results(&[&[], &[]]), vec![asc(0)]).unwrap();
        assert!(!merged.next().unwrap());
        assert!(matches!(merged.value(0), Err(MergeError::NoCurrentRow)));
    }
}
