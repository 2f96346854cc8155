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


use indexmap::IndexMap;

use super::{
    aggregation::AggregationUnit,
    order_by::{compare_keys, OrderByColumn},
    MergeError, MergedResult, QueryResult,
};
use crate::{statement::AggregationType, value::SqlValue};

/// An aggregation projection resolved to result columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationColumn {
    pub kind: AggregationType,
    /// Column the merged value is written to.
    pub index: usize,
    /// Columns folded into it: the column itself, or the derived COUNT and SUM for AVG.
    pub inputs: Vec<usize>,
}

/// How rows are grouped, folded, and in which order groups come out.
#[derive(Debug, Clone, Default)]
pub struct GroupByPlan {
    pub group_columns: Vec<usize>,
    pub aggregations: Vec<AggregationColumn>,
    pub sort_columns: Vec<OrderByColumn>,
}

impl GroupByPlan {
    fn group_key(&self, row: &[SqlValue]) -> Vec<SqlValue> {
        self.group_columns.iter().map(|i| row.get(*i).cloned().unwrap_or(SqlValue::Null)).collect()
    }

    fn units(&self) -> Vec<AggregationUnit> {
        self.aggregations.iter().map(|a| AggregationUnit::new(a.kind)).collect()
    }

    fn fold(&self, units: &mut [AggregationUnit], row: &[SqlValue]) -> Result<(), MergeError> {
        for (unit, column) in units.iter_mut().zip(self.aggregations.iter()) {
            let values = column
                .inputs
                .iter()
                .map(|i| row.get(*i).cloned().unwrap_or(SqlValue::Null))
                .collect::<Vec<_>>();
            unit.merge(&values)?;
        }
        Ok(())
    }

    fn finish(&self, units: &[AggregationUnit], row: &mut [SqlValue]) {
        for (unit, column) in units.iter().zip(self.aggregations.iter()) {
            if let Some(slot) = row.get_mut(column.index) {
                *slot = unit.result();
            }
        }
    }
}

fn read_row<R: MergedResult + ?Sized>(result: &R) -> Result<Vec<SqlValue>, MergeError> {
    (0..result.column_count()).map(|i| result.value(i)).collect()
}

/// Folds consecutive rows of a stream already sorted by the group key.
pub struct GroupByStreamMergedResult {
    inner: Box<dyn MergedResult>,
    plan: GroupByPlan,
    has_next: bool,
    current: Option<Vec<SqlValue>>,
}

impl GroupByStreamMergedResult {
    pub fn new(mut inner: Box<dyn MergedResult>, plan: GroupByPlan) -> Result<Self, MergeError> {
        let has_next = inner.next()?;
        Ok(GroupByStreamMergedResult { inner, plan, has_next, current: None })
    }
}

impl MergedResult for GroupByStreamMergedResult {
    fn next(&mut self) -> Result<bool, MergeError> {
        self.current = None;
        if !self.has_next {
            return Ok(false);
        }

        let mut row = read_row(self.inner.as_ref())?;
        let key = self.plan.group_key(&row);
        let mut units = self.plan.units();
        self.plan.fold(&mut units, &row)?;

        loop {
            self.has_next = self.inner.next()?;
            if !self.has_next {
                break;
            }
            let next_row = read_row(self.inner.as_ref())?;
            if self.plan.group_key(&next_row) != key {
                break;
            }
            self.plan.fold(&mut units, &next_row)?;
        }

        self.plan.finish(&units, &mut row);
        self.current = Some(row);
        Ok(true)
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        let row = self.current.as_ref().ok_or(MergeError::NoCurrentRow)?;
        row.get(index).cloned().ok_or(MergeError::ColumnIndexOutOfRange(index, row.len()))
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_label(&self, index: usize) -> Option<String> {
        self.inner.column_label(index)
    }
}

/// Loads every row, folds groups in a map, then sorts the groups.
pub struct GroupByMemoryMergedResult {
    rows: std::vec::IntoIter<Vec<SqlValue>>,
    current: Option<Vec<SqlValue>>,
    column_count: usize,
    labels: Vec<Option<String>>,
}

impl GroupByMemoryMergedResult {
    pub fn new(results: Vec<Box<dyn QueryResult>>, plan: GroupByPlan) -> Result<Self, MergeError> {
        let column_count = results.first().map_or(0, |r| r.column_count());
        let labels = results
            .first()
            .map(|r| (0..column_count).map(|i| r.column_label(i)).collect())
            .unwrap_or_default();

        let mut groups: IndexMap<Vec<SqlValue>, (Vec<SqlValue>, Vec<AggregationUnit>)> =
            IndexMap::new();
        for mut result in results {
            while result.next()? {
                let row =
                    (0..column_count).map(|i| result.value(i)).collect::<Result<Vec<_>, _>>()?;
                let key = plan.group_key(&row);
                let (_, units) = groups.entry(key).or_insert_with(|| (row.clone(), plan.units()));
                plan.fold(units, &row)?;
            }
        }

        let mut rows = Vec::with_capacity(groups.len());
        for (_, (mut row, units)) in groups {
            plan.finish(&units, &mut row);
            rows.push(row);
        }

        if !plan.sort_columns.is_empty() {
            let mut keyed = rows
                .into_iter()
                .map(|row| {
                    let key = plan
                        .sort_columns
                        .iter()
                        .map(|c| row.get(c.index).cloned().unwrap_or(SqlValue::Null))
                        .collect::<Vec<_>>();
                    (key, row)
                })
                .collect::<Vec<_>>();
            keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &plan.sort_columns));
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        tracing::trace!(groups = rows.len(), "group by merged in memory");
        Ok(GroupByMemoryMergedResult { rows: rows.into_iter(), current: None, column_count, labels })
    }
}

impl MergedResult for GroupByMemoryMergedResult {
    fn next(&mut self) -> Result<bool, MergeError> {
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        let row = self.current.as_ref().ok_or(MergeError::NoCurrentRow)?;
        row.get(index).cloned().ok_or(MergeError::ColumnIndexOutOfRange(index, row.len()))
    }

    fn column_count(&self) -> usize {
        self.column_count
    }

    fn column_label(&self, index: usize) -> Option<String> {
        self.labels.get(index).cloned().flatten()
    }
}
