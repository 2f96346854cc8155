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


use std::cmp::Ordering;

use super::MergeError;
use crate::{statement::AggregationType, value::SqlValue};

/// Folds the values one aggregation column takes across the rows of a group.
#[derive(Debug, Clone)]
pub enum AggregationUnit {
    Sum(Option<SqlValue>),
    Count(Option<SqlValue>),
    Min(Option<SqlValue>),
    Max(Option<SqlValue>),
    /// Folds the derived COUNT and SUM columns of an AVG.
    Avg { count: Option<SqlValue>, sum: Option<SqlValue> },
}

fn add(
    acc: Option<SqlValue>,
    value: &SqlValue,
    function: &'static str,
) -> Result<Option<SqlValue>, MergeError> {
    if value.is_null() {
        return Ok(acc);
    }
    if !value.is_numeric() && value.as_f64().is_none() {
        return Err(MergeError::TypeMismatch { function, value: value.to_string() });
    }

    let sum = match (acc, value) {
        (None, SqlValue::Int(_) | SqlValue::UInt(_) | SqlValue::Float(_)) => value.clone(),
        (None, v) => SqlValue::Float(v.as_f64().unwrap_or_default()),
        (Some(SqlValue::Int(a)), SqlValue::Int(b)) => match a.checked_add(*b) {
            Some(v) => SqlValue::Int(v),
            None => SqlValue::Float(a as f64 + *b as f64),
        },
        (Some(SqlValue::UInt(a)), SqlValue::UInt(b)) => match a.checked_add(*b) {
            Some(v) => SqlValue::UInt(v),
            None => SqlValue::Float(a as f64 + *b as f64),
        },
        (Some(a), b) => {
            SqlValue::Float(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default())
        }
    };
    Ok(Some(sum))
}

fn pick(acc: Option<SqlValue>, value: &SqlValue, keep_less: bool) -> Option<SqlValue> {
    if value.is_null() {
        return acc;
    }
    match acc {
        None => Some(value.clone()),
        Some(current) => {
            let replace = match value.compare(&current) {
                Ordering::Less => keep_less,
                Ordering::Greater => !keep_less,
                Ordering::Equal => false,
            };
            if replace {
                Some(value.clone())
            } else {
                Some(current)
            }
        }
    }
}

impl AggregationUnit {
    pub fn new(kind: AggregationType) -> Self {
        match kind {
            AggregationType::Sum => AggregationUnit::Sum(None),
            AggregationType::Count => AggregationUnit::Count(None),
            AggregationType::Min => AggregationUnit::Min(None),
            AggregationType::Max => AggregationUnit::Max(None),
            AggregationType::Avg => AggregationUnit::Avg { count: None, sum: None },
        }
    }

    /// Feeds one row. `values` holds the aggregation column, or COUNT then SUM for AVG.
    pub fn merge(&mut self, values: &[SqlValue]) -> Result<(), MergeError> {
        let first = values.first().unwrap_or(&SqlValue::Null);
        match self {
            AggregationUnit::Sum(acc) => *acc = add(acc.take(), first, "SUM")?,
            AggregationUnit::Count(acc) => *acc = add(acc.take(), first, "COUNT")?,
            AggregationUnit::Min(acc) => *acc = pick(acc.take(), first, true),
            AggregationUnit::Max(acc) => *acc = pick(acc.take(), first, false),
            AggregationUnit::Avg { count, sum } => {
                *count = add(count.take(), first, "AVG")?;
                let second = values.get(1).unwrap_or(&SqlValue::Null);
                *sum = add(sum.take(), second, "AVG")?;
            }
        }
        Ok(())
    }

    pub fn result(&self) -> SqlValue {
        match self {
            AggregationUnit::Count(acc) => acc.clone().unwrap_or(SqlValue::Int(0)),
            AggregationUnit::Sum(acc) | AggregationUnit::Min(acc) | AggregationUnit::Max(acc) => {
                acc.clone().unwrap_or(SqlValue::Null)
            }
            AggregationUnit::Avg { count, sum } => {
                let count = count.as_ref().and_then(|c| c.as_f64()).unwrap_or_default();
                let sum = sum.as_ref().and_then(|s| s.as_f64());
                match sum {
                    Some(sum) if count != 0.0 => {
                        SqlValue::Float((sum / count * 10000.0).round() / 10000.0)
                    }
                    _ => SqlValue::Null,
                }
            }
        }
    }
}
