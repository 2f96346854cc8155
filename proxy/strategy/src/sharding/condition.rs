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


use std::{cmp::Ordering, ops::Bound};

use indexmap::IndexMap;
use tracing::debug;

use super::{DataNode, ShardingRule};
use crate::{
    metadata::TableMetas,
    route::RouteError,
    statement::{CompareOperator, ExprValue, Predicate, PredicateRight, StatementContext},
    value::SqlValue,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    pub lower: Bound<SqlValue>,
    pub upper: Bound<SqlValue>,
}

impl ValueRange {
    pub fn all() -> Self {
        ValueRange { lower: Bound::Unbounded, upper: Bound::Unbounded }
    }

    pub fn contains(&self, v: &SqlValue) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => v.compare(l) != Ordering::Less,
            Bound::Excluded(l) => v.compare(l) == Ordering::Greater,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => v.compare(u) != Ordering::Greater,
            Bound::Excluded(u) => v.compare(u) == Ordering::Less,
            Bound::Unbounded => true,
        };
        above && below
    }

    pub fn intersect(&self, other: &ValueRange) -> ValueRange {
        ValueRange {
            lower: tighter(&self.lower, &other.lower, Ordering::Greater),
            upper: tighter(&self.upper, &other.upper, Ordering::Less),
        }
    }

    pub fn is_empty(&self) -> bool {
        match (bound_value(&self.lower), bound_value(&self.upper)) {
            (Some(l), Some(u)) => match l.compare(u) {
                Ordering::Greater => true,
                Ordering::Equal => {
                    matches!(self.lower, Bound::Excluded(_))
                        || matches!(self.upper, Bound::Excluded(_))
                }
                Ordering::Less => false,
            },
            _ => false,
        }
    }
}

fn bound_value(b: &Bound<SqlValue>) -> Option<&SqlValue> {
    match b {
        Bound::Included(v) | Bound::Excluded(v) => Some(v),
        Bound::Unbounded => None,
    }
}

/// The more restrictive of two bounds. `wins` is the ordering a value must
/// have against the other to be kept.
fn tighter(a: &Bound<SqlValue>, b: &Bound<SqlValue>, wins: Ordering) -> Bound<SqlValue> {
    match (bound_value(a), bound_value(b)) {
        (None, _) => b.clone(),
        (_, None) => a.clone(),
        (Some(av), Some(bv)) => match av.compare(bv) {
            Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
            Ordering::Equal => b.clone(),
            ord if ord == wins => a.clone(),
            _ => b.clone(),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShardingValues {
    List(Vec<SqlValue>),
    Range(ValueRange),
}

impl ShardingValues {
    /// Conjunction of two conditions on the same column. An empty list means
    /// the conjunction can never hold.
    pub fn merge(self, other: ShardingValues) -> ShardingValues {
        match (self, other) {
            (ShardingValues::List(a), ShardingValues::List(b)) => {
                ShardingValues::List(a.into_iter().filter(|v| b.contains(v)).collect())
            }
            (ShardingValues::List(a), ShardingValues::Range(r))
            | (ShardingValues::Range(r), ShardingValues::List(a)) => {
                ShardingValues::List(a.into_iter().filter(|v| r.contains(v)).collect())
            }
            (ShardingValues::Range(a), ShardingValues::Range(b)) => {
                let range = a.intersect(&b);
                if range.is_empty() {
                    ShardingValues::List(vec![])
                } else {
                    ShardingValues::Range(range)
                }
            }
        }
    }

    pub fn is_always_false(&self) -> bool {
        matches!(self, ShardingValues::List(list) if list.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardingValue {
    pub table: String,
    pub column: String,
    pub values: ShardingValues,
}

/// One OR branch of a WHERE clause, or one row of an INSERT.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShardingCondition {
    pub values: Vec<ShardingValue>,
    /// Nodes an INSERT row was routed to. Filled by the router.
    pub data_nodes: Vec<DataNode>,
}

impl ShardingCondition {
    /// Adds `value`, folding it into an existing value on the same column.
    pub fn add(&mut self, value: ShardingValue) {
        let existing = self.values.iter_mut().find(|v| {
            v.table.eq_ignore_ascii_case(&value.table) && v.column.eq_ignore_ascii_case(&value.column)
        });
        match existing {
            Some(existing) => {
                let values = std::mem::replace(&mut existing.values, ShardingValues::List(vec![]));
                existing.values = values.merge(value.values);
            }
            None => self.values.push(value),
        }
    }

    pub fn is_always_false(&self) -> bool {
        self.values.iter().any(|v| v.values.is_always_false())
    }

    /// Values on columns of any of `tables`, keyed by lower-cased column.
    pub fn values_for(&self, tables: &[String]) -> IndexMap<String, ShardingValues> {
        let mut result: IndexMap<String, ShardingValues> = IndexMap::new();
        for value in self.values.iter() {
            if !tables.iter().any(|t| t.eq_ignore_ascii_case(&value.table)) {
                continue;
            }
            let column = value.column.to_ascii_lowercase();
            let merged = match result.shift_remove(&column) {
                Some(existing) => existing.merge(value.values.clone()),
                None => value.values.clone(),
            };
            result.insert(column, merged);
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShardingConditions {
    pub conditions: Vec<ShardingCondition>,
}

impl ShardingConditions {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn is_always_false(&self) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.is_always_false())
    }
}

/// Extracts sharding values from a bound statement.
pub struct ShardingConditionEngine<'a> {
    rule: &'a ShardingRule,
    metas: &'a TableMetas,
}

impl<'a> ShardingConditionEngine<'a> {
    pub fn new(rule: &'a ShardingRule, metas: &'a TableMetas) -> Self {
        ShardingConditionEngine { rule, metas }
    }

    pub fn create(
        &self,
        stmt: &StatementContext,
        params: &[SqlValue],
    ) -> Result<ShardingConditions, RouteError> {
        let conditions = if stmt.is_insert() {
            self.create_for_insert(stmt, params)?
        } else if stmt.kind.is_dml() {
            self.create_for_where(stmt, params)?
        } else {
            ShardingConditions::default()
        };

        debug!("sharding conditions {:?}", conditions);
        Ok(conditions)
    }

    fn create_for_insert(
        &self,
        stmt: &StatementContext,
        params: &[SqlValue],
    ) -> Result<ShardingConditions, RouteError> {
        let (insert, table) = match (&stmt.insert, stmt.tables.first()) {
            (Some(insert), Some(table)) => (insert, table),
            _ => return Ok(ShardingConditions::default()),
        };
        let sharding_columns = self.rule.sharding_columns(&table.name);
        if sharding_columns.is_empty() {
            return Ok(ShardingConditions::default());
        }

        let columns = if insert.columns.is_empty() {
            self.metas.column_names(&table.name)
        } else {
            insert.columns.iter().map(|c| c.name.clone()).collect()
        };

        let mut conditions = Vec::with_capacity(insert.rows.len());
        for row in insert.rows.iter() {
            let mut condition = ShardingCondition::default();
            for (column, value) in columns.iter().zip(row.values.iter()) {
                if !sharding_columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                    continue;
                }
                condition.values.push(ShardingValue {
                    table: table.name.clone(),
                    column: column.clone(),
                    values: ShardingValues::List(vec![Self::resolve(value, params)?]),
                });
            }
            conditions.push(condition);
        }

        Ok(ShardingConditions { conditions })
    }

    fn create_for_where(
        &self,
        stmt: &StatementContext,
        params: &[SqlValue],
    ) -> Result<ShardingConditions, RouteError> {
        let where_segment = match &stmt.where_segment {
            Some(w) => w,
            None => return Ok(ShardingConditions::default()),
        };

        let mut conditions = vec![];
        for group in where_segment.and_groups.iter() {
            let mut condition = ShardingCondition::default();
            for predicate in group.iter() {
                if let Some(value) = self.sharding_value(stmt, predicate, params)? {
                    condition.add(value);
                }
            }

            // An OR branch without sharding values may match rows on any node.
            if condition.values.is_empty() {
                return Ok(ShardingConditions::default());
            }
            conditions.push(condition);
        }

        Ok(ShardingConditions { conditions })
    }

    fn sharding_value(
        &self,
        stmt: &StatementContext,
        predicate: &Predicate,
        params: &[SqlValue],
    ) -> Result<Option<ShardingValue>, RouteError> {
        let column = &predicate.column;
        let table = match &column.owner {
            Some(owner) => stmt.find_table(Some(owner)).map(|t| t.name.clone()),
            None => stmt.table_names().into_iter().find(|t| {
                self.rule.sharding_columns(t).iter().any(|c| c.eq_ignore_ascii_case(&column.name))
            }),
        };
        let table = match table {
            Some(t) if self.rule.is_sharding_column(&t, &column.name) => t,
            _ => return Ok(None),
        };

        let values = match &predicate.right {
            PredicateRight::Equal(v) => ShardingValues::List(vec![Self::resolve(v, params)?]),
            PredicateRight::In(vs) => ShardingValues::List(
                vs.iter().map(|v| Self::resolve(v, params)).collect::<Result<_, _>>()?,
            ),
            PredicateRight::Between(lo, hi) => ShardingValues::Range(ValueRange {
                lower: Bound::Included(Self::resolve(lo, params)?),
                upper: Bound::Included(Self::resolve(hi, params)?),
            }),
            PredicateRight::Compare(op, v) => {
                let v = Self::resolve(v, params)?;
                let range = match op {
                    CompareOperator::Gt => ValueRange { lower: Bound::Excluded(v), upper: Bound::Unbounded },
                    CompareOperator::Ge => ValueRange { lower: Bound::Included(v), upper: Bound::Unbounded },
                    CompareOperator::Lt => ValueRange { lower: Bound::Unbounded, upper: Bound::Excluded(v) },
                    CompareOperator::Le => ValueRange { lower: Bound::Unbounded, upper: Bound::Included(v) },
                };
                ShardingValues::Range(range)
            }
        };

        Ok(Some(ShardingValue { table, column: column.name.clone(), values }))
    }

    fn resolve(value: &ExprValue, params: &[SqlValue]) -> Result<SqlValue, RouteError> {
        value.resolve(params).ok_or_else(|| {
            RouteError::MissingParameter(value.parameter_index().unwrap_or_default())
        })
    }
}
