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


//! Merges the cursors of a multi-node statement back into one logical result.

mod aggregation;
mod decorator;
mod group_by;
mod iterator;
mod order_by;
mod result;

use std::collections::HashMap;

use tracing::debug;

pub use self::{
    aggregation::AggregationUnit,
    decorator::{EncryptDecorator, LimitDecorator, RowNumberDecorator, VisibleColumnsDecorator},
    group_by::{
        AggregationColumn, GroupByMemoryMergedResult, GroupByPlan, GroupByStreamMergedResult,
    },
    iterator::IteratorStreamMergedResult,
    order_by::{OrderByColumn, OrderByStreamMergedResult},
    result::{MemoryQueryResult, MergeError, MergedResult, QueryResult},
};
use crate::{
    config::Props,
    encrypt::{EncryptColumn, EncryptRule, Encryptor},
    statement::{
        AggregationType, DerivedKind, DerivedProjection, OrderByContext, OrderByItem,
        OrderByTarget, PaginationStyle, Projection, StatementContext,
    },
    value::SqlValue,
};

/// Sums the affected row counts of a DML statement run on several nodes.
pub fn merge_update_counts(counts: &[u64]) -> u64 {
    counts.iter().sum()
}

/// Maps ORDER BY, GROUP BY and aggregation items to result column positions.
struct ColumnResolver<'a> {
    stmt: &'a StatementContext,
    labels: Vec<Option<String>>,
    derived: Vec<DerivedProjection>,
}

impl<'a> ColumnResolver<'a> {
    fn new(stmt: &'a StatementContext, results: &[Box<dyn QueryResult>]) -> Self {
        let labels = results
            .first()
            .map(|r| (0..r.column_count()).map(|i| r.column_label(i)).collect())
            .unwrap_or_default();
        ColumnResolver { stmt, labels, derived: stmt.derived_projections() }
    }

    fn label_position(&self, name: &str) -> Option<usize> {
        self.labels
            .iter()
            .position(|l| l.as_deref().map_or(false, |l| l.eq_ignore_ascii_case(name)))
    }

    /// Columns the logical statement returns, derived ones excluded.
    fn visible_column_count(&self) -> usize {
        match &self.stmt.projections {
            Some(projections) => {
                let unexpanded = projections.projections.iter().any(|p| {
                    matches!(p, Projection::Shorthand { actual_columns, .. } if actual_columns.is_empty())
                });
                if unexpanded && !self.labels.is_empty() {
                    self.labels.len().saturating_sub(self.derived.len())
                } else {
                    projections.column_count()
                }
            }
            None => self.labels.len(),
        }
    }

    fn derived_position(&self, offset: usize) -> Option<usize> {
        let derived = self.derived.get(offset)?;
        self.label_position(&derived.alias).or_else(|| {
            let count = self.stmt.projections.as_ref().map_or(0, |p| p.column_count());
            Some(count + offset)
        })
    }

    fn resolve(&self, item: &OrderByItem) -> Result<usize, MergeError> {
        let target = item.target_sql();
        if let OrderByTarget::Index(index) = &item.target {
            return index.checked_sub(1).ok_or(MergeError::UnknownColumn(target));
        }

        let projections =
            self.stmt.projections.as_ref().ok_or_else(|| MergeError::UnknownColumn(target.clone()))?;

        if let Some(idx) = projections.find_projection(item) {
            let position = projections.column_position(idx);
            return match (projections.projections.get(idx), &item.target) {
                (Some(Projection::Shorthand { actual_columns, .. }), OrderByTarget::Column(column)) => {
                    match actual_columns.iter().position(|c| c.name.eq_ignore_ascii_case(&column.name)) {
                        Some(offset) => Ok(position + offset),
                        None => self
                            .label_position(&column.name)
                            .ok_or(MergeError::UnknownColumn(target)),
                    }
                }
                _ => Ok(position),
            };
        }

        self.derived
            .iter()
            .position(|d| {
                matches!(d.kind, DerivedKind::OrderBy | DerivedKind::GroupBy)
                    && d.expression.eq_ignore_ascii_case(&target)
            })
            .and_then(|offset| self.derived_position(offset))
            .ok_or(MergeError::UnknownColumn(target))
    }

    fn order_columns(&self, order_by: &OrderByContext) -> Result<Vec<OrderByColumn>, MergeError> {
        order_by
            .items
            .iter()
            .map(|item| {
                Ok(OrderByColumn {
                    index: self.resolve(item)?,
                    direction: item.direction,
                    null_order: item.null_order,
                })
            })
            .collect()
    }

    fn aggregation_columns(&self) -> Result<Vec<AggregationColumn>, MergeError> {
        let projections = match &self.stmt.projections {
            Some(projections) => projections,
            None => return Ok(vec![]),
        };

        let mut columns = vec![];
        for (idx, projection) in projections.aggregations() {
            let kind = match projection {
                Projection::Aggregation { kind, .. } => *kind,
                _ => continue,
            };
            let index = projections.column_position(idx);
            let inputs = if kind == AggregationType::Avg {
                let mut inputs = vec![];
                for derived_kind in [DerivedKind::AvgCount, DerivedKind::AvgSum] {
                    let position = self
                        .derived
                        .iter()
                        .position(|d| d.kind == derived_kind && d.source == Some(idx))
                        .and_then(|offset| self.derived_position(offset))
                        .ok_or_else(|| {
                            MergeError::UnknownColumn(projection.label().unwrap_or_default())
                        })?;
                    inputs.push(position);
                }
                inputs
            } else {
                vec![index]
            };
            columns.push(AggregationColumn { kind, index, inputs });
        }
        Ok(columns)
    }

    fn group_by_plan(&self) -> Result<GroupByPlan, MergeError> {
        let group_columns = if self.stmt.group_by.is_empty() && self.stmt.is_distinct_row() {
            (0..self.visible_column_count()).collect()
        } else {
            self.order_columns(&self.stmt.group_by)?.into_iter().map(|c| c.index).collect()
        };
        Ok(GroupByPlan {
            group_columns,
            aggregations: self.aggregation_columns()?,
            sort_columns: self.order_columns(self.stmt.effective_order_by())?,
        })
    }

    /// Reversible cipher columns the select list reads, by result position.
    fn decryptors(&self, rule: &EncryptRule, props: &Props) -> HashMap<usize, Encryptor> {
        let mut decryptors = HashMap::new();
        let projections = match &self.stmt.projections {
            Some(projections) => projections,
            None => return decryptors,
        };

        let mut add = |position: usize, table: &str, column: &EncryptColumn| {
            if column.projection_column(props.query_with_cipher_column) != column.cipher_column {
                return;
            }
            if let Some(encryptor) = rule.find_encryptor(table, &column.logic_column) {
                if encryptor.is_reversible() {
                    decryptors.insert(position, encryptor.clone());
                }
            }
        };

        for (idx, projection) in projections.projections.iter().enumerate() {
            let position = projections.column_position(idx);
            match projection {
                Projection::Column { column, .. } => {
                    if let Some((table, encrypt_column)) =
                        rule.find_statement_column(self.stmt, column)
                    {
                        add(position, &table, encrypt_column);
                    }
                }
                Projection::Shorthand { owner, actual_columns, .. } => {
                    for (offset, actual) in actual_columns.iter().enumerate() {
                        let owner = actual.owner.as_deref().or(owner.as_deref());
                        let table = match self.stmt.find_table(owner) {
                            Some(table) => table,
                            None => continue,
                        };
                        if let Some(encrypt_column) = rule.find_column(&table.name, &actual.name) {
                            add(position + offset, &table.name, encrypt_column);
                        }
                    }
                }
                _ => {}
            }
        }
        decryptors
    }
}

/// Chooses the merger for a statement and stacks the decorators it needs.
pub struct MergeEngine<'a> {
    encrypt: Option<&'a EncryptRule>,
    props: &'a Props,
}

impl<'a> MergeEngine<'a> {
    pub fn new(encrypt: Option<&'a EncryptRule>, props: &'a Props) -> Self {
        MergeEngine { encrypt, props }
    }

    pub fn merge(
        &self,
        stmt: &StatementContext,
        results: Vec<Box<dyn QueryResult>>,
        params: &[SqlValue],
    ) -> Result<Box<dyn MergedResult>, MergeError> {
        if !stmt.is_select() {
            return Err(MergeError::NotQuery);
        }

        let resolver = ColumnResolver::new(stmt, &results);
        let decryptors = match self.encrypt {
            Some(rule) => resolver.decryptors(rule, self.props),
            None => HashMap::new(),
        };

        let merged = if results.len() == 1 {
            debug!("single cursor, iterator merge");
            Box::new(IteratorStreamMergedResult::new(results)) as Box<dyn MergedResult>
        } else {
            let visible = resolver.visible_column_count();
            let merged = Self::build(stmt, &resolver, results)?;
            let merged = Self::decorate_pagination(stmt, merged, params)?;
            if visible < merged.column_count() {
                debug!(visible, "hiding derived columns");
                Box::new(VisibleColumnsDecorator::new(merged, visible))
            } else {
                merged
            }
        };

        if decryptors.is_empty() {
            return Ok(merged);
        }
        debug!(columns = decryptors.len(), "decrypting cipher columns");
        Ok(Box::new(EncryptDecorator::new(merged, decryptors)))
    }

    fn build(
        stmt: &StatementContext,
        resolver: &ColumnResolver,
        results: Vec<Box<dyn QueryResult>>,
    ) -> Result<Box<dyn MergedResult>, MergeError> {
        let grouped = !stmt.group_by.is_empty() || stmt.has_aggregation() || stmt.is_distinct_row();
        if grouped {
            let plan = resolver.group_by_plan()?;
            if stmt.is_memory_group_by() {
                debug!("group by memory merge");
                return Ok(Box::new(GroupByMemoryMergedResult::new(results, plan)?));
            }

            debug!("group by stream merge");
            let inner = if plan.sort_columns.is_empty() {
                Box::new(IteratorStreamMergedResult::new(results)) as Box<dyn MergedResult>
            } else {
                Box::new(OrderByStreamMergedResult::new(results, plan.sort_columns.clone())?)
            };
            return Ok(Box::new(GroupByStreamMergedResult::new(inner, plan)?));
        }

        if !stmt.order_by.is_empty() {
            debug!("order by stream merge");
            let columns = resolver.order_columns(&stmt.order_by)?;
            return Ok(Box::new(OrderByStreamMergedResult::new(results, columns)?));
        }

        debug!("iterator stream merge");
        Ok(Box::new(IteratorStreamMergedResult::new(results)))
    }

    fn decorate_pagination(
        stmt: &StatementContext,
        merged: Box<dyn MergedResult>,
        params: &[SqlValue],
    ) -> Result<Box<dyn MergedResult>, MergeError> {
        let pagination = &stmt.pagination;
        if !pagination.has_pagination() {
            return Ok(merged);
        }

        let offset = pagination.actual_offset(params);
        let row_count = pagination.actual_row_count(params);
        match stmt.database_type.pagination_style() {
            PaginationStyle::Limit => {
                Ok(Box::new(LimitDecorator::new(merged, offset, row_count)?))
            }
            PaginationStyle::RowNumber => Ok(Box::new(RowNumberDecorator::new(
                merged,
                offset,
                pagination.is_offset_bound_opened(),
                row_count,
                pagination.is_row_count_bound_opened(),
            )?)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::{
        encrypt::test::user_encrypt_rule,
        statement::{fixture::*, StatementKind},
    };

    /// One cursor per slice, each row a single `id` column.
    pub fn int_results(shards: &[&[i64]]) -> Vec<Box<dyn QueryResult>> {
        shards
            .iter()
            .map(|rows| {
                let rows = rows.iter().map(|v| vec![SqlValue::Int(*v)]).collect();
                Box::new(MemoryQueryResult::new(vec!["id".to_string()], rows))
                    as Box<dyn QueryResult>
            })
            .collect()
    }

    fn rows_results(labels: &[&str], shards: Vec<Vec<Vec<SqlValue>>>) -> Vec<Box<dyn QueryResult>> {
        let labels = labels.iter().map(|l| l.to_string()).collect::<Vec<_>>();
        shards
            .into_iter()
            .map(|rows| Box::new(MemoryQueryResult::new(labels.clone(), rows)) as Box<dyn QueryResult>)
            .collect()
    }

    fn drain(merged: &mut dyn MergedResult, columns: usize) -> Vec<Vec<SqlValue>> {
        let mut rows = vec![];
        while merged.next().unwrap() {
            rows.push((0..columns).map(|i| merged.value(i).unwrap()).collect());
        }
        rows
    }

    fn select(sql: &str, items: &[&str]) -> StatementContext {
        StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_order"))
            .with_projections(projections(sql, items))
    }

    #[test]
    fn test_order_by_merge() {
        let sql = "SELECT id FROM t_order ORDER BY id";
        let stmt = select(sql, &["id"]).with_order_by(order_by(sql, &["id"]));
        let props = Props::default();
        let mut merged = MergeEngine::new(None, &props)
            .merge(&stmt, int_results(&[&[1, 4, 7], &[2, 5, 8], &[3, 6, 9]]), &[])
            .unwrap();

        let values = drain(merged.as_mut(), 1).into_iter().flatten().collect::<Vec<_>>();
        assert_eq!(values, (1..=9).map(SqlValue::Int).collect::<Vec<_>>());
    }

    #[test]
    fn test_limit_over_shards() {
        let sql = "SELECT id FROM t_order LIMIT 2, 3";
        let stmt = select(sql, &["id"]).with_pagination(limit(sql));
        let props = Props::default();
        let engine = MergeEngine::new(None, &props);

        let mut merged =
            engine.merge(&stmt, int_results(&[&[1, 2, 3, 4, 5], &[6, 7, 8, 9, 10]]), &[]).unwrap();
        let values = drain(merged.as_mut(), 1).into_iter().flatten().collect::<Vec<_>>();
        assert_eq!(values, vec![SqlValue::Int(3), SqlValue::Int(4), SqlValue::Int(5)]);

        let mut merged = engine.merge(&stmt, int_results(&[&[1], &[2]]), &[]).unwrap();
        assert!(!merged.next().unwrap());
    }

    #[test]
    fn test_limit_with_parameters() {
        let sql = "SELECT id FROM t_order ORDER BY id DESC LIMIT ?, ?";
        let stmt = select(sql, &["id"])
            .with_order_by(order_by(sql, &["id DESC"]))
            .with_pagination(limit(sql));
        let props = Props::default();
        let params = vec![SqlValue::Int(1), SqlValue::Int(2)];
        let mut merged = MergeEngine::new(None, &props)
            .merge(&stmt, int_results(&[&[9, 5, 1], &[8, 4]]), &params)
            .unwrap();
        let values = drain(merged.as_mut(), 1).into_iter().flatten().collect::<Vec<_>>();
        assert_eq!(values, vec![SqlValue::Int(8), SqlValue::Int(5)]);
    }

    #[test]
    fn test_group_by_count() {
        let sql = "SELECT user_id, COUNT(*) FROM t_order GROUP BY user_id";
        let stmt =
            select(sql, &["user_id", "COUNT(*)"]).with_group_by(group_by(sql, &["user_id"]));
        let props = Props::default();
        let results = rows_results(
            &["user_id", "COUNT(*)"],
            vec![
                vec![
                    vec![SqlValue::Int(1), SqlValue::Int(3)],
                    vec![SqlValue::Int(2), SqlValue::Int(1)],
                ],
                vec![vec![SqlValue::Int(1), SqlValue::Int(3)]],
            ],
        );
        let mut merged = MergeEngine::new(None, &props).merge(&stmt, results, &[]).unwrap();
        assert_eq!(merged.column_count(), 2);
        assert_eq!(
            drain(merged.as_mut(), 2),
            vec![
                vec![SqlValue::Int(1), SqlValue::Int(6)],
                vec![SqlValue::Int(2), SqlValue::Int(1)],
            ]
        );
    }

    #[test]
    fn test_avg_from_derived_columns() {
        let sql = "SELECT AVG(price) FROM t_order";
        let stmt = select(sql, &["AVG(price)"]);
        let props = Props::default();
        let results = rows_results(
            &["AVG(price)", "AVG_DERIVED_COUNT_0", "AVG_DERIVED_SUM_0"],
            vec![
                vec![vec![SqlValue::Float(5.0), SqlValue::Int(2), SqlValue::Int(10)]],
                vec![vec![SqlValue::Float(2.0), SqlValue::Int(1), SqlValue::Int(2)]],
            ],
        );
        let mut merged = MergeEngine::new(None, &props).merge(&stmt, results, &[]).unwrap();
        assert_eq!(merged.column_count(), 1);
        assert_eq!(merged.column_label(0).as_deref(), Some("AVG(price)"));
        assert_eq!(merged.column_label(1), None);
        assert!(merged.next().unwrap());
        assert_eq!(merged.value(0).unwrap(), SqlValue::Float(4.0));
        assert!(matches!(merged.value(1), Err(MergeError::ColumnIndexOutOfRange(1, 1))));
        assert!(!merged.next().unwrap());
    }

    #[test]
    fn test_memory_group_by_with_derived_order() {
        let sql = "SELECT user_id, SUM(price) FROM t_order GROUP BY user_id ORDER BY status DESC";
        let stmt = select(sql, &["user_id", "SUM(price)"])
            .with_group_by(group_by(sql, &["user_id"]))
            .with_order_by(order_by(sql, &["status DESC"]));
        assert!(stmt.is_memory_group_by());

        let props = Props::default();
        let row = |user: i64, sum: i64, status: &str| {
            vec![SqlValue::Int(user), SqlValue::Int(sum), SqlValue::from(status)]
        };
        let results = rows_results(
            &["user_id", "SUM(price)", "ORDER_BY_DERIVED_0"],
            vec![vec![row(1, 10, "a"), row(2, 5, "c")], vec![row(3, 7, "b"), row(1, 4, "a")]],
        );
        let mut merged = MergeEngine::new(None, &props).merge(&stmt, results, &[]).unwrap();
        assert_eq!(merged.column_count(), 2);
        assert_eq!(
            drain(merged.as_mut(), 2),
            vec![
                vec![SqlValue::Int(2), SqlValue::Int(5)],
                vec![SqlValue::Int(3), SqlValue::Int(7)],
                vec![SqlValue::Int(1), SqlValue::Int(14)],
            ]
        );
    }

    #[test]
    fn test_distinct_rows() {
        let sql = "SELECT DISTINCT user_id FROM t_order";
        let stmt = select(sql, &["user_id"]);
        let props = Props::default();
        let mut merged = MergeEngine::new(None, &props)
            .merge(&stmt, int_results(&[&[1, 2], &[2, 3], &[1]]), &[])
            .unwrap();
        let values = drain(merged.as_mut(), 1).into_iter().flatten().collect::<Vec<_>>();
        assert_eq!(values, vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]);
    }

    #[test]
    fn test_unknown_order_column() {
        let sql = "SELECT id FROM t_order ORDER BY status";
        let mut stmt = select(sql, &["id"]).with_order_by(order_by(sql, &["status"]));
        stmt.projections = None;
        let props = Props::default();
        let err = MergeEngine::new(None, &props)
            .merge(&stmt, int_results(&[&[1], &[2]]), &[])
            .err()
            .unwrap();
        assert!(matches!(err, MergeError::UnknownColumn(column) if column == "status"));
    }

    #[test]
    fn test_decrypt_reversible_projection() {
        let rule = user_encrypt_rule();
        let sql = "SELECT pwd, phone FROM t_user";
        let stmt = StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_user"))
            .with_projections(projections(sql, &["pwd", "phone"]));
        let props = Props::default();

        let encryptor = rule.find_encryptor("t_user", "phone").unwrap().clone();
        let digest = SqlValue::from("356a192b7913b04c54574d18c28d46e6395428ab");
        let results = rows_results(
            &["pwd", "phone"],
            vec![vec![vec![digest.clone(), encryptor.encrypt(&SqlValue::from("13800000000"))]]],
        );
        let mut merged = MergeEngine::new(Some(&rule), &props).merge(&stmt, results, &[]).unwrap();
        assert!(merged.next().unwrap());
        assert_eq!(merged.value(0).unwrap(), digest);
        assert_eq!(merged.value(1).unwrap(), SqlValue::from("13800000000"));
    }

    #[test]
    fn test_non_query_and_update_counts() {
        let props = Props::default();
        let stmt = StatementContext::new(StatementKind::Update);
        assert!(matches!(
            MergeEngine::new(None, &props).merge(&stmt, vec![], &[]),
            Err(MergeError::NotQuery)
        ));
        assert_eq!(merge_update_counts(&[3, 0, 2]), 5);
    }
}
