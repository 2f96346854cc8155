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


use tracing::debug;

use super::{Capability, GeneratorDeps};
use crate::{
    rewrite::{
        token::{AppendToken, IndexToken, PaginationToken, SqlToken, TableToken},
        RewriteError,
    },
    rewrite_const::{ASC, DESC},
    statement::{OrderDirection, PaginationStyle, PaginationValueKind, StatementContext},
    value::SqlValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardingTokenGenerator {
    Table,
    Index,
    Offset,
    RowCount,
    Projections,
    OrderBy,
}

impl ShardingTokenGenerator {
    pub const ALL: [ShardingTokenGenerator; 6] = [
        ShardingTokenGenerator::Table,
        ShardingTokenGenerator::Index,
        ShardingTokenGenerator::Offset,
        ShardingTokenGenerator::RowCount,
        ShardingTokenGenerator::Projections,
        ShardingTokenGenerator::OrderBy,
    ];

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            ShardingTokenGenerator::Table => &[Capability::ShardingRule],
            ShardingTokenGenerator::Index => &[Capability::ShardingRule, Capability::TableMetas],
            ShardingTokenGenerator::Offset | ShardingTokenGenerator::RowCount => {
                &[Capability::RouteContext, Capability::Parameters]
            }
            ShardingTokenGenerator::Projections | ShardingTokenGenerator::OrderBy => {
                &[Capability::RouteContext]
            }
        }
    }

    pub fn is_generate(&self, stmt: &StatementContext) -> bool {
        match self {
            ShardingTokenGenerator::Table => !stmt.tables.is_empty(),
            ShardingTokenGenerator::Index => !stmt.indexes.is_empty(),
            ShardingTokenGenerator::Offset => stmt.is_select() && stmt.pagination.offset.is_some(),
            ShardingTokenGenerator::RowCount => {
                stmt.is_select() && stmt.pagination.row_count.is_some()
            }
            ShardingTokenGenerator::Projections => stmt.is_select() && stmt.projections.is_some(),
            ShardingTokenGenerator::OrderBy => {
                stmt.is_select()
                    && stmt.order_by.is_empty()
                    && !stmt.group_by.is_empty()
                    && stmt.group_by.span.is_some()
            }
        }
    }

    pub fn generate(
        &self,
        stmt: &StatementContext,
        deps: &GeneratorDeps<'_>,
        tokens: &mut Vec<SqlToken>,
    ) -> Result<(), RewriteError> {
        match self {
            ShardingTokenGenerator::Table => {
                let rule = deps.require_sharding_rule()?;
                tokens.extend(stmt.tables.iter().filter(|t| rule.is_sharding_table(&t.name)).map(
                    |t| {
                        SqlToken::Table(TableToken {
                            span: t.span,
                            logic_table: t.name.clone(),
                            quote: t.quote,
                        })
                    },
                ));
            }

            ShardingTokenGenerator::Index => {
                let rule = deps.require_sharding_rule()?;
                let metas = deps.table_metas();
                for index in stmt.indexes.iter() {
                    let logic_table = stmt
                        .tables
                        .first()
                        .map(|t| t.name.as_str())
                        .or_else(|| metas.and_then(|m| m.find_table_by_index(&index.name)));
                    match logic_table {
                        Some(table) if rule.is_sharding_table(table) => {
                            tokens.push(SqlToken::Index(IndexToken {
                                span: index.span,
                                index: index.name.clone(),
                                quote: index.quote,
                                logic_table: Some(table.to_string()),
                            }))
                        }
                        _ => debug!("index {} does not belong to a sharded table", index.name),
                    }
                }
            }

            ShardingTokenGenerator::Offset => {
                if !deps.is_multi_routing() {
                    return Ok(());
                }
                if let Some(offset) = stmt.pagination.offset {
                    if let PaginationValueKind::Literal(_) = offset.kind {
                        tokens.push(SqlToken::Offset(PaginationToken {
                            span: offset.span,
                            revised: stmt.pagination.revised_offset(),
                        }));
                    }
                }
            }

            ShardingTokenGenerator::RowCount => {
                if !deps.is_multi_routing() {
                    return Ok(());
                }
                let row_count = match stmt.pagination.row_count {
                    Some(v) if matches!(v.kind, PaginationValueKind::Literal(_)) => v,
                    _ => return Ok(()),
                };
                let params = deps.parameters().unwrap_or(&[]);
                if let Some(revised) = revised_row_count(stmt, params) {
                    tokens.push(SqlToken::RowCount(PaginationToken { span: row_count.span, revised }));
                }
            }

            ShardingTokenGenerator::Projections => {
                if !deps.is_multi_routing() {
                    return Ok(());
                }
                let derived = stmt.derived_projections();
                if let (Some(projections), false) = (&stmt.projections, derived.is_empty()) {
                    tokens.push(SqlToken::Projections(AppendToken {
                        position: projections.span.end(),
                        items: derived.iter().map(|d| d.to_sql()).collect(),
                    }));
                }
            }

            ShardingTokenGenerator::OrderBy => {
                if !deps.is_multi_routing() {
                    return Ok(());
                }
                if let Some(span) = stmt.group_by.span {
                    let items = stmt
                        .group_by
                        .items
                        .iter()
                        .map(|item| {
                            let direction = match item.direction {
                                OrderDirection::Asc => ASC,
                                OrderDirection::Desc => DESC,
                            };
                            format!("{} {}", item.target_sql(), direction)
                        })
                        .collect();
                    tokens.push(SqlToken::OrderBy(AppendToken { position: span.end(), items }));
                }
            }
        }
        Ok(())
    }
}

/// Row count each shard of a multi-route SELECT is asked for.
pub(crate) fn revised_row_count(stmt: &StatementContext, params: &[SqlValue]) -> Option<u64> {
    let row_number = stmt.database_type.pagination_style() == PaginationStyle::RowNumber;
    let max = if stmt.is_memory_group_by() {
        Some(stmt.database_type.max_row_count())
    } else {
        None
    };
    stmt.pagination.revised_row_count(params, row_number, max)
}
