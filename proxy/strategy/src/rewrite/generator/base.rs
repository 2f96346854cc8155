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
        token::{InsertValueRow, InsertValuesToken, RemoveToken, SqlToken, TokenValue},
        RewriteError,
    },
    statement::StatementContext,
};

/// Generators every rewrite runs, whatever the rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseTokenGenerator {
    /// Drops `db.` before sharded tables.
    RemoveOwner,
    /// Lays out the VALUES list so that rows can be split per unit and refined.
    InsertValues,
}

impl BaseTokenGenerator {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            BaseTokenGenerator::RemoveOwner => &[Capability::ShardingRule],
            BaseTokenGenerator::InsertValues => &[Capability::ShardingRule, Capability::RouteContext],
        }
    }

    pub fn is_generate(&self, stmt: &StatementContext) -> bool {
        match self {
            BaseTokenGenerator::RemoveOwner => stmt.tables.iter().any(|t| t.owner.is_some()),
            BaseTokenGenerator::InsertValues => {
                stmt.insert.as_ref().map_or(false, |i| !i.rows.is_empty())
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
            BaseTokenGenerator::RemoveOwner => {
                let rule = deps.require_sharding_rule()?;
                for table in stmt.tables.iter().filter(|t| rule.is_sharding_table(&t.name)) {
                    if let Some(owner) = &table.owner {
                        tokens.push(SqlToken::Remove(RemoveToken {
                            start: owner.span.start(),
                            end: table.span.start(),
                        }));
                    }
                }
                Ok(())
            }
            BaseTokenGenerator::InsertValues => {
                if let Some(token) = insert_values_token(stmt, deps) {
                    tokens.push(SqlToken::InsertValues(token));
                }
                Ok(())
            }
        }
    }
}

fn insert_values_token(stmt: &StatementContext, deps: &GeneratorDeps<'_>) -> Option<InsertValuesToken> {
    let insert = stmt.insert.as_ref()?;
    let span = insert.values_span()?;

    let logic_table = match (deps.sharding_rule(), stmt.tables.first()) {
        (Some(rule), Some(table)) if rule.is_sharding_table(&table.name) => Some(table.name.clone()),
        _ => None,
    };

    let conditions = deps
        .route_context()
        .map(|r| &r.conditions.conditions)
        .filter(|c| c.len() == insert.rows.len());
    if logic_table.is_some() && conditions.is_none() {
        debug!("insert rows carry no routing, every row goes to every unit");
    }

    let rows = insert
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| InsertValueRow {
            items: row.values.iter().map(TokenValue::from).collect(),
            data_nodes: conditions.map(|c| c[idx].data_nodes.clone()).unwrap_or_default(),
        })
        .collect();

    Some(InsertValuesToken { span, logic_table, rows })
}

/// The VALUES token, created from the statement when no generator laid it out yet.
pub(crate) fn insert_values_token_mut<'t>(
    stmt: &StatementContext,
    tokens: &'t mut Vec<SqlToken>,
) -> Option<&'t mut InsertValuesToken> {
    let exists = tokens.iter().any(|t| matches!(t, SqlToken::InsertValues(_)));
    if !exists {
        let token = insert_values_token(stmt, &GeneratorDeps::default())?;
        tokens.push(SqlToken::InsertValues(token));
    }

    tokens.iter_mut().find_map(|t| match t {
        SqlToken::InsertValues(token) => Some(token),
        _ => None,
    })
}
