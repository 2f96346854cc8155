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


use std::collections::HashSet;

use super::{base::insert_values_token_mut, Capability, GeneratorDeps};
use crate::{
    rewrite::{
        token::{RemoveToken, SqlToken, TokenValue},
        RewriteError,
    },
    shadow::ShadowRule,
    statement::{Predicate, PredicateRight, StatementContext},
};

/// Strips the shadow column, which exists only for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowTokenGenerator {
    InsertColumn,
    InsertValues,
    Predicate,
}

impl ShadowTokenGenerator {
    pub const ALL: [ShadowTokenGenerator; 3] = [
        ShadowTokenGenerator::InsertColumn,
        ShadowTokenGenerator::InsertValues,
        ShadowTokenGenerator::Predicate,
    ];

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            ShadowTokenGenerator::InsertColumn | ShadowTokenGenerator::Predicate => {
                &[Capability::ShadowRule]
            }
            ShadowTokenGenerator::InsertValues => {
                &[Capability::ShadowRule, Capability::PreviousTokens]
            }
        }
    }

    pub fn is_generate(&self, stmt: &StatementContext) -> bool {
        match self {
            ShadowTokenGenerator::InsertColumn | ShadowTokenGenerator::InsertValues => {
                stmt.insert.as_ref().map_or(false, |i| i.columns.len() > 1)
            }
            ShadowTokenGenerator::Predicate => stmt.where_segment.is_some(),
        }
    }

    pub fn generate(
        &self,
        stmt: &StatementContext,
        deps: &GeneratorDeps<'_>,
        tokens: &mut Vec<SqlToken>,
    ) -> Result<(), RewriteError> {
        let rule = deps.require_shadow_rule()?;
        match self {
            ShadowTokenGenerator::InsertColumn => {
                let columns = match &stmt.insert {
                    Some(insert) => &insert.columns,
                    None => return Ok(()),
                };
                let idx = match columns.iter().position(|c| rule.is_shadow_column(&c.name)) {
                    Some(idx) => idx,
                    None => return Ok(()),
                };
                let (start, end) = if idx > 0 {
                    (columns[idx - 1].span.end(), columns[idx].span.end())
                } else {
                    (columns[0].span.start(), columns[1].span.start())
                };
                tokens.push(SqlToken::Remove(RemoveToken { start, end }));
            }

            ShadowTokenGenerator::InsertValues => {
                let idx = match stmt.insert.as_ref().and_then(|i| i.column_index(rule.column())) {
                    Some(idx) => idx,
                    None => return Ok(()),
                };
                if let Some(token) = insert_values_token_mut(stmt, tokens) {
                    for row in token.rows.iter_mut() {
                        if let Some(item) = row.items.get_mut(idx) {
                            *item = TokenValue::Removed;
                        }
                    }
                }
            }

            ShadowTokenGenerator::Predicate => {
                tokens.extend(
                    shadow_predicate_removals(stmt, rule)
                        .into_iter()
                        .map(|(remove, _)| SqlToken::Remove(remove)),
                );
            }
        }
        Ok(())
    }
}

/// Intervals removing `shadow = x` predicates, with the predicate each one drops.
/// A predicate that is the only one of its OR branch stays unless it is the
/// whole WHERE clause.
pub(crate) fn shadow_predicate_removals<'s>(
    stmt: &'s StatementContext,
    rule: &ShadowRule,
) -> Vec<(RemoveToken, &'s Predicate)> {
    let where_segment = match &stmt.where_segment {
        Some(w) => w,
        None => return vec![],
    };
    let total = where_segment.predicates().map(|p| p.span).collect::<HashSet<_>>().len();

    let mut seen = HashSet::new();
    let mut removals = vec![];
    for group in where_segment.and_groups.iter() {
        for (k, predicate) in group.iter().enumerate() {
            let is_shadow = rule.is_shadow_column(&predicate.column.name)
                && matches!(predicate.right, PredicateRight::Equal(_));
            if !is_shadow || !seen.insert(predicate.span) {
                continue;
            }

            let remove = if total == 1 {
                RemoveToken { start: where_segment.span.start(), end: where_segment.span.end() }
            } else if k > 0 {
                RemoveToken { start: group[k - 1].span.end(), end: predicate.span.end() }
            } else if group.len() > 1 {
                RemoveToken { start: predicate.span.start(), end: group[1].span.start() }
            } else {
                continue;
            };
            removals.push((remove, predicate));
        }
    }
    removals
}
