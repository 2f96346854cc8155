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


use itertools::Itertools;
use tracing::trace;

use super::{parameter_position, ParameterBuilder};
use crate::{
    encrypt::QueryColumn,
    rewrite::{
        generator::{revised_row_count, shadow_predicate_removals, Capability, GeneratorDeps},
        RewriteError,
    },
    statement::{ExprValue, StatementContext},
    value::SqlValue,
};

/// Rewrites bound parameters the way the token generators rewrite literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterRewriter {
    Pagination,
    EncryptPredicate,
    EncryptAssignment,
    EncryptInsertValues,
    Shadow,
}

impl ParameterRewriter {
    pub fn build(sharding: bool, encrypt: bool, shadow: bool) -> Vec<ParameterRewriter> {
        let mut rewriters = vec![];
        if sharding {
            rewriters.push(ParameterRewriter::Pagination);
        }
        if encrypt {
            rewriters.extend([
                ParameterRewriter::EncryptPredicate,
                ParameterRewriter::EncryptAssignment,
                ParameterRewriter::EncryptInsertValues,
            ]);
        }
        if shadow {
            rewriters.push(ParameterRewriter::Shadow);
        }
        rewriters
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            ParameterRewriter::Pagination => &[Capability::RouteContext, Capability::Parameters],
            ParameterRewriter::EncryptPredicate => {
                &[Capability::EncryptRule, Capability::QueryWithCipherColumn]
            }
            ParameterRewriter::EncryptAssignment | ParameterRewriter::EncryptInsertValues => {
                &[Capability::EncryptRule]
            }
            ParameterRewriter::Shadow => &[Capability::ShadowRule],
        }
    }

    pub fn is_rewrite(&self, stmt: &StatementContext) -> bool {
        match self {
            ParameterRewriter::Pagination => stmt.is_select() && stmt.pagination.has_pagination(),
            ParameterRewriter::EncryptPredicate => stmt.where_segment.is_some(),
            ParameterRewriter::EncryptAssignment => !stmt.assignments.is_empty(),
            ParameterRewriter::EncryptInsertValues => {
                stmt.insert.as_ref().map_or(false, |i| !i.columns.is_empty() && !i.rows.is_empty())
            }
            ParameterRewriter::Shadow => stmt.where_segment.is_some() || stmt.insert.is_some(),
        }
    }

    pub fn rewrite(
        &self,
        stmt: &StatementContext,
        deps: &GeneratorDeps<'_>,
        builder: &mut ParameterBuilder,
    ) -> Result<(), RewriteError> {
        trace!("{:?} rewriting parameters", self);
        match self {
            ParameterRewriter::Pagination => rewrite_pagination(stmt, deps, builder),
            ParameterRewriter::EncryptPredicate => rewrite_encrypt_predicate(stmt, deps, builder),
            ParameterRewriter::EncryptAssignment => rewrite_encrypt_assignment(stmt, deps, builder),
            ParameterRewriter::EncryptInsertValues => rewrite_encrypt_insert(stmt, deps, builder),
            ParameterRewriter::Shadow => rewrite_shadow(stmt, deps, builder),
        }
    }
}

fn rewrite_pagination(
    stmt: &StatementContext,
    deps: &GeneratorDeps<'_>,
    builder: &mut ParameterBuilder,
) -> Result<(), RewriteError> {
    let builder = match builder.standard_mut() {
        Some(b) if deps.is_multi_routing() => b,
        _ => return Ok(()),
    };
    let params = deps.require_parameters()?;

    if let Some(idx) = stmt.pagination.offset.and_then(|v| v.parameter_index()) {
        builder.replace(idx, SqlValue::from(stmt.pagination.revised_offset()))?;
    }
    if let Some(idx) = stmt.pagination.row_count.and_then(|v| v.parameter_index()) {
        if let Some(revised) = revised_row_count(stmt, params) {
            builder.replace(idx, SqlValue::from(revised))?;
        }
    }
    Ok(())
}

fn rewrite_encrypt_predicate(
    stmt: &StatementContext,
    deps: &GeneratorDeps<'_>,
    builder: &mut ParameterBuilder,
) -> Result<(), RewriteError> {
    let rule = deps.require_encrypt_rule()?;
    let with_cipher = deps.require_query_with_cipher_column()?;
    let (builder, where_segment) = match (builder.standard_mut(), &stmt.where_segment) {
        (Some(b), Some(w)) => (b, w),
        _ => return Ok(()),
    };

    for predicate in where_segment.predicates().unique_by(|p| p.span) {
        let (table, encrypt_column) = match rule.find_statement_column(stmt, &predicate.column) {
            Some(found) => found,
            None => continue,
        };
        let kind = match encrypt_column.query_column(with_cipher) {
            Some((QueryColumn::Plain, _)) | None => continue,
            Some((kind, _)) => kind,
        };
        for idx in predicate.right.values().iter().filter_map(|v| v.parameter_index()) {
            let plain = match builder.original_parameters().get(idx) {
                Some(v) => v.clone(),
                None => return Err(RewriteError::ParameterIndexOutOfRange(idx, builder.len())),
            };
            let value = rule.column_value(&table, &encrypt_column.logic_column, kind, &plain);
            builder.replace(idx, value)?;
        }
    }
    Ok(())
}

fn rewrite_encrypt_assignment(
    stmt: &StatementContext,
    deps: &GeneratorDeps<'_>,
    builder: &mut ParameterBuilder,
) -> Result<(), RewriteError> {
    let rule = deps.require_encrypt_rule()?;
    let builder = match builder.standard_mut() {
        Some(b) => b,
        None => return Ok(()),
    };

    for assignment in stmt.assignments.iter() {
        let idx = match &assignment.value {
            ExprValue::Parameter { index, .. } => *index,
            ExprValue::Literal { .. } => continue,
        };
        let (table, encrypt_column) = match rule.find_statement_column(stmt, &assignment.column) {
            Some(found) => found,
            None => continue,
        };
        let plain = match builder.original_parameters().get(idx) {
            Some(v) => v.clone(),
            None => return Err(RewriteError::ParameterIndexOutOfRange(idx, builder.len())),
        };

        let logic = &encrypt_column.logic_column;
        builder.replace(idx, rule.column_value(&table, logic, QueryColumn::Cipher, &plain))?;
        let derived = encrypt_column
            .derived_columns()
            .into_iter()
            .map(|(kind, _)| rule.column_value(&table, logic, kind, &plain))
            .collect::<Vec<_>>();
        if !derived.is_empty() {
            builder.add(idx + 1, derived)?;
        }
    }
    Ok(())
}

fn rewrite_encrypt_insert(
    stmt: &StatementContext,
    deps: &GeneratorDeps<'_>,
    builder: &mut ParameterBuilder,
) -> Result<(), RewriteError> {
    let rule = deps.require_encrypt_rule()?;
    let (builder, insert, table) = match (builder.grouped_mut(), &stmt.insert, stmt.tables.first()) {
        (Some(b), Some(i), Some(t)) => (b, i, t.name.as_str()),
        _ => return Ok(()),
    };
    let encrypted = insert
        .columns
        .iter()
        .enumerate()
        .filter_map(|(idx, c)| rule.find_column(table, &c.name).map(|ec| (idx, ec)))
        .collect::<Vec<_>>();
    if encrypted.is_empty() {
        return Ok(());
    }

    for (row_idx, row) in insert.rows.iter().enumerate() {
        let group = match builder.group_mut(row_idx) {
            Some(g) => g,
            None => continue,
        };

        let mut derived = vec![];
        for (value_idx, encrypt_column) in encrypted.iter() {
            let pos = match parameter_position(row, *value_idx) {
                Some(pos) => pos,
                None => continue,
            };
            let plain = match group.original_parameters().get(pos) {
                Some(v) => v.clone(),
                None => return Err(RewriteError::ParameterIndexOutOfRange(pos, group.len())),
            };

            let logic = &encrypt_column.logic_column;
            group.replace(pos, rule.column_value(table, logic, QueryColumn::Cipher, &plain))?;
            derived.extend(
                encrypt_column
                    .derived_columns()
                    .into_iter()
                    .map(|(kind, _)| rule.column_value(table, logic, kind, &plain)),
            );
        }
        if !derived.is_empty() {
            let end = group.len();
            group.add(end, derived)?;
        }
    }
    Ok(())
}

fn rewrite_shadow(
    stmt: &StatementContext,
    deps: &GeneratorDeps<'_>,
    builder: &mut ParameterBuilder,
) -> Result<(), RewriteError> {
    let rule = deps.require_shadow_rule()?;

    match builder {
        ParameterBuilder::Grouped(grouped) => {
            let insert = match &stmt.insert {
                Some(insert) if insert.columns.len() > 1 => insert,
                _ => return Ok(()),
            };
            let idx = match insert.column_index(rule.column()) {
                Some(idx) => idx,
                None => return Ok(()),
            };
            for (row_idx, row) in insert.rows.iter().enumerate() {
                if let (Some(pos), Some(group)) =
                    (parameter_position(row, idx), grouped.group_mut(row_idx))
                {
                    group.remove(pos)?;
                }
            }
        }
        ParameterBuilder::Standard(standard) => {
            for (_, predicate) in shadow_predicate_removals(stmt, rule) {
                for idx in predicate.right.values().iter().filter_map(|v| v.parameter_index()) {
                    standard.remove(idx)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        encrypt::test::user_encrypt_rule,
        rewrite::generator::RouteInfo,
        shadow::test::shadow_rule,
        sharding::condition::ShardingConditions,
        statement::{fixture::*, StatementKind},
    };

    fn rewrite(
        stmt: &StatementContext,
        deps: &GeneratorDeps<'_>,
        params: &[SqlValue],
        rewriters: &[ParameterRewriter],
    ) -> Vec<SqlValue> {
        let mut builder = ParameterBuilder::new(stmt, params, deps.route_context(), None);
        for rewriter in rewriters.iter().filter(|r| r.is_rewrite(stmt)) {
            let deps = GeneratorDeps::inject(deps, rewriter.capabilities());
            rewriter.rewrite(stmt, &deps, &mut builder).unwrap();
        }
        builder.parameters(None)
    }

    #[test]
    fn test_pagination() {
        let sql = "SELECT * FROM t_order WHERE user_id = ? LIMIT ?, ?";
        let stmt = StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_order"))
            .with_where(where_of(sql, vec![vec!["user_id = ?"]]))
            .with_pagination(limit(sql));
        let params = vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(5)];
        let conditions = ShardingConditions::default();

        let multi = GeneratorDeps::default()
            .with_parameters(&params)
            .with_route_context(RouteInfo { single_routing: false, conditions: &conditions });
        assert_eq!(
            rewrite(&stmt, &multi, &params, &[ParameterRewriter::Pagination]),
            vec![SqlValue::Int(1), SqlValue::Int(0), SqlValue::Int(7)]
        );

        let single = multi.with_route_context(RouteInfo { single_routing: true, conditions: &conditions });
        assert_eq!(rewrite(&stmt, &single, &params, &[ParameterRewriter::Pagination]), params);
    }

    #[test]
    fn test_encrypt_assignment_and_predicate() {
        let sql = "UPDATE t_user SET phone = ? WHERE pwd = ?";
        let stmt = StatementContext::new(StatementKind::Update)
            .with_table(table(sql, "t_user"))
            .with_assignment(assignment(sql, "phone = ?"))
            .with_where(where_of(sql, vec![vec!["pwd = ?"]]));
        let rule = user_encrypt_rule();
        let deps = GeneratorDeps::default()
            .with_encrypt_rule(&rule)
            .with_query_with_cipher_column(true);
        let params = vec![SqlValue::from("Plaintext"), SqlValue::from("abc")];

        let actual = rewrite(&stmt, &deps, &params, &ParameterRewriter::build(false, true, false));
        assert_eq!(
            actual,
            vec![
                SqlValue::from("bbf316e8d940af0ad3"),
                rule.column_value("t_user", "phone", QueryColumn::AssistedQuery, &params[0]),
                SqlValue::from("Plaintext"),
                SqlValue::from("a9993e364706816aba3e25717850c26c9cd0d89d"),
            ]
        );
    }

    #[test]
    fn test_encrypt_insert_values() {
        let sql = "INSERT INTO t_user (id, phone) VALUES (?, ?), (2, 'x')";
        let stmt = StatementContext::new(StatementKind::Insert)
            .with_table(table(sql, "t_user"))
            .with_insert(insert_of(sql));
        let rule = user_encrypt_rule();
        let deps = GeneratorDeps::default().with_encrypt_rule(&rule);
        let params = vec![SqlValue::Int(1), SqlValue::from("Plaintext")];

        let actual =
            rewrite(&stmt, &deps, &params, &[ParameterRewriter::EncryptInsertValues]);
        assert_eq!(
            actual,
            vec![
                SqlValue::Int(1),
                SqlValue::from("bbf316e8d940af0ad3"),
                rule.column_value("t_user", "phone", QueryColumn::AssistedQuery, &params[1]),
                SqlValue::from("Plaintext"),
            ]
        );
    }

    #[test]
    fn test_shadow() {
        let rule = shadow_rule();
        let deps = GeneratorDeps::default().with_shadow_rule(&rule);

        let sql = "INSERT INTO t_user (id, shadow) VALUES (?, ?), (?, ?)";
        let stmt = StatementContext::new(StatementKind::Insert)
            .with_table(table(sql, "t_user"))
            .with_insert(insert_of(sql));
        let params: Vec<SqlValue> = vec![1.into(), true.into(), 2.into(), true.into()];
        assert_eq!(
            rewrite(&stmt, &deps, &params, &[ParameterRewriter::Shadow]),
            vec![SqlValue::Int(1), SqlValue::Int(2)]
        );

        let sql = "SELECT * FROM t_user WHERE id = ? AND shadow = ?";
        let stmt = StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_user"))
            .with_where(where_of(sql, vec![vec!["id = ?", "shadow = ?"]]));
        let params: Vec<SqlValue> = vec![1.into(), true.into()];
        assert_eq!(
            rewrite(&stmt, &deps, &params, &[ParameterRewriter::Shadow]),
            vec![SqlValue::Int(1)]
        );
    }
}
