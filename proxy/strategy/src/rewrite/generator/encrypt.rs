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

use super::{base::insert_values_token_mut, Capability, GeneratorDeps};
use crate::{
    encrypt::{EncryptRule, QueryColumn},
    rewrite::{
        token::{
            aliased, AppendToken, AssignmentToken, LiteralValueToken, SqlToken, SubstituteToken,
            TokenValue,
        },
        RewriteError,
    },
    statement::{ExprValue, Projection, ShorthandColumn, StatementContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptTokenGenerator {
    Projection,
    Predicate,
    Assignment,
    InsertColumns,
    InsertValues,
}

impl EncryptTokenGenerator {
    pub const ALL: [EncryptTokenGenerator; 5] = [
        EncryptTokenGenerator::Projection,
        EncryptTokenGenerator::Predicate,
        EncryptTokenGenerator::Assignment,
        EncryptTokenGenerator::InsertColumns,
        EncryptTokenGenerator::InsertValues,
    ];

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            EncryptTokenGenerator::Projection | EncryptTokenGenerator::Predicate => {
                &[Capability::EncryptRule, Capability::QueryWithCipherColumn]
            }
            EncryptTokenGenerator::Assignment | EncryptTokenGenerator::InsertColumns => {
                &[Capability::EncryptRule]
            }
            EncryptTokenGenerator::InsertValues => {
                &[Capability::EncryptRule, Capability::PreviousTokens]
            }
        }
    }

    pub fn is_generate(&self, stmt: &StatementContext) -> bool {
        match self {
            EncryptTokenGenerator::Projection => stmt.is_select() && stmt.projections.is_some(),
            EncryptTokenGenerator::Predicate => stmt.where_segment.is_some(),
            EncryptTokenGenerator::Assignment => !stmt.assignments.is_empty(),
            EncryptTokenGenerator::InsertColumns => {
                stmt.insert.as_ref().map_or(false, |i| !i.columns.is_empty())
            }
            EncryptTokenGenerator::InsertValues => stmt
                .insert
                .as_ref()
                .map_or(false, |i| !i.columns.is_empty() && !i.rows.is_empty()),
        }
    }

    pub fn generate(
        &self,
        stmt: &StatementContext,
        deps: &GeneratorDeps<'_>,
        tokens: &mut Vec<SqlToken>,
    ) -> Result<(), RewriteError> {
        let rule = deps.require_encrypt_rule()?;
        match self {
            EncryptTokenGenerator::Projection => {
                generate_projections(stmt, rule, deps.require_query_with_cipher_column()?, tokens)
            }
            EncryptTokenGenerator::Predicate => {
                generate_predicates(stmt, rule, deps.require_query_with_cipher_column()?, tokens)
            }
            EncryptTokenGenerator::Assignment => {
                generate_assignments(stmt, rule, tokens);
                Ok(())
            }
            EncryptTokenGenerator::InsertColumns => {
                generate_insert_columns(stmt, rule, tokens);
                Ok(())
            }
            EncryptTokenGenerator::InsertValues => {
                generate_insert_values(stmt, rule, tokens);
                Ok(())
            }
        }
    }
}

fn generate_projections(
    stmt: &StatementContext,
    rule: &EncryptRule,
    with_cipher: bool,
    tokens: &mut Vec<SqlToken>,
) -> Result<(), RewriteError> {
    let projections = match &stmt.projections {
        Some(p) => p,
        None => return Ok(()),
    };

    for projection in projections.projections.iter() {
        match projection {
            Projection::Column { column, alias, .. } => {
                if let Some((_, encrypt_column)) = rule.find_statement_column(stmt, column) {
                    let physical = column.quote.wrap(encrypt_column.projection_column(with_cipher));
                    let text = match alias {
                        Some(_) => physical,
                        None => aliased(&physical, &column.quote.wrap(&column.name)),
                    };
                    tokens.push(SqlToken::SubstitutableColumnName(SubstituteToken {
                        span: column.span,
                        text,
                    }));
                }
            }
            Projection::Shorthand { span, owner, actual_columns } if !actual_columns.is_empty() => {
                let mut encrypted = false;
                let items = actual_columns
                    .iter()
                    .map(|c| {
                        let owner = c.owner.as_deref().or(owner.as_deref());
                        let (text, hit) = shorthand_item(stmt, rule, with_cipher, owner, c);
                        encrypted |= hit;
                        text
                    })
                    .collect::<Vec<_>>();
                if encrypted {
                    tokens.push(SqlToken::SubstitutableColumnName(SubstituteToken {
                        span: *span,
                        text: items.join(", "),
                    }));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn shorthand_item(
    stmt: &StatementContext,
    rule: &EncryptRule,
    with_cipher: bool,
    owner: Option<&str>,
    column: &ShorthandColumn,
) -> (String, bool) {
    let prefix = owner.map(|o| format!("{}.", o)).unwrap_or_default();
    let encrypt_column = stmt
        .find_table(owner)
        .or_else(|| stmt.tables.first())
        .and_then(|t| rule.find_column(&t.name, &column.name));

    match encrypt_column {
        Some(c) => (
            aliased(&format!("{}{}", prefix, c.projection_column(with_cipher)), &column.name),
            true,
        ),
        None => (format!("{}{}", prefix, column.name), false),
    }
}

fn generate_predicates(
    stmt: &StatementContext,
    rule: &EncryptRule,
    with_cipher: bool,
    tokens: &mut Vec<SqlToken>,
) -> Result<(), RewriteError> {
    let where_segment = match &stmt.where_segment {
        Some(w) => w,
        None => return Ok(()),
    };

    // OR branches may repeat a predicate.
    for predicate in where_segment.predicates().unique_by(|p| p.span) {
        let (table, encrypt_column) = match rule.find_statement_column(stmt, &predicate.column) {
            Some(found) => found,
            None => continue,
        };
        let (kind, physical) = encrypt_column.query_column(with_cipher).ok_or_else(|| {
            RewriteError::PlainColumnRequired(table.clone(), encrypt_column.logic_column.clone())
        })?;

        tokens.push(SqlToken::SubstitutableColumnName(SubstituteToken {
            span: predicate.column.span,
            text: predicate.column.quote.wrap(physical),
        }));

        if kind == QueryColumn::Plain {
            continue;
        }
        for value in predicate.right.values() {
            if let ExprValue::Literal { span, value } = value {
                tokens.push(SqlToken::LiteralValue(LiteralValueToken {
                    span: *span,
                    value: rule.column_value(&table, &encrypt_column.logic_column, kind, value),
                }));
            }
        }
    }
    Ok(())
}

fn generate_assignments(stmt: &StatementContext, rule: &EncryptRule, tokens: &mut Vec<SqlToken>) {
    for assignment in stmt.assignments.iter() {
        let (table, encrypt_column) = match rule.find_statement_column(stmt, &assignment.column) {
            Some(found) => found,
            None => continue,
        };

        let logic = &encrypt_column.logic_column;
        let value_of = |kind: QueryColumn| match &assignment.value {
            ExprValue::Literal { value, .. } => {
                TokenValue::Literal(rule.column_value(&table, logic, kind, value))
            }
            ExprValue::Parameter { .. } => TokenValue::Parameter,
        };

        let mut assignments = vec![(encrypt_column.cipher_column.clone(), value_of(QueryColumn::Cipher))];
        assignments.extend(
            encrypt_column.derived_columns().into_iter().map(|(kind, c)| (c.to_string(), value_of(kind))),
        );
        tokens.push(SqlToken::Assignment(AssignmentToken { span: assignment.span, assignments }));
    }
}

fn generate_insert_columns(stmt: &StatementContext, rule: &EncryptRule, tokens: &mut Vec<SqlToken>) {
    let (insert, table) = match (&stmt.insert, stmt.tables.first()) {
        (Some(insert), Some(table)) => (insert, table),
        _ => return,
    };

    let mut derived = vec![];
    for column in insert.columns.iter() {
        if let Some(encrypt_column) = rule.find_column(&table.name, &column.name) {
            tokens.push(SqlToken::SubstitutableColumnName(SubstituteToken {
                span: column.span,
                text: column.quote.wrap(&encrypt_column.cipher_column),
            }));
            derived.extend(
                encrypt_column.derived_columns().into_iter().map(|(_, c)| column.quote.wrap(c)),
            );
        }
    }

    if let (Some(last), false) = (insert.columns.last(), derived.is_empty()) {
        tokens.push(SqlToken::InsertColumns(AppendToken { position: last.span.end(), items: derived }));
    }
}

fn generate_insert_values(stmt: &StatementContext, rule: &EncryptRule, tokens: &mut Vec<SqlToken>) {
    let (insert, table) = match (&stmt.insert, stmt.tables.first()) {
        (Some(insert), Some(table)) => (insert, table.name.clone()),
        _ => return,
    };
    let encrypted = insert
        .columns
        .iter()
        .enumerate()
        .filter_map(|(idx, c)| rule.find_column(&table, &c.name).map(|ec| (idx, ec)))
        .collect::<Vec<_>>();
    if encrypted.is_empty() {
        return;
    }

    let token = match insert_values_token_mut(stmt, tokens) {
        Some(token) => token,
        None => return,
    };

    for (row, source) in token.rows.iter_mut().zip(insert.rows.iter()) {
        let mut derived = vec![];
        for (idx, encrypt_column) in encrypted.iter() {
            let plain = match source.values.get(*idx) {
                Some(ExprValue::Literal { value, .. }) => Some(value),
                Some(ExprValue::Parameter { .. }) => None,
                None => continue,
            };
            let logic = &encrypt_column.logic_column;
            let value_of = |kind: QueryColumn| match plain {
                Some(plain) => TokenValue::Literal(rule.column_value(&table, logic, kind, plain)),
                None => TokenValue::Parameter,
            };

            if let Some(item) = row.items.get_mut(*idx) {
                *item = value_of(QueryColumn::Cipher);
            }
            derived.extend(encrypt_column.derived_columns().into_iter().map(|(kind, _)| value_of(kind)));
        }
        row.items.extend(derived);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        encrypt::test::user_encrypt_rule,
        rewrite::{generator::BaseTokenGenerator, sql_builder::SqlBuilder},
        statement::{fixture::*, StatementKind},
        value::SqlValue,
    };

    fn rewrite(stmt: &StatementContext, sql: &str, with_cipher: bool) -> Result<String, RewriteError> {
        let rule = user_encrypt_rule();
        let deps = GeneratorDeps::default()
            .with_encrypt_rule(&rule)
            .with_query_with_cipher_column(with_cipher);

        let mut tokens = vec![];
        if BaseTokenGenerator::InsertValues.is_generate(stmt) {
            BaseTokenGenerator::InsertValues.generate(stmt, &deps, &mut tokens)?;
        }
        for generator in EncryptTokenGenerator::ALL.iter() {
            if generator.is_generate(stmt) {
                let deps = GeneratorDeps::inject(&deps, generator.capabilities());
                generator.generate(stmt, &deps, &mut tokens)?;
            }
        }
        SqlBuilder::new(sql, &tokens).to_sql(None)
    }

    fn assisted(plain: &str) -> String {
        user_encrypt_rule()
            .column_value("t_user", "phone", QueryColumn::AssistedQuery, &SqlValue::from(plain))
            .to_literal()
    }

    #[test]
    fn test_projection() {
        let sql = "SELECT id, pwd, phone AS p FROM t_user";
        let stmt = StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_user"))
            .with_projections(projections(sql, &["id", "pwd", "phone AS p"]));

        assert_eq!(
            rewrite(&stmt, sql, true).unwrap(),
            "SELECT id, pwd_cipher AS pwd, phone_cipher AS p FROM t_user"
        );
        assert_eq!(
            rewrite(&stmt, sql, false).unwrap(),
            "SELECT id, pwd_cipher AS pwd, phone_plain AS p FROM t_user"
        );
    }

    #[test]
    fn test_shorthand_projection() {
        let sql = "SELECT u.* FROM t_user u";
        let mut ctx = projections(sql, &["u.*"]);
        if let Projection::Shorthand { actual_columns, .. } = &mut ctx.projections[0] {
            *actual_columns = ["id", "pwd"]
                .iter()
                .map(|c| ShorthandColumn { owner: None, name: c.to_string() })
                .collect();
        }
        let stmt = StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_user"))
            .with_projections(ctx);

        assert_eq!(
            rewrite(&stmt, sql, true).unwrap(),
            "SELECT u.id, u.pwd_cipher AS pwd FROM t_user u"
        );
    }

    #[test]
    fn test_predicate() {
        let sql = "SELECT id FROM t_user WHERE phone = 'Plaintext' AND pwd = ?";
        let stmt = StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_user"))
            .with_projections(projections(sql, &["id"]))
            .with_where(where_of(sql, vec![vec!["phone = 'Plaintext'", "pwd = ?"]]));

        assert_eq!(
            rewrite(&stmt, sql, true).unwrap(),
            format!(
                "SELECT id FROM t_user WHERE phone_assisted = {} AND pwd_cipher = ?",
                assisted("Plaintext")
            )
        );
        assert!(matches!(
            rewrite(&stmt, sql, false),
            Err(RewriteError::PlainColumnRequired(table, column)) if table == "t_user" && column == "pwd"
        ));
    }

    #[test]
    fn test_assignment() {
        let sql = "UPDATE t_user SET phone = 'Plaintext', name = ? WHERE id = 1";
        let stmt = StatementContext::new(StatementKind::Update)
            .with_table(table(sql, "t_user"))
            .with_assignment(assignment(sql, "phone = 'Plaintext'"))
            .with_assignment(assignment(sql, "name = ?"))
            .with_where(where_of(sql, vec![vec!["id = 1"]]));

        assert_eq!(
            rewrite(&stmt, sql, true).unwrap(),
            format!(
                "UPDATE t_user SET phone_cipher = 'bbf316e8d940af0ad3', phone_assisted = {}, \
                 phone_plain = 'Plaintext', name = ? WHERE id = 1",
                assisted("Plaintext")
            )
        );
    }

    #[test]
    fn test_insert() {
        let sql = "INSERT INTO t_user (id, pwd, phone) VALUES (1, ?, 'Plaintext'), (2, ?, ?)";
        let stmt = StatementContext::new(StatementKind::Insert)
            .with_table(table(sql, "t_user"))
            .with_insert(insert_of(sql));

        assert_eq!(
            rewrite(&stmt, sql, true).unwrap(),
            format!(
                "INSERT INTO t_user (id, pwd_cipher, phone_cipher, phone_assisted, phone_plain) \
                 VALUES (1, ?, 'bbf316e8d940af0ad3', {}, 'Plaintext'), (2, ?, ?, ?, ?)",
                assisted("Plaintext")
            )
        );
    }
}
