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


//! Turns one logical statement into one SQL unit per route unit.

pub mod generator;
pub mod parameter;
pub mod sql_builder;
pub mod token;

use indexmap::IndexMap;
use tracing::debug;

use self::{
    generator::{GeneratorDeps, RouteInfo, TokenGenerators},
    parameter::{ParameterBuilder, ParameterRewriter},
    sql_builder::SqlBuilder,
    token::SqlToken,
};
use crate::{
    config::Props,
    encrypt::EncryptRule,
    metadata::TableMetas,
    route::{RouteResult, RouteUnit},
    shadow::ShadowRule,
    sharding::ShardingRule,
    statement::StatementContext,
    value::SqlValue,
};

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("token starting at {start} overlaps text already written up to {cursor}")]
    OverlappingToken { start: usize, cursor: usize },

    #[error("token [{start}, {end}) is out of range for sql of length {len}")]
    TokenOutOfRange { start: usize, end: usize, len: usize },

    #[error("plain column of {0}.{1} is required to query in plaintext")]
    PlainColumnRequired(String, String),

    #[error("parameter index {0} is out of range, {1} parameters")]
    ParameterIndexOutOfRange(usize, usize),

    #[error("{0} is not available to this generator")]
    MissingCapability(&'static str),
}

/// Rewritten SQL and the parameters that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlUnit {
    pub sql: String,
    pub parameters: Vec<SqlValue>,
}

/// Rules and settings a rewrite draws on.
#[derive(Debug, Clone, Copy)]
pub struct RewriteRules<'a> {
    pub sharding: Option<&'a ShardingRule>,
    pub encrypt: Option<&'a EncryptRule>,
    pub shadow: Option<&'a ShadowRule>,
    pub metas: &'a TableMetas,
    pub props: &'a Props,
}

pub struct SqlRewriteContext<'a> {
    pub sql: &'a str,
    pub stmt: &'a StatementContext,
    pub tokens: Vec<SqlToken>,
    pub parameter_builder: ParameterBuilder,
}

pub struct SqlRewriteEntry<'a> {
    rules: RewriteRules<'a>,
}

impl<'a> SqlRewriteEntry<'a> {
    pub fn new(rules: RewriteRules<'a>) -> Self {
        SqlRewriteEntry { rules }
    }

    /// Generates tokens and rewrites parameters. `route` is `None` when the
    /// statement is not sharded.
    pub fn create_context(
        &self,
        sql: &'a str,
        params: &[SqlValue],
        stmt: &'a StatementContext,
        route: Option<RouteInfo<'_>>,
    ) -> Result<SqlRewriteContext<'a>, RewriteError> {
        let mut deps = GeneratorDeps::default()
            .with_table_metas(self.rules.metas)
            .with_parameters(params)
            .with_query_with_cipher_column(self.rules.props.query_with_cipher_column);
        if let Some(rule) = self.rules.sharding {
            deps = deps.with_sharding_rule(rule);
        }
        if let Some(rule) = self.rules.encrypt {
            deps = deps.with_encrypt_rule(rule);
        }
        if let Some(rule) = self.rules.shadow {
            deps = deps.with_shadow_rule(rule);
        }
        if let Some(route) = route {
            deps = deps.with_route_context(route);
        }

        let (sharding, encrypt, shadow) = (
            self.rules.sharding.is_some(),
            self.rules.encrypt.is_some(),
            self.rules.shadow.is_some(),
        );
        let tokens = TokenGenerators::build(sharding, encrypt, shadow).generate(stmt, &deps)?;

        let mut parameter_builder = ParameterBuilder::new(stmt, params, route, self.rules.sharding);
        for rewriter in ParameterRewriter::build(sharding, encrypt, shadow) {
            if rewriter.is_rewrite(stmt) {
                let deps = GeneratorDeps::inject(&deps, rewriter.capabilities());
                rewriter.rewrite(stmt, &deps, &mut parameter_builder)?;
            }
        }

        debug!("{} tokens generated for {:?}", tokens.len(), stmt.kind);
        Ok(SqlRewriteContext { sql, stmt, tokens, parameter_builder })
    }
}

/// Renders one unit per route unit.
pub struct RouteSqlRewriteEngine;

impl RouteSqlRewriteEngine {
    pub fn rewrite(
        ctx: &SqlRewriteContext<'_>,
        route: &RouteResult,
    ) -> Result<IndexMap<RouteUnit, SqlUnit>, RewriteError> {
        let builder = SqlBuilder::new(ctx.sql, &ctx.tokens);
        let mut units = IndexMap::with_capacity(route.units().len());
        for unit in route.units().iter() {
            let sql = builder.to_sql(Some(unit))?;
            let parameters = ctx.parameter_builder.parameters(Some(unit));
            units.insert(unit.clone(), SqlUnit { sql, parameters });
        }
        Ok(units)
    }
}

/// Renders a single unit for statements that are not routed.
pub struct GenericSqlRewriteEngine;

impl GenericSqlRewriteEngine {
    pub fn rewrite(ctx: &SqlRewriteContext<'_>) -> Result<SqlUnit, RewriteError> {
        Ok(SqlUnit {
            sql: SqlBuilder::new(ctx.sql, &ctx.tokens).to_sql(None)?,
            parameters: ctx.parameter_builder.parameters(None),
        })
    }
}
