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


//! Token generators. Each generator declares the capabilities it needs and
//! receives only those; generators run in a fixed order and may refine the
//! tokens generated before them.

mod base;
mod encrypt;
mod shadow;
mod sharding;

use paste::paste;
use tracing::trace;

pub use self::{
    base::BaseTokenGenerator, encrypt::EncryptTokenGenerator, shadow::ShadowTokenGenerator,
    sharding::ShardingTokenGenerator,
};
pub(crate) use self::{shadow::shadow_predicate_removals, sharding::revised_row_count};
use super::{token::SqlToken, RewriteError};
use crate::{
    encrypt::EncryptRule, metadata::TableMetas, shadow::ShadowRule,
    sharding::{condition::ShardingConditions, ShardingRule},
    statement::StatementContext,
    value::SqlValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ShardingRule,
    EncryptRule,
    ShadowRule,
    TableMetas,
    Parameters,
    QueryWithCipherColumn,
    RouteContext,
    PreviousTokens,
}

/// What the rewriter knows about routing.
#[derive(Debug, Clone, Copy)]
pub struct RouteInfo<'a> {
    pub single_routing: bool,
    pub conditions: &'a ShardingConditions,
}

/// Dependencies handed to a generator or parameter rewriter.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratorDeps<'a> {
    sharding_rule: Option<&'a ShardingRule>,
    encrypt_rule: Option<&'a EncryptRule>,
    shadow_rule: Option<&'a ShadowRule>,
    table_metas: Option<&'a TableMetas>,
    parameters: Option<&'a [SqlValue]>,
    query_with_cipher_column: Option<bool>,
    route_context: Option<RouteInfo<'a>>,
}

gen_dep_accessors!(
    GeneratorDeps,
    sharding_rule: &'a ShardingRule,
    encrypt_rule: &'a EncryptRule,
    shadow_rule: &'a ShadowRule,
    table_metas: &'a TableMetas,
    parameters: &'a [SqlValue],
    query_with_cipher_column: bool,
    route_context: RouteInfo<'a>
);

impl<'a> GeneratorDeps<'a> {
    /// Copies from `source` only what `capabilities` declare.
    pub fn inject(source: &GeneratorDeps<'a>, capabilities: &[Capability]) -> Self {
        let mut deps = GeneratorDeps::default();
        for capability in capabilities {
            match capability {
                Capability::ShardingRule => deps.sharding_rule = source.sharding_rule,
                Capability::EncryptRule => deps.encrypt_rule = source.encrypt_rule,
                Capability::ShadowRule => deps.shadow_rule = source.shadow_rule,
                Capability::TableMetas => deps.table_metas = source.table_metas,
                Capability::Parameters => deps.parameters = source.parameters,
                Capability::QueryWithCipherColumn => {
                    deps.query_with_cipher_column = source.query_with_cipher_column
                }
                Capability::RouteContext => deps.route_context = source.route_context,
                Capability::PreviousTokens => {}
            }
        }
        deps
    }

    /// Whether the statement reaches more than one unit.
    pub fn is_multi_routing(&self) -> bool {
        self.route_context.map_or(false, |r| !r.single_routing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenGenerator {
    Base(BaseTokenGenerator),
    Sharding(ShardingTokenGenerator),
    Encrypt(EncryptTokenGenerator),
    Shadow(ShadowTokenGenerator),
}

impl TokenGenerator {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            TokenGenerator::Base(g) => g.capabilities(),
            TokenGenerator::Sharding(g) => g.capabilities(),
            TokenGenerator::Encrypt(g) => g.capabilities(),
            TokenGenerator::Shadow(g) => g.capabilities(),
        }
    }

    pub fn is_generate(&self, stmt: &StatementContext) -> bool {
        match self {
            TokenGenerator::Base(g) => g.is_generate(stmt),
            TokenGenerator::Sharding(g) => g.is_generate(stmt),
            TokenGenerator::Encrypt(g) => g.is_generate(stmt),
            TokenGenerator::Shadow(g) => g.is_generate(stmt),
        }
    }

    pub fn generate(
        &self,
        stmt: &StatementContext,
        deps: &GeneratorDeps<'_>,
        tokens: &mut Vec<SqlToken>,
    ) -> Result<(), RewriteError> {
        match self {
            TokenGenerator::Base(g) => g.generate(stmt, deps, tokens),
            TokenGenerator::Sharding(g) => g.generate(stmt, deps, tokens),
            TokenGenerator::Encrypt(g) => g.generate(stmt, deps, tokens),
            TokenGenerator::Shadow(g) => g.generate(stmt, deps, tokens),
        }
    }
}

/// The generator pipeline for the configured rules.
#[derive(Debug, Clone, Default)]
pub struct TokenGenerators {
    generators: Vec<TokenGenerator>,
}

impl TokenGenerators {
    pub fn build(sharding: bool, encrypt: bool, shadow: bool) -> Self {
        let mut generators = vec![];
        if sharding {
            generators.push(TokenGenerator::Base(BaseTokenGenerator::RemoveOwner));
        }
        generators.push(TokenGenerator::Base(BaseTokenGenerator::InsertValues));

        if sharding {
            generators.extend(ShardingTokenGenerator::ALL.iter().map(|g| TokenGenerator::Sharding(*g)));
        }
        if encrypt {
            generators.extend(EncryptTokenGenerator::ALL.iter().map(|g| TokenGenerator::Encrypt(*g)));
        }
        if shadow {
            generators.extend(ShadowTokenGenerator::ALL.iter().map(|g| TokenGenerator::Shadow(*g)));
        }

        TokenGenerators { generators }
    }

    pub fn generators(&self) -> &[TokenGenerator] {
        &self.generators
    }

    pub fn generate(
        &self,
        stmt: &StatementContext,
        source: &GeneratorDeps<'_>,
    ) -> Result<Vec<SqlToken>, RewriteError> {
        let mut tokens = vec![];
        for generator in self.generators.iter() {
            if !generator.is_generate(stmt) {
                continue;
            }
            let deps = GeneratorDeps::inject(source, generator.capabilities());
            let before = tokens.len();
            generator.generate(stmt, &deps, &mut tokens)?;
            trace!("{:?} generated {} tokens", generator, tokens.len() - before);
        }
        Ok(tokens)
    }
}
