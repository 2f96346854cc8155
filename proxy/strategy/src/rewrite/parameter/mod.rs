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


mod grouped;
mod rewriter;
mod standard;

pub use self::{
    grouped::{parameter_position, GroupedParameterBuilder},
    rewriter::ParameterRewriter,
    standard::StandardParameterBuilder,
};
use super::generator::RouteInfo;
use crate::{route::RouteUnit, sharding::ShardingRule, statement::StatementContext, value::SqlValue};

/// Parameters of one rewrite. INSERT rows keep their own group so that a unit
/// receives only the parameters of the rows routed to it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterBuilder {
    Standard(StandardParameterBuilder),
    Grouped(GroupedParameterBuilder),
}

impl ParameterBuilder {
    pub fn new(
        stmt: &StatementContext,
        params: &[SqlValue],
        route: Option<RouteInfo<'_>>,
        sharding_rule: Option<&ShardingRule>,
    ) -> Self {
        let insert = match &stmt.insert {
            Some(insert) if !insert.rows.is_empty() => insert,
            _ => return ParameterBuilder::Standard(StandardParameterBuilder::new(params.to_vec())),
        };

        let mut builder = GroupedParameterBuilder::new(insert, params);
        let sharded = stmt
            .tables
            .first()
            .filter(|t| sharding_rule.map_or(false, |r| r.is_sharding_table(&t.name)));
        if let (Some(table), Some(route)) = (sharded, route) {
            let data_nodes =
                route.conditions.conditions.iter().map(|c| c.data_nodes.clone()).collect();
            builder = builder.with_data_nodes(&table.name, data_nodes);
        }
        ParameterBuilder::Grouped(builder)
    }

    pub fn standard_mut(&mut self) -> Option<&mut StandardParameterBuilder> {
        match self {
            ParameterBuilder::Standard(builder) => Some(builder),
            ParameterBuilder::Grouped(_) => None,
        }
    }

    pub fn grouped_mut(&mut self) -> Option<&mut GroupedParameterBuilder> {
        match self {
            ParameterBuilder::Grouped(builder) => Some(builder),
            ParameterBuilder::Standard(_) => None,
        }
    }

    /// Parameters sent to `unit`, or to the only target when `None`.
    pub fn parameters(&self, unit: Option<&RouteUnit>) -> Vec<SqlValue> {
        match self {
            ParameterBuilder::Standard(builder) => builder.parameters(),
            ParameterBuilder::Grouped(builder) => builder.parameters(unit),
        }
    }
}
