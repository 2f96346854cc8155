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


use indexmap::IndexSet;
use itertools::Itertools;
use tracing::debug;

use super::{RouteContext, RouteError, RouteMapper, RouteResult, RouteUnit};
use crate::sharding::{
    condition::{ShardingCondition, ShardingConditions},
    DataNode, TableRule,
};

/// Routes one sharded table, or tables of one binding group, by condition values.
#[derive(Debug)]
pub struct StandardRoutingEngine {
    /// Primary table first, then its binding tables.
    logic_tables: Vec<String>,
    broadcast_tables: Vec<String>,
}

impl StandardRoutingEngine {
    pub fn new(logic_tables: Vec<String>, broadcast_tables: Vec<String>) -> Self {
        StandardRoutingEngine { logic_tables, broadcast_tables }
    }

    pub fn route(
        &self,
        ctx: &RouteContext<'_>,
        conditions: &mut ShardingConditions,
    ) -> Result<RouteResult, RouteError> {
        let primary = match self.logic_tables.first() {
            Some(primary) => primary,
            None => return Ok(RouteResult::new()),
        };
        let table_rule = ctx
            .rule
            .table_rule(primary)
            .ok_or_else(|| RouteError::NoDefaultDataSource(self.logic_tables.clone()))?;

        let nodes = self.route_data_nodes(ctx, table_rule, conditions)?;

        let mut result = RouteResult::new();
        for node in nodes {
            let mut mappers = vec![RouteMapper::new(primary, &node.table)];
            for other in self.logic_tables.iter().skip(1) {
                let actual =
                    ctx.rule.binding_actual_table(&node.data_source, primary, other, &node.table)?;
                mappers.push(RouteMapper::new(other, &actual));
            }
            mappers.extend(self.broadcast_tables.iter().map(|t| RouteMapper::new(t, t)));
            result.add(RouteUnit::new(
                RouteMapper::new(&node.data_source, &node.data_source),
                mappers,
            ));
        }
        Ok(result)
    }

    fn route_data_nodes(
        &self,
        ctx: &RouteContext<'_>,
        table_rule: &TableRule,
        conditions: &mut ShardingConditions,
    ) -> Result<IndexSet<DataNode>, RouteError> {
        let mut nodes = IndexSet::new();

        if conditions.is_empty() {
            nodes.extend(self.route_by_condition(ctx, table_rule, None)?);
            return Ok(nodes);
        }

        if ctx.stmt.is_insert() {
            for condition in conditions.conditions.iter_mut() {
                let routed = self.route_by_condition(ctx, table_rule, Some(condition))?;
                if routed.len() != 1 {
                    return Err(RouteError::AmbiguousInsert(table_rule.logic_table.clone()));
                }
                condition.data_nodes = routed.clone();
                nodes.extend(routed);
            }
            return Ok(nodes);
        }

        for condition in conditions.conditions.iter() {
            if condition.is_always_false() {
                debug!("skip always false condition {:?}", condition);
                continue;
            }
            nodes.extend(self.route_by_condition(ctx, table_rule, Some(condition))?);
        }
        Ok(nodes)
    }

    fn route_by_condition(
        &self,
        ctx: &RouteContext<'_>,
        table_rule: &TableRule,
        condition: Option<&ShardingCondition>,
    ) -> Result<Vec<DataNode>, RouteError> {
        let values = condition.map(|c| c.values_for(&self.logic_tables)).unwrap_or_default();
        let logic_table = &table_rule.logic_table;

        let data_sources = ctx.rule.database_strategy(table_rule).do_sharding(
            &table_rule.data_source_names(),
            &values,
            ctx.hint.database_values(logic_table),
        )?;

        let table_strategy = ctx.rule.table_strategy(table_rule);
        let mut nodes = vec![];
        for ds in data_sources {
            let tables = table_strategy.do_sharding(
                &table_rule.actual_tables(&ds),
                &values,
                ctx.hint.table_values(logic_table),
            )?;
            nodes.extend(tables.iter().map(|t| DataNode::new(&ds, t)));
        }
        Ok(nodes)
    }
}

/// Routes several unrelated sharded tables as a cartesian product per data source.
#[derive(Debug)]
pub struct ComplexRoutingEngine {
    logic_tables: Vec<String>,
    broadcast_tables: Vec<String>,
}

impl ComplexRoutingEngine {
    pub fn new(logic_tables: Vec<String>, broadcast_tables: Vec<String>) -> Self {
        ComplexRoutingEngine { logic_tables, broadcast_tables }
    }

    pub fn route(
        &self,
        ctx: &RouteContext<'_>,
        conditions: &mut ShardingConditions,
    ) -> Result<RouteResult, RouteError> {
        if !ctx.rule.allow_cartesian() {
            return Err(RouteError::UnboundTables(self.logic_tables.clone()));
        }

        let mut results = vec![];
        for group in self.binding_groups(ctx) {
            results.push(StandardRoutingEngine::new(group, vec![]).route(ctx, conditions)?);
        }

        let data_sources = match results.first() {
            Some(first) => first
                .units()
                .iter()
                .map(|u| u.data_source().to_string())
                .collect::<IndexSet<_>>(),
            None => IndexSet::new(),
        };

        let mut result = RouteResult::new();
        for ds in data_sources.iter() {
            let per_group = results
                .iter()
                .map(|r| r.units().iter().filter(|u| u.data_source() == ds).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            if per_group.iter().any(|units| units.is_empty()) {
                continue;
            }

            for combination in per_group.into_iter().multi_cartesian_product() {
                let mut mappers = combination
                    .iter()
                    .flat_map(|u| u.table_mappers.iter().cloned())
                    .collect::<Vec<_>>();
                mappers.extend(self.broadcast_tables.iter().map(|t| RouteMapper::new(t, t)));
                result.add(RouteUnit::new(RouteMapper::new(ds, ds), mappers));
            }
        }

        result.set_cartesian(true);
        Ok(result)
    }

    /// Splits tables into binding groups, keeping reference order.
    fn binding_groups(&self, ctx: &RouteContext<'_>) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = vec![];
        for table in self.logic_tables.iter() {
            let bound = groups.iter_mut().find(|g| {
                let mut candidate: Vec<String> = g.to_vec();
                candidate.push(table.clone());
                ctx.rule.is_all_binding(&candidate)
            });
            match bound {
                Some(group) => group.push(table.clone()),
                None => groups.push(vec![table.clone()]),
            }
        }
        groups
    }
}
