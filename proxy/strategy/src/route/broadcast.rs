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


use super::{RouteError, RouteMapper, RouteResult, RouteUnit};
use crate::sharding::ShardingRule;

/// Every actual node of the given tables.
#[derive(Debug)]
pub struct TableBroadcastRoutingEngine {
    logic_tables: Vec<String>,
}

impl TableBroadcastRoutingEngine {
    pub fn new(logic_tables: Vec<String>) -> Self {
        TableBroadcastRoutingEngine { logic_tables }
    }

    pub fn route(&self, rule: &ShardingRule) -> Result<RouteResult, RouteError> {
        let mut result = RouteResult::new();
        for logic_table in self.logic_tables.iter() {
            let table_rule = match rule.table_rule(logic_table) {
                Some(r) => r,
                None => continue,
            };
            for node in table_rule.data_nodes.iter() {
                result.add(RouteUnit::new(
                    RouteMapper::new(&node.data_source, &node.data_source),
                    vec![RouteMapper::new(logic_table, &node.table)],
                ));
            }
        }
        Ok(result)
    }
}

/// Every data source of the schema.
#[derive(Debug)]
pub struct DatabaseBroadcastRoutingEngine;

impl DatabaseBroadcastRoutingEngine {
    pub fn route(&self, rule: &ShardingRule) -> Result<RouteResult, RouteError> {
        if rule.data_source_names().is_empty() {
            return Err(RouteError::NoDataSource);
        }
        Ok(RouteResult::from_units(
            rule.data_source_names()
                .iter()
                .map(|ds| RouteUnit::new(RouteMapper::new(ds, ds), vec![])),
        ))
    }
}

/// Exactly one node: the first data node of the first sharded table, or the
/// first data source otherwise.
#[derive(Debug)]
pub struct UnicastRoutingEngine {
    logic_tables: Vec<String>,
}

impl UnicastRoutingEngine {
    pub fn new(logic_tables: Vec<String>) -> Self {
        UnicastRoutingEngine { logic_tables }
    }

    pub fn route(&self, rule: &ShardingRule) -> Result<RouteResult, RouteError> {
        let sharded = self.logic_tables.iter().find_map(|t| rule.table_rule(t));

        let unit = match sharded {
            Some(table_rule) => {
                let node = table_rule.data_nodes.first().ok_or(RouteError::NoDataSource)?;
                let mut mappers = vec![];
                for logic_table in self.logic_tables.iter() {
                    match rule.table_rule(logic_table) {
                        Some(other) if other.logic_table == table_rule.logic_table => {
                            mappers.push(RouteMapper::new(logic_table, &node.table));
                        }
                        Some(other) => {
                            let actual = other
                                .actual_tables(&node.data_source)
                                .into_iter()
                                .next()
                                .ok_or_else(|| RouteError::BindingTableMismatch {
                                    table: logic_table.clone(),
                                    data_source: node.data_source.clone(),
                                })?;
                            mappers.push(RouteMapper::new(logic_table, &actual));
                        }
                        None => mappers.push(RouteMapper::new(logic_table, logic_table)),
                    }
                }
                RouteUnit::new(RouteMapper::new(&node.data_source, &node.data_source), mappers)
            }
            None => {
                let ds = rule.data_source_names().first().ok_or(RouteError::NoDataSource)?;
                let mappers = self.logic_tables.iter().map(|t| RouteMapper::new(t, t)).collect();
                RouteUnit::new(RouteMapper::new(ds, ds), mappers)
            }
        };

        Ok(RouteResult::from_units(vec![unit]))
    }
}
