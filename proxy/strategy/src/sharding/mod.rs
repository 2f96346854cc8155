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


pub mod algorithm;
pub mod condition;
pub mod inline_expr;
pub mod strategy;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

pub use self::strategy::ShardingStrategy;
use crate::{
    config::{ConfigError, ShardingConfig, TableRuleConfig},
    route::RouteError,
};

/// One physical table: `ds0.t_order_1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: &str, table: &str) -> Self {
        DataNode { data_source: data_source.to_string(), table: table.to_string() }
    }

    /// Parses `ds.table`. A bare data source name keeps the logical table name.
    pub fn parse(raw: &str, logic_table: &str) -> Self {
        match raw.trim().split_once('.') {
            Some((ds, table)) => DataNode::new(ds.trim(), table.trim()),
            None => DataNode::new(raw.trim(), logic_table),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRule {
    pub logic_table: String,
    pub data_nodes: Vec<DataNode>,
    pub database_strategy: Option<ShardingStrategy>,
    pub table_strategy: Option<ShardingStrategy>,
}

impl TableRule {
    fn new(config: &TableRuleConfig, data_sources: &[String]) -> Result<Self, ConfigError> {
        let data_nodes = match &config.actual_data_nodes {
            Some(expr) => inline_expr::expand(expr)
                .map_err(|e| ConfigError::InvalidInlineExpression(expr.clone(), e.to_string()))?
                .iter()
                .map(|raw| DataNode::parse(raw, &config.logic_table))
                .collect::<Vec<_>>(),
            None => data_sources.iter().map(|ds| DataNode::new(ds, &config.logic_table)).collect(),
        };

        if data_nodes.is_empty() {
            return Err(ConfigError::NoDataNodes(config.logic_table.clone()));
        }

        Ok(TableRule {
            logic_table: config.logic_table.clone(),
            data_nodes,
            database_strategy: config
                .database_strategy
                .as_ref()
                .map(ShardingStrategy::try_from)
                .transpose()?,
            table_strategy: config.table_strategy.as_ref().map(ShardingStrategy::try_from).transpose()?,
        })
    }

    /// Data sources in data node order.
    pub fn data_source_names(&self) -> Vec<String> {
        self.data_nodes
            .iter()
            .map(|n| n.data_source.clone())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn actual_tables(&self, data_source: &str) -> Vec<String> {
        self.data_nodes
            .iter()
            .filter(|n| n.data_source == data_source)
            .map(|n| n.table.clone())
            .collect()
    }

    pub fn actual_table_index(&self, data_source: &str, actual_table: &str) -> Option<usize> {
        self.actual_tables(data_source).iter().position(|t| t.eq_ignore_ascii_case(actual_table))
    }
}

/// Sharding rule of one logical schema. Built once from configuration and
/// shared read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardingRule {
    data_sources: Vec<String>,
    tables: IndexMap<String, TableRule>,
    binding_groups: Vec<Vec<String>>,
    broadcast_tables: Vec<String>,
    default_data_source: Option<String>,
    default_database_strategy: ShardingStrategy,
    default_table_strategy: ShardingStrategy,
    allow_cartesian: bool,
}

impl TryFrom<&ShardingConfig> for ShardingRule {
    type Error = ConfigError;

    fn try_from(config: &ShardingConfig) -> Result<Self, Self::Error> {
        ShardingRule::new(config)
    }
}

impl ShardingRule {
    pub fn new(config: &ShardingConfig) -> Result<Self, ConfigError> {
        let mut tables = IndexMap::new();
        for table in config.tables.iter() {
            let rule = TableRule::new(table, &config.data_sources)?;
            tables.insert(table.logic_table.to_ascii_lowercase(), rule);
        }

        let data_sources = if config.data_sources.is_empty() {
            tables
                .values()
                .flat_map(|t| t.data_source_names())
                .chain(config.default_data_source.iter().cloned())
                .collect::<IndexSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
        } else {
            let known = &config.data_sources;
            let unknown = tables
                .values()
                .flat_map(|t| t.data_nodes.iter())
                .map(|n| &n.data_source)
                .chain(config.default_data_source.iter())
                .find(|ds| !known.contains(ds));
            if let Some(ds) = unknown {
                return Err(ConfigError::UnknownDataSource(ds.clone()));
            }
            config.data_sources.clone()
        };

        let rule = ShardingRule {
            data_sources,
            tables,
            binding_groups: config.binding_tables.clone(),
            broadcast_tables: config.broadcast_tables.clone(),
            default_data_source: config.default_data_source.clone(),
            default_database_strategy: config
                .default_database_strategy
                .as_ref()
                .map(ShardingStrategy::try_from)
                .transpose()?
                .unwrap_or_default(),
            default_table_strategy: config
                .default_table_strategy
                .as_ref()
                .map(ShardingStrategy::try_from)
                .transpose()?
                .unwrap_or_default(),
            allow_cartesian: config.allow_cartesian,
        };
        rule.check_binding_groups()?;

        debug!(
            "sharding rule built with tables {:?} over data sources {:?}",
            rule.tables.keys().collect::<Vec<_>>(),
            rule.data_sources
        );
        Ok(rule)
    }

    fn check_binding_groups(&self) -> Result<(), ConfigError> {
        for group in self.binding_groups.iter() {
            let mut rules = Vec::with_capacity(group.len());
            for name in group.iter() {
                let rule = self
                    .table_rule(name)
                    .ok_or_else(|| ConfigError::UnknownBindingTable(name.clone()))?;
                rules.push(rule);
            }

            if let Some((first, rest)) = rules.split_first() {
                for other in rest {
                    let same_layout = first.data_source_names() == other.data_source_names()
                        && first.data_source_names().iter().all(|ds| {
                            first.actual_tables(ds).len() == other.actual_tables(ds).len()
                        });
                    if !same_layout {
                        return Err(ConfigError::BindingTableMismatch(
                            first.logic_table.clone(),
                            other.logic_table.clone(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn data_source_names(&self) -> &[String] {
        &self.data_sources
    }

    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }

    pub fn allow_cartesian(&self) -> bool {
        self.allow_cartesian
    }

    pub fn table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.tables.get(&logic_table.to_ascii_lowercase())
    }

    pub fn table_rules(&self) -> impl Iterator<Item = &TableRule> {
        self.tables.values()
    }

    pub fn is_sharding_table(&self, logic_table: &str) -> bool {
        self.table_rule(logic_table).is_some()
    }

    pub fn is_broadcast_table(&self, logic_table: &str) -> bool {
        self.broadcast_tables.iter().any(|t| t.eq_ignore_ascii_case(logic_table))
    }

    pub fn database_strategy<'a>(&'a self, rule: &'a TableRule) -> &'a ShardingStrategy {
        rule.database_strategy.as_ref().unwrap_or(&self.default_database_strategy)
    }

    pub fn table_strategy<'a>(&'a self, rule: &'a TableRule) -> &'a ShardingStrategy {
        rule.table_strategy.as_ref().unwrap_or(&self.default_table_strategy)
    }

    /// Sharding columns of both levels of a logical table.
    pub fn sharding_columns(&self, logic_table: &str) -> Vec<String> {
        match self.table_rule(logic_table) {
            Some(rule) => self
                .database_strategy(rule)
                .sharding_columns()
                .into_iter()
                .chain(self.table_strategy(rule).sharding_columns())
                .map(|c| c.to_string())
                .collect::<IndexSet<_>>()
                .into_iter()
                .collect(),
            None => vec![],
        }
    }

    pub fn is_sharding_column(&self, logic_table: &str, column: &str) -> bool {
        self.sharding_columns(logic_table).iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    pub fn binding_group(&self, logic_table: &str) -> Option<&Vec<String>> {
        self.binding_groups
            .iter()
            .find(|g| g.iter().any(|t| t.eq_ignore_ascii_case(logic_table)))
    }

    /// Whether every table belongs to one binding group.
    pub fn is_all_binding(&self, logic_tables: &[String]) -> bool {
        match logic_tables.first().and_then(|t| self.binding_group(t)) {
            Some(group) => logic_tables
                .iter()
                .all(|t| group.iter().any(|g| g.eq_ignore_ascii_case(t))),
            None => false,
        }
    }

    /// Actual table of `binding_table` at the position `actual_table` has
    /// among the actual tables of `logic_table` in `data_source`.
    pub fn binding_actual_table(
        &self,
        data_source: &str,
        logic_table: &str,
        binding_table: &str,
        actual_table: &str,
    ) -> Result<String, RouteError> {
        let mismatch = || RouteError::BindingTableMismatch {
            table: binding_table.to_string(),
            data_source: data_source.to_string(),
        };
        let primary = self.table_rule(logic_table).ok_or_else(mismatch)?;
        let binding = self.table_rule(binding_table).ok_or_else(mismatch)?;
        let position = primary.actual_table_index(data_source, actual_table).ok_or_else(mismatch)?;
        binding.actual_tables(data_source).get(position).cloned().ok_or_else(mismatch)
    }

    /// Logical table owning an actual table name.
    pub fn find_logic_table_by_actual(&self, actual_table: &str) -> Option<&str> {
        self.tables
            .values()
            .find(|r| r.data_nodes.iter().any(|n| n.table.eq_ignore_ascii_case(actual_table)))
            .map(|r| r.logic_table.as_str())
    }
}
