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


use std::collections::BTreeSet;

use super::standard::StandardParameterBuilder;
use crate::{
    rewrite::token::is_routed_to,
    route::RouteUnit,
    sharding::DataNode,
    statement::{InsertContext, InsertRow},
    value::SqlValue,
};

/// Parameters of a batched INSERT, one group per row plus the parameters
/// outside the VALUES list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupedParameterBuilder {
    groups: Vec<StandardParameterBuilder>,
    data_nodes: Vec<Vec<DataNode>>,
    generic: StandardParameterBuilder,
    logic_table: Option<String>,
}

impl GroupedParameterBuilder {
    pub fn new(insert: &InsertContext, params: &[SqlValue]) -> Self {
        let mut in_rows = BTreeSet::new();
        let groups = insert
            .rows
            .iter()
            .map(|row| {
                let indexes = row.parameter_indexes();
                in_rows.extend(indexes.iter().copied());
                StandardParameterBuilder::new(
                    indexes.iter().filter_map(|idx| params.get(*idx).cloned()).collect(),
                )
            })
            .collect::<Vec<_>>();

        let generic = params
            .iter()
            .enumerate()
            .filter(|(idx, _)| !in_rows.contains(idx))
            .map(|(_, v)| v.clone())
            .collect();

        GroupedParameterBuilder {
            data_nodes: vec![vec![]; groups.len()],
            groups,
            generic: StandardParameterBuilder::new(generic),
            logic_table: None,
        }
    }

    /// Data nodes each row was routed to, in row order.
    pub fn with_data_nodes(mut self, logic_table: &str, data_nodes: Vec<Vec<DataNode>>) -> Self {
        if data_nodes.len() == self.groups.len() {
            self.logic_table = Some(logic_table.to_string());
            self.data_nodes = data_nodes;
        }
        self
    }

    pub fn groups(&self) -> &[StandardParameterBuilder] {
        &self.groups
    }

    pub fn group_mut(&mut self, row: usize) -> Option<&mut StandardParameterBuilder> {
        self.groups.get_mut(row)
    }

    pub fn generic_mut(&mut self) -> &mut StandardParameterBuilder {
        &mut self.generic
    }

    /// Parameters of the rows routed to `unit`, every row without one.
    pub fn parameters(&self, unit: Option<&RouteUnit>) -> Vec<SqlValue> {
        let mut result = vec![];
        for (group, nodes) in self.groups.iter().zip(self.data_nodes.iter()) {
            if is_routed_to(unit, self.logic_table.as_deref(), nodes) {
                result.extend(group.parameters());
            }
        }
        result.extend(self.generic.parameters());
        result
    }
}

/// Position of value `value_index` among the parameters of `row`, when that
/// value is a placeholder.
pub fn parameter_position(row: &InsertRow, value_index: usize) -> Option<usize> {
    row.values.get(value_index)?.parameter_index()?;
    Some(row.values[..value_index].iter().filter(|v| v.parameter_index().is_some()).count())
}
