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


use indexmap::IndexMap;
use tracing::debug;

use crate::{
    config::ShadowConfig,
    route::RouteResult,
    statement::{PredicateRight, StatementContext},
    value::SqlValue,
};

/// Sends statements flagged by the shadow column to shadow data sources.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShadowRule {
    column: String,
    /// Source data source to its shadow.
    mappings: IndexMap<String, String>,
}

impl From<&ShadowConfig> for ShadowRule {
    fn from(config: &ShadowConfig) -> Self {
        ShadowRule {
            column: config.column.clone(),
            mappings: config
                .data_source_mappings
                .iter()
                .map(|m| (m.source.clone(), m.shadow.clone()))
                .collect(),
        }
    }
}

fn is_truthy(value: &SqlValue) -> bool {
    match value {
        SqlValue::Bool(v) => *v,
        SqlValue::Str(v) => v.eq_ignore_ascii_case("true") || v == "1",
        other => other.as_i64() == Some(1),
    }
}

impl ShadowRule {
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn is_shadow_column(&self, column: &str) -> bool {
        self.column.eq_ignore_ascii_case(column)
    }

    pub fn shadow_data_source(&self, data_source: &str) -> Option<&str> {
        self.mappings.get(data_source).map(|s| s.as_str())
    }

    /// INSERT: every row sets the shadow column to true. Otherwise: any
    /// `shadow = true` predicate in the WHERE clause.
    pub fn is_shadow(&self, stmt: &StatementContext, params: &[SqlValue]) -> bool {
        if let Some(insert) = &stmt.insert {
            let index = match insert.column_index(&self.column) {
                Some(i) => i,
                None => return false,
            };
            return !insert.rows.is_empty()
                && insert.rows.iter().all(|row| {
                    row.values
                        .get(index)
                        .and_then(|v| v.resolve(params))
                        .map_or(false, |v| is_truthy(&v))
                });
        }

        stmt.where_segment.as_ref().map_or(false, |w| {
            w.predicates().any(|p| match &p.right {
                PredicateRight::Equal(v) if self.is_shadow_column(&p.column.name) => {
                    v.resolve(params).map_or(false, |v| is_truthy(&v))
                }
                _ => false,
            })
        })
    }

    /// Replaces actual data sources with their shadows.
    pub fn decorate(&self, route: RouteResult) -> RouteResult {
        debug!("shadow routing over {:?}", route.actual_data_source_names());
        route.map_data_sources(|ds| self.shadow_data_source(ds).map(|s| s.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::{
        config::ShadowMappingConfig,
        route::{RouteMapper, RouteUnit},
        statement::{fixture::*, StatementKind},
    };

    pub fn shadow_rule() -> ShadowRule {
        ShadowRule::from(&ShadowConfig {
            column: "shadow".to_string(),
            data_source_mappings: vec![
                ShadowMappingConfig { source: "ds0".to_string(), shadow: "shadow_ds0".to_string() },
                ShadowMappingConfig { source: "ds1".to_string(), shadow: "shadow_ds1".to_string() },
            ],
        })
    }

    #[test]
    fn test_is_shadow() {
        let rule = shadow_rule();

        let sql = "INSERT INTO t_user (id, shadow) VALUES (1, true), (2, ?)";
        let stmt = StatementContext::new(StatementKind::Insert)
            .with_table(table(sql, "t_user"))
            .with_insert(insert_of(sql));
        assert!(rule.is_shadow(&stmt, &[SqlValue::Int(1)]));
        assert!(!rule.is_shadow(&stmt, &[SqlValue::Bool(false)]));

        let sql = "SELECT * FROM t_user WHERE id = 1 AND shadow = 'true'";
        let stmt = StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_user"))
            .with_where(where_of(sql, vec![vec!["id = 1", "shadow = 'true'"]]));
        assert!(rule.is_shadow(&stmt, &[]));

        let sql = "SELECT * FROM t_user WHERE id = 1";
        let stmt = StatementContext::new(StatementKind::Select)
            .with_table(table(sql, "t_user"))
            .with_where(where_of(sql, vec![vec!["id = 1"]]));
        assert!(!rule.is_shadow(&stmt, &[]));
    }

    #[test]
    fn test_decorate() {
        let route = RouteResult::from_units(vec![RouteUnit::new(
            RouteMapper::new("ds1", "ds1"),
            vec![RouteMapper::new("t_user", "t_user")],
        )]);
        let route = shadow_rule().decorate(route);
        let unit = route.units().first().unwrap();
        assert_eq!(unit.data_source(), "shadow_ds1");
        assert_eq!(unit.logic_data_source(), "ds1");
    }
}
