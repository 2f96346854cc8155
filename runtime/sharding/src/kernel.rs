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


use std::sync::Arc;

use crossbeam_channel::Sender;
use shard_error::Error;
use strategy::{
    config::{Props, RuleConfig},
    encrypt::EncryptRule,
    merge::{merge_update_counts, MergeEngine, MergedResult, QueryResult},
    metadata::{MetaDataHolder, SchemaChangedEvent, TableMetaConfig, TableMetas},
    rewrite::{
        generator::RouteInfo, RewriteRules, RouteSqlRewriteEngine, SqlRewriteEntry, SqlUnit,
    },
    route::{HintValues, RouteUnit, ShardingRouter},
    shadow::ShadowRule,
    sharding::{condition::ShardingConditionEngine, ShardingRule},
    statement::StatementContext,
    SqlValue,
};
use tracing::{debug, info};

/// Rewritten SQL bound for one route unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    pub route_unit: RouteUnit,
    pub sql_unit: SqlUnit,
}

impl ExecutionUnit {
    pub fn data_source(&self) -> &str {
        self.route_unit.data_source()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub units: Vec<ExecutionUnit>,
    pub shadow: bool,
}

/// Routes, rewrites and merges statements of one logical schema.
pub struct ShardingKernel {
    sharding: Arc<ShardingRule>,
    encrypt: Option<Arc<EncryptRule>>,
    shadow: Option<Arc<ShadowRule>>,
    props: Props,
    metadata: Arc<MetaDataHolder>,
}

impl ShardingKernel {
    pub fn new(
        rules: &RuleConfig,
        table_metas: &[TableMetaConfig],
        notifier: Option<Sender<SchemaChangedEvent>>,
    ) -> Result<Self, Error> {
        let sharding = ShardingRule::new(&rules.sharding)?;
        let encrypt = match &rules.encrypt {
            Some(config) => {
                let rule = EncryptRule::new(config)?;
                if !rules.props.query_with_cipher_column {
                    rule.check_plain_columns()?;
                }
                Some(Arc::new(rule))
            }
            None => None,
        };
        let shadow = rules.shadow.as_ref().map(|config| Arc::new(ShadowRule::from(config)));

        Ok(ShardingKernel {
            sharding: Arc::new(sharding),
            encrypt,
            shadow,
            props: rules.props.clone(),
            metadata: MetaDataHolder::new(TableMetas::from_config(table_metas), notifier),
        })
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn metadata(&self) -> &Arc<MetaDataHolder> {
        &self.metadata
    }

    /// Routes `stmt` and renders one SQL unit per route unit.
    pub fn execute(
        &self,
        sql: &str,
        params: &[SqlValue],
        stmt: &StatementContext,
        hint: &HintValues,
    ) -> Result<ExecutionContext, Error> {
        let metas = self.metadata.snapshot();

        let mut conditions =
            ShardingConditionEngine::new(&self.sharding, &metas).create(stmt, params)?;
        let mut route =
            ShardingRouter::new(&self.sharding, &metas).route(stmt, &mut conditions, hint)?;

        let shadow = match &self.shadow {
            Some(rule) if rule.is_shadow(stmt, params) => {
                route = rule.decorate(route);
                true
            }
            _ => false,
        };

        let rules = RewriteRules {
            sharding: Some(&self.sharding),
            encrypt: self.encrypt.as_deref(),
            shadow: self.shadow.as_deref(),
            metas: &metas,
            props: &self.props,
        };
        let info = RouteInfo { single_routing: route.is_single_routing(), conditions: &conditions };
        let ctx = SqlRewriteEntry::new(rules).create_context(sql, params, stmt, Some(info))?;
        let units = RouteSqlRewriteEngine::rewrite(&ctx, &route)?
            .into_iter()
            .map(|(route_unit, sql_unit)| ExecutionUnit { route_unit, sql_unit })
            .collect::<Vec<_>>();

        if self.props.sql_show {
            info!("Logic SQL: {}", sql);
            for unit in units.iter() {
                info!(
                    "Actual SQL: {} ::: {} ::: {:?}",
                    unit.data_source(),
                    unit.sql_unit.sql,
                    unit.sql_unit.parameters
                );
            }
        }
        debug!("{} execution units, shadow: {}", units.len(), shadow);

        Ok(ExecutionContext { units, shadow })
    }

    /// Merges the cursors returned by the execution units, in unit order.
    pub fn merge(
        &self,
        stmt: &StatementContext,
        results: Vec<Box<dyn QueryResult>>,
        params: &[SqlValue],
    ) -> Result<Box<dyn MergedResult>, Error> {
        let engine = MergeEngine::new(self.encrypt.as_deref(), &self.props);
        Ok(engine.merge(stmt, results, params)?)
    }

    pub fn merge_update_counts(&self, counts: &[u64]) -> u64 {
        merge_update_counts(counts)
    }

    /// Applies a DDL statement that completed on every data source.
    pub fn refresh_metadata(&self, stmt: &StatementContext) {
        self.metadata.refresh(stmt);
    }
}
