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


mod broadcast;
mod standard;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use self::{
    broadcast::{DatabaseBroadcastRoutingEngine, TableBroadcastRoutingEngine, UnicastRoutingEngine},
    standard::{ComplexRoutingEngine, StandardRoutingEngine},
};
use crate::{
    metadata::TableMetas,
    sharding::{condition::ShardingConditions, inline_expr::InlineError, DataNode, ShardingRule},
    statement::{DalKind, DdlKind, StatementContext, StatementKind},
    value::SqlValue,
};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no data node for {column} = {value} among {available:?}")]
    NoDataNode { column: String, value: String, available: Vec<String> },

    #[error("tables {0:?} are not bound and cartesian routing is disabled")]
    UnboundTables(Vec<String>),

    #[error("cannot find index name {0:?}")]
    IndexNotFound(String),

    #[error("no default data source for tables {0:?}")]
    NoDefaultDataSource(Vec<String>),

    #[error("no data source configured")]
    NoDataSource,

    #[error("sharding value of {0} is not numeric: {1}")]
    NotNumeric(String, String),

    #[error("insert row of {0} does not route to exactly one data node")]
    AmbiguousInsert(String),

    #[error("parameter {0} is not bound")]
    MissingParameter(usize),

    #[error("binding table {table} has no matching actual table in {data_source}")]
    BindingTableMismatch { table: String, data_source: String },

    #[error("inline expression error: {0}")]
    Inline(#[from] InlineError),
}

/// Logical name to actual name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteMapper {
    pub logic_name: String,
    pub actual_name: String,
}

impl RouteMapper {
    pub fn new(logic_name: &str, actual_name: &str) -> Self {
        RouteMapper { logic_name: logic_name.to_string(), actual_name: actual_name.to_string() }
    }
}

/// One physical target of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteUnit {
    pub data_source_mapper: RouteMapper,
    pub table_mappers: Vec<RouteMapper>,
}

impl RouteUnit {
    pub fn new(data_source_mapper: RouteMapper, table_mappers: Vec<RouteMapper>) -> Self {
        RouteUnit { data_source_mapper, table_mappers }
    }

    pub fn data_source(&self) -> &str {
        &self.data_source_mapper.actual_name
    }

    pub fn logic_data_source(&self) -> &str {
        &self.data_source_mapper.logic_name
    }

    pub fn actual_table(&self, logic_table: &str) -> Option<&str> {
        self.table_mappers
            .iter()
            .find(|m| m.logic_name.eq_ignore_ascii_case(logic_table))
            .map(|m| m.actual_name.as_str())
    }

    /// Whether this unit writes the rows routed to `node` of `logic_table`.
    pub fn contains_node(&self, logic_table: &str, node: &DataNode) -> bool {
        self.logic_data_source() == node.data_source
            && self.actual_table(logic_table).map_or(true, |t| t.eq_ignore_ascii_case(&node.table))
    }
}

/// Ordered, duplicate free set of route units.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteResult {
    units: IndexSet<RouteUnit>,
    cartesian: bool,
}

impl RouteResult {
    pub fn new() -> Self {
        RouteResult::default()
    }

    pub fn from_units(units: impl IntoIterator<Item = RouteUnit>) -> Self {
        RouteResult { units: units.into_iter().collect(), cartesian: false }
    }

    pub fn add(&mut self, unit: RouteUnit) {
        self.units.insert(unit);
    }

    pub fn units(&self) -> &IndexSet<RouteUnit> {
        &self.units
    }

    pub fn into_units(self) -> IndexSet<RouteUnit> {
        self.units
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn is_single_routing(&self) -> bool {
        self.units.len() == 1
    }

    pub fn is_cartesian(&self) -> bool {
        self.cartesian
    }

    pub fn set_cartesian(&mut self, cartesian: bool) {
        self.cartesian = cartesian;
    }

    pub fn actual_data_source_names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.data_source()).collect::<IndexSet<_>>().into_iter().collect()
    }

    /// Replaces actual data source names, keeping logical ones.
    pub fn map_data_sources<F>(self, f: F) -> RouteResult
    where
        F: Fn(&str) -> Option<String>,
    {
        let units = self
            .units
            .into_iter()
            .map(|mut unit| {
                if let Some(actual) = f(&unit.data_source_mapper.actual_name) {
                    unit.data_source_mapper.actual_name = actual;
                }
                unit
            })
            .collect();
        RouteResult { units, cartesian: self.cartesian }
    }
}

/// Explicit sharding values for hint strategies, keyed by logical table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HintValues {
    database: IndexMap<String, Vec<SqlValue>>,
    table: IndexMap<String, Vec<SqlValue>>,
}

impl HintValues {
    pub fn new() -> Self {
        HintValues::default()
    }

    pub fn add_database_value(&mut self, logic_table: &str, value: SqlValue) {
        self.database.entry(logic_table.to_ascii_lowercase()).or_insert_with(Vec::new).push(value);
    }

    pub fn add_table_value(&mut self, logic_table: &str, value: SqlValue) {
        self.table.entry(logic_table.to_ascii_lowercase()).or_insert_with(Vec::new).push(value);
    }

    pub fn database_values(&self, logic_table: &str) -> Option<&[SqlValue]> {
        self.database.get(&logic_table.to_ascii_lowercase()).map(|v| v.as_slice())
    }

    pub fn table_values(&self, logic_table: &str) -> Option<&[SqlValue]> {
        self.table.get(&logic_table.to_ascii_lowercase()).map(|v| v.as_slice())
    }
}

/// Engine picked for one statement.
#[derive(Debug)]
pub enum RoutingEngine {
    Standard(StandardRoutingEngine),
    Complex(ComplexRoutingEngine),
    TableBroadcast(TableBroadcastRoutingEngine),
    DatabaseBroadcast(DatabaseBroadcastRoutingEngine),
    Unicast(UnicastRoutingEngine),
    DefaultDataSource(Vec<String>),
}

pub struct RouteContext<'a> {
    pub rule: &'a ShardingRule,
    pub stmt: &'a StatementContext,
    pub hint: &'a HintValues,
}

impl RoutingEngine {
    pub fn route(
        &self,
        ctx: &RouteContext<'_>,
        conditions: &mut ShardingConditions,
    ) -> Result<RouteResult, RouteError> {
        match self {
            RoutingEngine::Standard(engine) => engine.route(ctx, conditions),
            RoutingEngine::Complex(engine) => engine.route(ctx, conditions),
            RoutingEngine::TableBroadcast(engine) => engine.route(ctx.rule),
            RoutingEngine::DatabaseBroadcast(engine) => engine.route(ctx.rule),
            RoutingEngine::Unicast(engine) => engine.route(ctx.rule),
            RoutingEngine::DefaultDataSource(tables) => {
                let ds = ctx
                    .rule
                    .default_data_source()
                    .ok_or_else(|| RouteError::NoDefaultDataSource(tables.clone()))?;
                let mappers = tables.iter().map(|t| RouteMapper::new(t, t)).collect();
                Ok(RouteResult::from_units(vec![RouteUnit::new(RouteMapper::new(ds, ds), mappers)]))
            }
        }
    }
}

/// Picks the routing engine for a statement and runs it.
pub struct ShardingRouter<'a> {
    rule: &'a ShardingRule,
    metas: &'a TableMetas,
}

impl<'a> ShardingRouter<'a> {
    pub fn new(rule: &'a ShardingRule, metas: &'a TableMetas) -> Self {
        ShardingRouter { rule, metas }
    }

    pub fn route(
        &self,
        stmt: &StatementContext,
        conditions: &mut ShardingConditions,
        hint: &HintValues,
    ) -> Result<RouteResult, RouteError> {
        let engine = self.engine(stmt)?;
        debug!("routing {:?} with {:?}", stmt.kind, engine);

        let ctx = RouteContext { rule: self.rule, stmt, hint };
        let result = engine.route(&ctx, conditions)?;
        debug!("route result {:?}", result);
        Ok(result)
    }

    pub fn engine(&self, stmt: &StatementContext) -> Result<RoutingEngine, RouteError> {
        let tables = self.logic_tables(stmt)?;
        let sharded = tables
            .iter()
            .filter(|t| self.rule.is_sharding_table(t))
            .cloned()
            .collect::<Vec<_>>();
        let all_broadcast =
            !tables.is_empty() && tables.iter().all(|t| self.rule.is_broadcast_table(t));

        let engine = match stmt.kind {
            StatementKind::Tcl | StatementKind::Dal(DalKind::Use | DalKind::Set) => {
                RoutingEngine::DatabaseBroadcast(DatabaseBroadcastRoutingEngine)
            }
            StatementKind::Dal(DalKind::Show | DalKind::Describe) => {
                RoutingEngine::Unicast(UnicastRoutingEngine::new(tables))
            }
            StatementKind::Ddl(_) => {
                if !sharded.is_empty() {
                    RoutingEngine::TableBroadcast(TableBroadcastRoutingEngine::new(sharded))
                } else if all_broadcast {
                    RoutingEngine::DatabaseBroadcast(DatabaseBroadcastRoutingEngine)
                } else {
                    RoutingEngine::DefaultDataSource(tables)
                }
            }
            StatementKind::Select if sharded.is_empty() && (tables.is_empty() || all_broadcast) => {
                RoutingEngine::Unicast(UnicastRoutingEngine::new(tables))
            }
            _ if sharded.is_empty() && all_broadcast => {
                RoutingEngine::DatabaseBroadcast(DatabaseBroadcastRoutingEngine)
            }
            _ if sharded.is_empty() => RoutingEngine::DefaultDataSource(tables),
            _ => {
                let broadcast = tables
                    .iter()
                    .filter(|t| self.rule.is_broadcast_table(t))
                    .cloned()
                    .collect::<Vec<_>>();
                if sharded.len() == 1 || self.rule.is_all_binding(&sharded) {
                    RoutingEngine::Standard(StandardRoutingEngine::new(sharded, broadcast))
                } else {
                    RoutingEngine::Complex(ComplexRoutingEngine::new(sharded, broadcast))
                }
            }
        };

        Ok(engine)
    }

    /// Logical tables of the statement. `DROP INDEX` without a table resolves
    /// the table from metadata.
    fn logic_tables(&self, stmt: &StatementContext) -> Result<Vec<String>, RouteError> {
        let tables = stmt.table_names();
        if stmt.kind != StatementKind::Ddl(DdlKind::DropIndex) || !tables.is_empty() {
            return Ok(tables);
        }

        let mut resolved: Vec<String> = vec![];
        for index in stmt.indexes.iter() {
            let table = self
                .metas
                .find_table_by_index(&index.name)
                .ok_or_else(|| RouteError::IndexNotFound(index.name.clone()))?;
            if !resolved.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                resolved.push(table.to_string());
            }
        }
        Ok(resolved)
    }
}
