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
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::statement::{DdlKind, StatementContext, StatementKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableMeta {
    pub columns: IndexMap<String, ColumnMeta>,
    pub indexes: IndexSet<String>,
}

/// Table metadata as configured, used to seed [`TableMetas`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetaConfig {
    pub name: String,
    #[serde(default, rename = "column")]
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub indexes: Vec<String>,
}

/// Logical table metadata keyed by lower-cased table name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableMetas {
    tables: IndexMap<String, TableMeta>,
}

impl TableMetas {
    pub fn new() -> Self {
        TableMetas::default()
    }

    pub fn from_config(config: &[TableMetaConfig]) -> Self {
        let mut metas = TableMetas::new();
        for table in config {
            let meta = TableMeta {
                columns: table
                    .columns
                    .iter()
                    .map(|c| (c.name.to_ascii_lowercase(), c.clone()))
                    .collect(),
                indexes: table.indexes.iter().map(|i| i.to_ascii_lowercase()).collect(),
            };
            metas.put(&table.name, meta);
        }
        metas
    }

    pub fn put(&mut self, table: &str, meta: TableMeta) {
        self.tables.insert(table.to_ascii_lowercase(), meta);
    }

    pub fn remove(&mut self, table: &str) -> Option<TableMeta> {
        self.tables.shift_remove(&table.to_ascii_lowercase())
    }

    pub fn get(&self, table: &str) -> Option<&TableMeta> {
        self.tables.get(&table.to_ascii_lowercase())
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.get(table).is_some()
    }

    /// Column names in declaration order; empty for unknown tables.
    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.get(table).map_or_else(Vec::new, |t| t.columns.values().map(|c| c.name.clone()).collect())
    }

    pub fn contains_index(&self, table: &str, index: &str) -> bool {
        self.get(table).map_or(false, |t| t.indexes.contains(&index.to_ascii_lowercase()))
    }

    /// Logical table owning an index.
    pub fn find_table_by_index(&self, index: &str) -> Option<&str> {
        let index = index.to_ascii_lowercase();
        self.tables.iter().find(|(_, t)| t.indexes.contains(&index)).map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChangedEvent {
    TableCreated(String),
    TableAltered(String),
    TableDropped(String),
    IndexCreated { table: String, index: String },
    IndexDropped { table: String, index: String },
}

/// Shared, mutable view of [`TableMetas`]. DDL applied through
/// [`MetaDataHolder::refresh`] is published to the optional subscriber.
pub struct MetaDataHolder {
    metas: RwLock<TableMetas>,
    notifier: Option<Sender<SchemaChangedEvent>>,
}

impl MetaDataHolder {
    pub fn new(metas: TableMetas, notifier: Option<Sender<SchemaChangedEvent>>) -> Arc<Self> {
        Arc::new(MetaDataHolder { metas: RwLock::new(metas), notifier })
    }

    /// A consistent copy for one statement.
    pub fn snapshot(&self) -> TableMetas {
        self.metas.read().clone()
    }

    /// Applies a DDL statement that completed on the data sources.
    pub fn refresh(&self, stmt: &StatementContext) {
        let ddl = match stmt.kind {
            StatementKind::Ddl(kind) => kind,
            _ => return,
        };

        let events = {
            let mut metas = self.metas.write();
            Self::apply(&mut metas, ddl, stmt)
        };

        for event in events {
            debug!("schema changed {:?}", event);
            if let Some(notifier) = &self.notifier {
                if let Err(e) = notifier.send(event) {
                    warn!("schema changed subscriber is gone: {:?}", e);
                }
            }
        }
    }

    fn apply(metas: &mut TableMetas, ddl: DdlKind, stmt: &StatementContext) -> Vec<SchemaChangedEvent> {
        let table = stmt.tables.first().map(|t| t.name.clone());
        let mut events = vec![];

        match (ddl, table) {
            (DdlKind::CreateTable, Some(table)) => {
                let columns = stmt
                    .column_definitions
                    .iter()
                    .map(|c| {
                        let meta = ColumnMeta {
                            name: c.name.clone(),
                            data_type: c.data_type.clone(),
                            primary_key: c.primary_key,
                        };
                        (c.name.to_ascii_lowercase(), meta)
                    })
                    .collect();
                metas.put(&table, TableMeta { columns, indexes: IndexSet::new() });
                events.push(SchemaChangedEvent::TableCreated(table));
            }
            (DdlKind::AlterTable, Some(table)) => {
                let mut meta = metas.get(&table).cloned().unwrap_or_default();
                for c in stmt.column_definitions.iter() {
                    meta.columns.insert(
                        c.name.to_ascii_lowercase(),
                        ColumnMeta {
                            name: c.name.clone(),
                            data_type: c.data_type.clone(),
                            primary_key: c.primary_key,
                        },
                    );
                }
                metas.put(&table, meta);
                events.push(SchemaChangedEvent::TableAltered(table));
            }
            (DdlKind::DropTable, _) => {
                for t in stmt.table_names() {
                    if metas.remove(&t).is_some() {
                        events.push(SchemaChangedEvent::TableDropped(t));
                    }
                }
            }
            (DdlKind::CreateIndex, Some(table)) => {
                let mut meta = metas.get(&table).cloned().unwrap_or_default();
                for index in stmt.indexes.iter() {
                    meta.indexes.insert(index.name.to_ascii_lowercase());
                    events.push(SchemaChangedEvent::IndexCreated {
                        table: table.clone(),
                        index: index.name.clone(),
                    });
                }
                metas.put(&table, meta);
            }
            (DdlKind::DropIndex, table) => {
                for index in stmt.indexes.iter() {
                    let owner = table
                        .clone()
                        .or_else(|| metas.find_table_by_index(&index.name).map(|t| t.to_string()));
                    if let Some(owner) = owner {
                        let mut meta = metas.get(&owner).cloned().unwrap_or_default();
                        if meta.indexes.shift_remove(&index.name.to_ascii_lowercase()) {
                            metas.put(&owner, meta);
                            events.push(SchemaChangedEvent::IndexDropped {
                                table: owner,
                                index: index.name.clone(),
                            });
                        }
                    }
                }
            }
            _ => {}
        }

        events
    }
}

#[cfg(test)]
mod test {
    use crossbeam_channel::unbounded;

    use super::*;
    use crate::statement::{ColumnDefinition, IndexSegment, Span, TableSegment};

    #[test]
    fn test_refresh_publishes_events() {
        let (tx, rx) = unbounded();
        let holder = MetaDataHolder::new(TableMetas::new(), Some(tx));

        let create = StatementContext::new(StatementKind::Ddl(DdlKind::CreateTable))
            .with_table(TableSegment::new(Span::new(13, 19), "t_order"))
            .with_column_definitions(vec![ColumnDefinition {
                name: "order_id".to_string(),
                data_type: "BIGINT".to_string(),
                primary_key: true,
            }]);
        holder.refresh(&create);

        let index = StatementContext::new(StatementKind::Ddl(DdlKind::CreateIndex))
            .with_table(TableSegment::new(Span::new(30, 36), "t_order"))
            .with_index(IndexSegment::new(Span::new(13, 20), "idx_user"));
        holder.refresh(&index);

        let drop = StatementContext::new(StatementKind::Ddl(DdlKind::DropIndex))
            .with_index(IndexSegment::new(Span::new(11, 18), "idx_user"));

        assert_eq!(holder.snapshot().find_table_by_index("IDX_USER"), Some("t_order"));
        holder.refresh(&drop);

        assert_eq!(rx.try_recv().unwrap(), SchemaChangedEvent::TableCreated("t_order".to_string()));
        assert_eq!(
            rx.try_recv().unwrap(),
            SchemaChangedEvent::IndexCreated { table: "t_order".to_string(), index: "idx_user".to_string() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SchemaChangedEvent::IndexDropped { table: "t_order".to_string(), index: "idx_user".to_string() }
        );
        assert_eq!(holder.snapshot().column_names("t_order"), vec!["order_id"]);
        assert!(!holder.snapshot().contains_index("t_order", "idx_user"));
    }
}
