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


//! The bound statement the kernel consumes. Parsing and binding happen outside
//! this crate; everything here is plain data with spans into the original SQL.

#[cfg(test)]
pub(crate) mod fixture;
mod pagination;
mod projection;
mod segment;

use serde::{Deserialize, Serialize};

pub use self::{pagination::*, projection::*, segment::*};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlKind {
    CreateTable,
    AlterTable,
    DropTable,
    TruncateTable,
    CreateIndex,
    DropIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DalKind {
    Show,
    Describe,
    Use,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl(DdlKind),
    Dal(DalKind),
    Tcl,
}

impl StatementKind {
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    Limit,
    RowNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    MySQL,
    PostgreSQL,
    H2,
    Oracle,
    SQLServer,
}

impl Default for DatabaseType {
    fn default() -> Self {
        DatabaseType::MySQL
    }
}

impl DatabaseType {
    pub fn pagination_style(&self) -> PaginationStyle {
        match self {
            DatabaseType::MySQL | DatabaseType::PostgreSQL | DatabaseType::H2 => {
                PaginationStyle::Limit
            }
            DatabaseType::Oracle | DatabaseType::SQLServer => PaginationStyle::RowNumber,
        }
    }

    pub fn quote_character(&self) -> QuoteCharacter {
        match self {
            DatabaseType::MySQL => QuoteCharacter::BackQuote,
            DatabaseType::SQLServer => QuoteCharacter::Brackets,
            DatabaseType::PostgreSQL | DatabaseType::H2 | DatabaseType::Oracle => {
                QuoteCharacter::Quote
            }
        }
    }

    /// Row count that lets a shard return every row.
    pub fn max_row_count(&self) -> u64 {
        i32::MAX as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementContext {
    pub kind: StatementKind,
    pub database_type: DatabaseType,
    pub tables: Vec<TableSegment>,
    pub projections: Option<ProjectionsContext>,
    pub where_segment: Option<WhereSegment>,
    pub group_by: OrderByContext,
    pub order_by: OrderByContext,
    pub pagination: PaginationContext,
    pub insert: Option<InsertContext>,
    pub assignments: Vec<Assignment>,
    pub indexes: Vec<IndexSegment>,
    pub column_definitions: Vec<ColumnDefinition>,
}

impl StatementContext {
    pub fn new(kind: StatementKind) -> Self {
        StatementContext {
            kind,
            database_type: DatabaseType::default(),
            tables: vec![],
            projections: None,
            where_segment: None,
            group_by: OrderByContext::default(),
            order_by: OrderByContext::default(),
            pagination: PaginationContext::default(),
            insert: None,
            assignments: vec![],
            indexes: vec![],
            column_definitions: vec![],
        }
    }

    pub fn with_database_type(mut self, database_type: DatabaseType) -> Self {
        self.database_type = database_type;
        self
    }

    pub fn with_table(mut self, table: TableSegment) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_projections(mut self, projections: ProjectionsContext) -> Self {
        self.projections = Some(projections);
        self
    }

    pub fn with_where(mut self, where_segment: WhereSegment) -> Self {
        self.where_segment = Some(where_segment);
        self
    }

    pub fn with_group_by(mut self, group_by: OrderByContext) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_order_by(mut self, order_by: OrderByContext) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationContext) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_insert(mut self, insert: InsertContext) -> Self {
        self.insert = Some(insert);
        self
    }

    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self
    }

    pub fn with_index(mut self, index: IndexSegment) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_column_definitions(mut self, definitions: Vec<ColumnDefinition>) -> Self {
        self.column_definitions = definitions;
        self
    }

    pub fn is_select(&self) -> bool {
        self.kind == StatementKind::Select
    }

    pub fn is_insert(&self) -> bool {
        self.kind == StatementKind::Insert
    }

    /// Distinct logical table names in reference order.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.tables.len());
        for table in self.tables.iter() {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&table.name)) {
                names.push(table.name.clone());
            }
        }
        names
    }

    /// Table named by a column owner, or the only table when there is no owner.
    pub fn find_table(&self, owner: Option<&str>) -> Option<&TableSegment> {
        match owner {
            Some(owner) => self.tables.iter().find(|t| t.is_referenced_by(owner)),
            None if self.table_names().len() == 1 => self.tables.first(),
            None => None,
        }
    }

    pub fn is_distinct_row(&self) -> bool {
        self.projections.as_ref().map_or(false, |p| p.distinct_row)
    }

    pub fn has_aggregation(&self) -> bool {
        self.projections.as_ref().map_or(false, |p| p.has_aggregation())
    }

    /// Whether GROUP BY results can only be merged after loading every row.
    pub fn is_memory_group_by(&self) -> bool {
        if !self.is_select() {
            return false;
        }
        if self.is_distinct_row() && self.group_by.is_empty() {
            return true;
        }
        !self.group_by.is_empty()
            && !self.order_by.is_empty()
            && !self.group_by.same_items(&self.order_by)
    }

    /// ORDER BY the shards apply, including the one generated from GROUP BY.
    pub fn effective_order_by(&self) -> &OrderByContext {
        if self.order_by.is_empty() {
            &self.group_by
        } else {
            &self.order_by
        }
    }

    pub fn derived_projections(&self) -> Vec<DerivedProjection> {
        match (&self.projections, self.is_select()) {
            (Some(projections), true) => {
                derive_projections(projections, &self.group_by, &self.order_by)
            }
            _ => vec![],
        }
    }
}
