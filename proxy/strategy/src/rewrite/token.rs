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


use itertools::Itertools;

use crate::{
    rewrite_const::{AS, ORDER_BY},
    route::RouteUnit,
    sharding::DataNode,
    statement::{ExprValue, QuoteCharacter, Span},
    value::SqlValue,
};

/// Whether a row routed to `data_nodes` belongs to `unit`. Rows without
/// routing information go everywhere.
pub fn is_routed_to(unit: Option<&RouteUnit>, logic_table: Option<&str>, data_nodes: &[DataNode]) -> bool {
    match (unit, logic_table) {
        (Some(unit), Some(logic_table)) if !data_nodes.is_empty() => {
            data_nodes.iter().any(|n| unit.contains_node(logic_table, n))
        }
        _ => true,
    }
}

/// A value rendered into generated SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Literal(SqlValue),
    Parameter,
    Removed,
}

impl TokenValue {
    pub fn to_sql(&self) -> Option<String> {
        match self {
            TokenValue::Literal(v) => Some(v.to_literal()),
            TokenValue::Parameter => Some("?".to_string()),
            TokenValue::Removed => None,
        }
    }
}

impl From<&ExprValue> for TokenValue {
    fn from(value: &ExprValue) -> Self {
        match value {
            ExprValue::Literal { value, .. } => TokenValue::Literal(value.clone()),
            ExprValue::Parameter { .. } => TokenValue::Parameter,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveToken {
    pub start: usize,
    /// Exclusive.
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableToken {
    pub span: Span,
    pub logic_table: String,
    pub quote: QuoteCharacter,
}

impl TableToken {
    fn render(&self, unit: Option<&RouteUnit>) -> String {
        let actual = unit.and_then(|u| u.actual_table(&self.logic_table)).unwrap_or(&self.logic_table);
        self.quote.wrap(actual)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexToken {
    pub span: Span,
    pub index: String,
    pub quote: QuoteCharacter,
    pub logic_table: Option<String>,
}

impl IndexToken {
    fn render(&self, unit: Option<&RouteUnit>) -> String {
        let actual = unit.and_then(|u| {
            self.logic_table
                .as_deref()
                .and_then(|t| u.actual_table(t))
                .or_else(|| u.table_mappers.first().map(|m| m.actual_name.as_str()))
        });
        match actual {
            Some(actual) => self.quote.wrap(&format!("{}_{}", self.index, actual)),
            None => self.quote.wrap(&self.index),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaginationToken {
    pub span: Span,
    pub revised: u64,
}

/// Text appended to the select list, the GROUP BY clause or the insert column list.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendToken {
    pub position: usize,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstituteToken {
    pub span: Span,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralValueToken {
    pub span: Span,
    pub value: SqlValue,
}

/// `column = value` list replacing one assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentToken {
    pub span: Span,
    pub assignments: Vec<(String, TokenValue)>,
}

impl AssignmentToken {
    fn render(&self) -> String {
        self.assignments
            .iter()
            .filter_map(|(column, value)| value.to_sql().map(|v| format!("{} = {}", column, v)))
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertValueRow {
    pub items: Vec<TokenValue>,
    pub data_nodes: Vec<DataNode>,
}

impl InsertValueRow {
    fn render(&self) -> String {
        format!("({})", self.items.iter().filter_map(|v| v.to_sql()).join(", "))
    }
}

/// Every row of an INSERT. Rows render only into the units they were routed to.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertValuesToken {
    pub span: Span,
    /// Sharded logical table, when rows are routed.
    pub logic_table: Option<String>,
    pub rows: Vec<InsertValueRow>,
}

impl InsertValuesToken {
    fn render(&self, unit: Option<&RouteUnit>) -> String {
        self.rows
            .iter()
            .filter(|row| is_routed_to(unit, self.logic_table.as_deref(), &row.data_nodes))
            .map(|row| row.render())
            .join(", ")
    }
}

/// A rewrite of one interval of the original SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlToken {
    Remove(RemoveToken),
    Table(TableToken),
    Index(IndexToken),
    Offset(PaginationToken),
    RowCount(PaginationToken),
    Projections(AppendToken),
    OrderBy(AppendToken),
    SubstitutableColumnName(SubstituteToken),
    LiteralValue(LiteralValueToken),
    Assignment(AssignmentToken),
    InsertColumns(AppendToken),
    InsertValues(InsertValuesToken),
}

impl SqlToken {
    /// `[start, end)` in the original SQL. Insertions are empty intervals.
    pub fn range(&self) -> (usize, usize) {
        match self {
            SqlToken::Remove(t) => (t.start, t.end),
            SqlToken::Table(TableToken { span, .. })
            | SqlToken::Index(IndexToken { span, .. })
            | SqlToken::Offset(PaginationToken { span, .. })
            | SqlToken::RowCount(PaginationToken { span, .. })
            | SqlToken::SubstitutableColumnName(SubstituteToken { span, .. })
            | SqlToken::LiteralValue(LiteralValueToken { span, .. })
            | SqlToken::Assignment(AssignmentToken { span, .. })
            | SqlToken::InsertValues(InsertValuesToken { span, .. }) => (span.start(), span.end()),
            SqlToken::Projections(t) | SqlToken::OrderBy(t) | SqlToken::InsertColumns(t) => {
                (t.position, t.position)
            }
        }
    }

    /// Text replacing the interval. Route-aware tokens render per unit and
    /// fall back to logical names without one.
    pub fn render(&self, unit: Option<&RouteUnit>) -> String {
        match self {
            SqlToken::Remove(_) => String::new(),
            SqlToken::Table(t) => t.render(unit),
            SqlToken::Index(t) => t.render(unit),
            SqlToken::Offset(t) | SqlToken::RowCount(t) => t.revised.to_string(),
            SqlToken::Projections(t) | SqlToken::InsertColumns(t) => {
                t.items.iter().map(|i| format!(", {}", i)).collect()
            }
            SqlToken::OrderBy(t) => format!(" {} {}", ORDER_BY, t.items.join(", ")),
            SqlToken::SubstitutableColumnName(t) => t.text.clone(),
            SqlToken::LiteralValue(t) => t.value.to_literal(),
            SqlToken::Assignment(t) => t.render(),
            SqlToken::InsertValues(t) => t.render(unit),
        }
    }
}

/// `cipher AS logic`.
pub fn aliased(column: &str, alias: &str) -> String {
    format!("{} {} {}", column, AS, alias)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::route::RouteMapper;

    fn unit(ds: &str, mappers: &[(&str, &str)]) -> RouteUnit {
        RouteUnit::new(
            RouteMapper::new(ds, ds),
            mappers.iter().map(|(l, a)| RouteMapper::new(l, a)).collect(),
        )
    }

    #[test]
    fn test_route_aware_tokens() {
        let unit = unit("ds1", &[("t_order", "t_order_1")]);

        let table = SqlToken::Table(TableToken {
            span: Span::new(14, 22),
            logic_table: "t_order".to_string(),
            quote: QuoteCharacter::BackQuote,
        });
        assert_eq!(table.render(Some(&unit)), "`t_order_1`");
        assert_eq!(table.render(None), "`t_order`");
        assert_eq!(table.range(), (14, 23));

        let index = SqlToken::Index(IndexToken {
            span: Span::new(13, 22),
            index: "idx_status".to_string(),
            quote: QuoteCharacter::None,
            logic_table: None,
        });
        assert_eq!(index.render(Some(&unit)), "idx_status_t_order_1");
    }

    #[test]
    fn test_insert_values_split_by_unit() {
        let token = SqlToken::InsertValues(InsertValuesToken {
            span: Span::new(50, 64),
            logic_table: Some("t_order".to_string()),
            rows: vec![
                InsertValueRow {
                    items: vec![TokenValue::Literal(SqlValue::Int(1)), TokenValue::Parameter],
                    data_nodes: vec![DataNode::new("ds1", "t_order_1")],
                },
                InsertValueRow {
                    items: vec![TokenValue::Literal(SqlValue::Int(2)), TokenValue::Removed],
                    data_nodes: vec![DataNode::new("ds0", "t_order_0")],
                },
            ],
        });

        assert_eq!(token.render(Some(&unit("ds1", &[("t_order", "t_order_1")]))), "(1, ?)");
        assert_eq!(token.render(Some(&unit("ds0", &[("t_order", "t_order_0")]))), "(2)");
        assert_eq!(token.render(None), "(1, ?), (2)");
    }

    #[test]
    fn test_append_tokens() {
        let projections = SqlToken::Projections(AppendToken {
            position: 20,
            items: vec!["COUNT(price) AS AVG_DERIVED_COUNT_0".to_string()],
        });
        assert_eq!(projections.render(None), ", COUNT(price) AS AVG_DERIVED_COUNT_0");
        assert_eq!(projections.range(), (20, 20));

        let order_by = SqlToken::OrderBy(AppendToken {
            position: 40,
            items: vec!["user_id ASC".to_string()],
        });
        assert_eq!(order_by.render(None), " ORDER BY user_id ASC");
    }
}
