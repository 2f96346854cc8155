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


use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use lazy_static::lazy_static;

use crate::value::SqlValue;

lazy_static! {
    static ref QUOTE_MATCHER: AhoCorasick =
        AhoCorasickBuilder::new().build(&["`", "\"", "[", "]"]);
}

/// Strips every identifier quote character from `value`.
pub fn strip_quotes(value: &str) -> String {
    QUOTE_MATCHER.replace_all(value, &["", "", "", ""])
}

/// Inclusive byte interval into the original SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    start: usize,
    stop: usize,
}

impl Span {
    pub fn new(start: usize, stop: usize) -> Self {
        Span { start, stop }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn stop(&self) -> usize {
        self.stop
    }

    /// Exclusive end offset.
    pub fn end(&self) -> usize {
        self.stop + 1
    }

    pub fn len(&self) -> usize {
        self.stop + 1 - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteCharacter {
    None,
    BackQuote,
    Quote,
    Brackets,
}

impl Default for QuoteCharacter {
    fn default() -> Self {
        QuoteCharacter::None
    }
}

impl QuoteCharacter {
    pub fn wrap(&self, value: &str) -> String {
        match self {
            QuoteCharacter::None => value.to_string(),
            QuoteCharacter::BackQuote => format!("`{}`", value),
            QuoteCharacter::Quote => format!("\"{}\"", value),
            QuoteCharacter::Brackets => format!("[{}]", value),
        }
    }

    pub fn of(raw: &str) -> Self {
        match raw.chars().next() {
            Some('`') => QuoteCharacter::BackQuote,
            Some('"') => QuoteCharacter::Quote,
            Some('[') => QuoteCharacter::Brackets,
            _ => QuoteCharacter::None,
        }
    }
}

/// `db.` in `db.t_order`. The span covers the owner identifier only.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSegment {
    pub span: Span,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSegment {
    /// Span of the table identifier, quotes included.
    pub span: Span,
    pub name: String,
    pub quote: QuoteCharacter,
    pub owner: Option<OwnerSegment>,
    pub alias: Option<String>,
}

impl TableSegment {
    /// Builds a segment from raw text, which may carry quotes.
    pub fn new(span: Span, raw: &str) -> Self {
        TableSegment {
            span,
            name: strip_quotes(raw),
            quote: QuoteCharacter::of(raw),
            owner: None,
            alias: None,
        }
    }

    pub fn with_owner(mut self, span: Span, owner: &str) -> Self {
        self.owner = Some(OwnerSegment { span, name: strip_quotes(owner) });
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(strip_quotes(alias));
        self
    }

    /// Whether `name` references this table, by alias or by name.
    pub fn is_referenced_by(&self, name: &str) -> bool {
        self.alias.as_deref().map_or(false, |a| a.eq_ignore_ascii_case(name))
            || self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSegment {
    /// Span of the column identifier only. An owner prefix is not included.
    pub span: Span,
    pub name: String,
    pub quote: QuoteCharacter,
    pub owner: Option<String>,
}

impl ColumnSegment {
    pub fn new(span: Span, raw: &str) -> Self {
        ColumnSegment { span, name: strip_quotes(raw), quote: QuoteCharacter::of(raw), owner: None }
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(strip_quotes(owner));
        self
    }

    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}.{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Literal { span: Span, value: SqlValue },
    Parameter { span: Span, index: usize },
}

impl ExprValue {
    pub fn span(&self) -> Span {
        match self {
            ExprValue::Literal { span, .. } => *span,
            ExprValue::Parameter { span, .. } => *span,
        }
    }

    pub fn parameter_index(&self) -> Option<usize> {
        match self {
            ExprValue::Parameter { index, .. } => Some(*index),
            ExprValue::Literal { .. } => None,
        }
    }

    /// Resolves the value against bound parameters. `None` when the placeholder
    /// has no bound value.
    pub fn resolve(&self, params: &[SqlValue]) -> Option<SqlValue> {
        match self {
            ExprValue::Literal { value, .. } => Some(value.clone()),
            ExprValue::Parameter { index, .. } => params.get(*index).cloned(),
        }
    }

    /// Text of the value as it appears in rewritten SQL.
    pub fn to_sql(&self) -> String {
        match self {
            ExprValue::Literal { value, .. } => value.to_literal(),
            ExprValue::Parameter { .. } => "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateRight {
    Equal(ExprValue),
    In(Vec<ExprValue>),
    Between(ExprValue, ExprValue),
    Compare(CompareOperator, ExprValue),
}

impl PredicateRight {
    pub fn values(&self) -> Vec<&ExprValue> {
        match self {
            PredicateRight::Equal(v) | PredicateRight::Compare(_, v) => vec![v],
            PredicateRight::In(vs) => vs.iter().collect(),
            PredicateRight::Between(a, b) => vec![a, b],
        }
    }
}

/// `column <op> value` inside a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Span of the whole predicate.
    pub span: Span,
    pub column: ColumnSegment,
    pub right: PredicateRight,
}

/// A WHERE clause in disjunctive normal form: OR of AND groups.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereSegment {
    /// Span from the `WHERE` keyword to the end of the last predicate.
    pub span: Span,
    pub and_groups: Vec<Vec<Predicate>>,
}

impl WhereSegment {
    pub fn predicates(&self) -> impl Iterator<Item = &Predicate> {
        self.and_groups.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    /// Span of the parenthesised row, parentheses included.
    pub span: Span,
    pub values: Vec<ExprValue>,
}

impl InsertRow {
    pub fn parameter_indexes(&self) -> Vec<usize> {
        self.values.iter().filter_map(|v| v.parameter_index()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsertContext {
    pub columns: Vec<ColumnSegment>,
    pub rows: Vec<InsertRow>,
}

impl InsertContext {
    /// Span from the first row to the last one.
    pub fn values_span(&self) -> Option<Span> {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => Some(Span::new(first.span.start(), last.span.stop())),
            _ => None,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// `column = value` inside an UPDATE SET list.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub span: Span,
    pub column: ColumnSegment,
    pub value: ExprValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSegment {
    pub span: Span,
    pub name: String,
    pub quote: QuoteCharacter,
}

impl IndexSegment {
    pub fn new(span: Span, raw: &str) -> Self {
        IndexSegment { span, name: strip_quotes(raw), quote: QuoteCharacter::of(raw) }
    }
}

/// Column definition of CREATE TABLE / ALTER TABLE ADD.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
}
