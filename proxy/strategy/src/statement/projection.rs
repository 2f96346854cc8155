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


use super::segment::{ColumnSegment, Span};
use crate::rewrite_const::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregationType {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationType::Count => COUNT,
            AggregationType::Sum => SUM,
            AggregationType::Avg => AVG,
            AggregationType::Min => MIN,
            AggregationType::Max => MAX,
        }
    }
}

/// A column named by `SELECT *` once the binder expanded it against metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ShorthandColumn {
    pub owner: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Column { span: Span, column: ColumnSegment, alias: Option<String> },
    /// `*` or `t.*`. `actual_columns` is empty when the binder could not expand it.
    Shorthand { span: Span, owner: Option<String>, actual_columns: Vec<ShorthandColumn> },
    Aggregation {
        span: Span,
        kind: AggregationType,
        distinct: bool,
        /// Argument text, `*` for `COUNT(*)`.
        argument: String,
        alias: Option<String>,
    },
    Expression { span: Span, text: String, alias: Option<String> },
}

impl Projection {
    pub fn column(span: Span, column: ColumnSegment) -> Self {
        Projection::Column { span, column, alias: None }
    }

    pub fn aggregation(span: Span, kind: AggregationType, argument: &str) -> Self {
        Projection::Aggregation {
            span,
            kind,
            distinct: false,
            argument: argument.to_string(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, name: &str) -> Self {
        match &mut self {
            Projection::Column { alias, .. }
            | Projection::Aggregation { alias, .. }
            | Projection::Expression { alias, .. } => *alias = Some(name.to_string()),
            Projection::Shorthand { .. } => {}
        }
        self
    }

    pub fn span(&self) -> Span {
        match self {
            Projection::Column { span, .. }
            | Projection::Shorthand { span, .. }
            | Projection::Aggregation { span, .. }
            | Projection::Expression { span, .. } => *span,
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            Projection::Column { alias, .. }
            | Projection::Aggregation { alias, .. }
            | Projection::Expression { alias, .. } => alias.as_deref(),
            Projection::Shorthand { .. } => None,
        }
    }

    /// Column label the database reports for this projection. `None` for shorthands.
    pub fn label(&self) -> Option<String> {
        if let Some(alias) = self.alias() {
            return Some(alias.to_string());
        }

        match self {
            Projection::Column { column, .. } => Some(column.name.clone()),
            Projection::Aggregation { kind, distinct, argument, .. } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                Some(format!("{}({}{})", kind.name(), distinct, argument))
            }
            Projection::Expression { text, .. } => Some(text.clone()),
            Projection::Shorthand { .. } => None,
        }
    }

    /// Number of result columns the projection expands into.
    pub fn width(&self) -> usize {
        match self {
            Projection::Shorthand { actual_columns, .. } => actual_columns.len().max(1),
            _ => 1,
        }
    }

    fn contains_column(&self, target: &ColumnSegment) -> bool {
        let owner_matches = |owner: Option<&str>| match (owner, target.owner.as_deref()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        };

        match self {
            Projection::Column { column, alias, .. } => {
                (column.name.eq_ignore_ascii_case(&target.name)
                    && owner_matches(column.owner.as_deref()))
                    || alias.as_deref().map_or(false, |a| a.eq_ignore_ascii_case(&target.name))
            }
            Projection::Shorthand { owner, actual_columns, .. } => {
                if !owner_matches(owner.as_deref()) {
                    return false;
                }
                actual_columns.is_empty()
                    || actual_columns.iter().any(|c| c.name.eq_ignore_ascii_case(&target.name))
            }
            Projection::Aggregation { alias, .. } | Projection::Expression { alias, .. } => {
                alias.as_deref().map_or(false, |a| a.eq_ignore_ascii_case(&target.name))
            }
        }
    }

    fn matches_expression(&self, expression: &str) -> bool {
        match self {
            Projection::Expression { text, alias, .. } => {
                text.eq_ignore_ascii_case(expression)
                    || alias.as_deref().map_or(false, |a| a.eq_ignore_ascii_case(expression))
            }
            Projection::Aggregation { alias, .. } | Projection::Column { alias, .. } => {
                alias.as_deref().map_or(false, |a| a.eq_ignore_ascii_case(expression))
                    || self.label().map_or(false, |l| l.eq_ignore_ascii_case(expression))
            }
            Projection::Shorthand { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrder {
    First,
    Last,
}

impl NullOrder {
    /// Nulls sort as the lowest value unless the statement says otherwise.
    pub fn default_for(direction: OrderDirection) -> Self {
        match direction {
            OrderDirection::Asc => NullOrder::First,
            OrderDirection::Desc => NullOrder::Last,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderByTarget {
    Column(ColumnSegment),
    /// 1-based select list position, `ORDER BY 2`.
    Index(usize),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub target: OrderByTarget,
    pub direction: OrderDirection,
    pub null_order: NullOrder,
}

impl OrderByItem {
    pub fn new(target: OrderByTarget, direction: OrderDirection) -> Self {
        OrderByItem { target, direction, null_order: NullOrder::default_for(direction) }
    }

    pub fn column(column: ColumnSegment, direction: OrderDirection) -> Self {
        Self::new(OrderByTarget::Column(column), direction)
    }

    /// SQL text of the item without direction.
    pub fn target_sql(&self) -> String {
        match &self.target {
            OrderByTarget::Column(column) => match &column.owner {
                Some(owner) => format!("{}.{}", owner, column.quote.wrap(&column.name)),
                None => column.quote.wrap(&column.name),
            },
            OrderByTarget::Index(index) => index.to_string(),
            OrderByTarget::Expression(text) => text.clone(),
        }
    }

    fn same_target(&self, other: &OrderByItem) -> bool {
        match (&self.target, &other.target) {
            (OrderByTarget::Column(a), OrderByTarget::Column(b)) => {
                a.name.eq_ignore_ascii_case(&b.name)
                    && match (&a.owner, &b.owner) {
                        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
                        _ => true,
                    }
            }
            (OrderByTarget::Index(a), OrderByTarget::Index(b)) => a == b,
            (OrderByTarget::Expression(a), OrderByTarget::Expression(b)) => {
                a.eq_ignore_ascii_case(b)
            }
            _ => false,
        }
    }
}

/// An ORDER BY or GROUP BY clause.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderByContext {
    /// Span from the keyword to the last item.
    pub span: Option<Span>,
    pub items: Vec<OrderByItem>,
}

impl OrderByContext {
    pub fn new(span: Span, items: Vec<OrderByItem>) -> Self {
        OrderByContext { span: Some(span), items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Same items in the same order, directions included.
    pub fn same_items(&self, other: &OrderByContext) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|(a, b)| a.same_target(b) && a.direction == b.direction)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionsContext {
    /// Span from the first projection to the last one.
    pub span: Span,
    pub distinct_row: bool,
    pub projections: Vec<Projection>,
}

impl ProjectionsContext {
    pub fn new(span: Span, projections: Vec<Projection>) -> Self {
        ProjectionsContext { span, distinct_row: false, projections }
    }

    pub fn aggregations(&self) -> impl Iterator<Item = (usize, &Projection)> {
        self.projections
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p, Projection::Aggregation { .. }))
    }

    pub fn has_aggregation(&self) -> bool {
        self.aggregations().next().is_some()
    }

    /// Result column position of projection `index`, counting shorthand expansion.
    pub fn column_position(&self, index: usize) -> usize {
        self.projections.iter().take(index).map(|p| p.width()).sum()
    }

    /// Number of result columns before derived projections.
    pub fn column_count(&self) -> usize {
        self.projections.iter().map(|p| p.width()).sum()
    }

    /// Projection that satisfies the ORDER BY / GROUP BY item, if any.
    pub fn find_projection(&self, item: &OrderByItem) -> Option<usize> {
        match &item.target {
            OrderByTarget::Column(column) => {
                self.projections.iter().position(|p| p.contains_column(column))
            }
            OrderByTarget::Index(index) => index.checked_sub(1),
            OrderByTarget::Expression(text) => {
                self.projections.iter().position(|p| p.matches_expression(text))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    OrderBy,
    GroupBy,
    AvgCount,
    AvgSum,
}

/// A projection appended to the select list so that merging can see a value
/// the logical statement does not return.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedProjection {
    pub kind: DerivedKind,
    pub expression: String,
    pub alias: String,
    /// The AVG projection index for AVG derived columns.
    pub source: Option<usize>,
}

impl DerivedProjection {
    pub fn to_sql(&self) -> String {
        format!("{} {} {}", self.expression, AS, self.alias)
    }
}

/// Derived projections in rendering order: ORDER BY items, GROUP BY items, then
/// the COUNT/SUM pair of every AVG.
pub fn derive_projections(
    projections: &ProjectionsContext,
    group_by: &OrderByContext,
    order_by: &OrderByContext,
) -> Vec<DerivedProjection> {
    let mut derived = Vec::new();

    let mut order_idx = 0;
    for item in order_by.items.iter() {
        if matches!(item.target, OrderByTarget::Index(_)) {
            continue;
        }
        if projections.find_projection(item).is_none() {
            derived.push(DerivedProjection {
                kind: DerivedKind::OrderBy,
                expression: item.target_sql(),
                alias: format!("{}_{}", ORDER_BY_DERIVED, order_idx),
                source: None,
            });
            order_idx += 1;
        }
    }

    let mut group_idx = 0;
    for item in group_by.items.iter() {
        if matches!(item.target, OrderByTarget::Index(_)) {
            continue;
        }
        let derived_by_order = order_by
            .items
            .iter()
            .any(|o| o.same_target(item) && projections.find_projection(o).is_none());
        if projections.find_projection(item).is_none() && !derived_by_order {
            derived.push(DerivedProjection {
                kind: DerivedKind::GroupBy,
                expression: item.target_sql(),
                alias: format!("{}_{}", GROUP_BY_DERIVED, group_idx),
                source: None,
            });
            group_idx += 1;
        }
    }

    let avgs = projections
        .aggregations()
        .filter(|(_, p)| matches!(p, Projection::Aggregation { kind: AggregationType::Avg, .. }));
    for (avg_idx, (idx, projection)) in avgs.enumerate() {
        if let Projection::Aggregation { distinct, argument, .. } = projection {
            let argument =
                if *distinct { format!("DISTINCT {}", argument) } else { argument.clone() };
            derived.push(DerivedProjection {
                kind: DerivedKind::AvgCount,
                expression: format!("{}({})", COUNT, argument),
                alias: format!("{}_{}", AVG_DERIVED_COUNT, avg_idx),
                source: Some(idx),
            });
            derived.push(DerivedProjection {
                kind: DerivedKind::AvgSum,
                expression: format!("{}({})", SUM, argument),
                alias: format!("{}_{}", AVG_DERIVED_SUM, avg_idx),
                source: Some(idx),
            });
        }
    }

    derived
}

#[cfg(test)]
mod test {
    use super::*;

    fn col(start: usize, name: &str) -> ColumnSegment {
        ColumnSegment::new(Span::new(start, start + name.len() - 1), name)
    }

    #[test]
    fn test_derive_order_by_and_avg() {
        // SELECT order_id, AVG(price) FROM t_order GROUP BY order_id ORDER BY user_id
        let projections = ProjectionsContext::new(
            Span::new(7, 30),
            vec![
                Projection::column(Span::new(7, 14), col(7, "order_id")),
                Projection::aggregation(Span::new(17, 26), AggregationType::Avg, "price"),
            ],
        );
        let group_by = OrderByContext::new(
            Span::new(45, 61),
            vec![OrderByItem::column(col(54, "order_id"), OrderDirection::Asc)],
        );
        let order_by = OrderByContext::new(
            Span::new(63, 78),
            vec![OrderByItem::column(col(72, "user_id"), OrderDirection::Asc)],
        );

        let derived = derive_projections(&projections, &group_by, &order_by);
        let sql = derived.iter().map(|d| d.to_sql()).collect::<Vec<_>>();
        assert_eq!(
            sql,
            vec![
                "user_id AS ORDER_BY_DERIVED_0",
                "COUNT(price) AS AVG_DERIVED_COUNT_0",
                "SUM(price) AS AVG_DERIVED_SUM_0",
            ]
        );
        assert_eq!(derived[1].source, Some(1));
    }

    #[test]
    fn test_shorthand_covers_order_by() {
        let projections = ProjectionsContext::new(
            Span::new(7, 7),
            vec![Projection::Shorthand {
                span: Span::new(7, 7),
                owner: None,
                actual_columns: vec![],
            }],
        );
        let order_by = OrderByContext::new(
            Span::new(23, 39),
            vec![OrderByItem::column(col(32, "order_id"), OrderDirection::Desc)],
        );
        assert!(derive_projections(&projections, &OrderByContext::default(), &order_by).is_empty());
    }
}
