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


//! Builds statement contexts from SQL text for tests, standing in for the binder.

use super::*;
use crate::value::SqlValue;

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '`'
}

/// Span of the `n`th occurrence of `needle` not embedded in a longer identifier.
pub fn nth_span(sql: &str, needle: &str, n: usize) -> Span {
    let mut from = 0;
    let mut seen = 0;
    while let Some(pos) = sql[from..].find(needle).map(|p| p + from) {
        let end = pos + needle.len();
        let before = sql[..pos].chars().last().map_or(false, is_ident);
        let after = sql[end..].chars().next().map_or(false, is_ident);
        let word_like = needle.chars().next().map_or(false, is_ident);
        if !word_like || (!before && !after) {
            if seen == n {
                return Span::new(pos, end - 1);
            }
            seen += 1;
        }
        from = pos + 1;
    }
    panic!("{:?} not found in {:?}", needle, sql);
}

pub fn span_of(sql: &str, needle: &str) -> Span {
    nth_span(sql, needle, 0)
}

fn text(sql: &str, span: Span) -> &str {
    &sql[span.start()..span.end()]
}

/// Value at `start`, `?` becomes the parameter with the matching position.
pub fn value_at(sql: &str, start: usize, raw: &str) -> ExprValue {
    let raw = raw.trim();
    let span = Span::new(start, start + raw.len() - 1);
    if raw == "?" {
        let index = sql[..start].matches('?').count();
        return ExprValue::Parameter { span, index };
    }
    let value = if raw.starts_with('\'') {
        SqlValue::Str(raw.trim_matches('\'').to_string())
    } else if let Ok(v) = raw.parse::<i64>() {
        SqlValue::Int(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        SqlValue::Float(v)
    } else if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
        SqlValue::Bool(raw.eq_ignore_ascii_case("true"))
    } else {
        SqlValue::Str(raw.to_string())
    };
    ExprValue::Literal { span, value }
}

/// Column at `start`, `o.order_id` keeps `o` as owner.
pub fn column_at(start: usize, raw: &str) -> ColumnSegment {
    match raw.split_once('.') {
        Some((owner, name)) => {
            let name_start = start + owner.len() + 1;
            ColumnSegment::new(Span::new(name_start, name_start + name.len() - 1), name)
                .with_owner(owner)
        }
        None => ColumnSegment::new(Span::new(start, start + raw.len() - 1), raw),
    }
}

/// First table segment named `raw`, with owner and alias when written as
/// `db.t alias` / `db.t AS alias`.
pub fn table(sql: &str, raw: &str) -> TableSegment {
    nth_table(sql, raw, 0)
}

pub fn nth_table(sql: &str, raw: &str, n: usize) -> TableSegment {
    let span = nth_span(sql, raw, n);
    let mut segment = TableSegment::new(span, raw);
    let before = &sql[..span.start()];
    if before.ends_with('.') {
        let owner_start = before[..before.len() - 1]
            .rfind(|c: char| !is_ident(c))
            .map_or(0, |p| p + 1);
        let owner = &before[owner_start..before.len() - 1];
        segment = segment.with_owner(Span::new(owner_start, before.len() - 2), owner);
    }
    let mut rest = sql[span.end()..].split_whitespace();
    let keywords = ["WHERE", "JOIN", "ON", "SET", "ORDER", "GROUP", "LIMIT", "VALUES", "INNER", "LEFT"];
    match rest.next() {
        Some(w) if w.eq_ignore_ascii_case("AS") => {
            if let Some(alias) = rest.next() {
                segment = segment.with_alias(alias.trim_end_matches(','));
            }
        }
        Some(w) if !keywords.iter().any(|k| k.eq_ignore_ascii_case(w)) && w.starts_with(is_ident) => {
            segment = segment.with_alias(w.trim_end_matches(','));
        }
        _ => {}
    }
    segment
}

/// Predicate written exactly as `text` in `sql`, e.g. `order_id IN (1, ?)`.
pub fn pred(sql: &str, text_: &str) -> Predicate {
    let span = span_of(sql, text_);
    let start = span.start();
    let (column_raw, rest) = text_.split_once(' ').unwrap();
    let column = column_at(start, column_raw);
    let rest_start = start + column_raw.len() + 1;

    let (op, operand) = rest.split_once(' ').unwrap();
    let operand_start = rest_start + op.len() + 1;

    let right = match op.to_ascii_uppercase().as_str() {
        "=" => PredicateRight::Equal(value_at(sql, operand_start, operand)),
        "IN" => {
            let inner_start = operand_start + 1;
            let inner = &operand[1..operand.len() - 1];
            let mut values = vec![];
            let mut offset = 0;
            for item in inner.split(',') {
                let lead = item.len() - item.trim_start().len();
                values.push(value_at(sql, inner_start + offset + lead, item));
                offset += item.len() + 1;
            }
            PredicateRight::In(values)
        }
        "BETWEEN" => {
            let (lo, hi) = operand.split_once(" AND ").unwrap();
            PredicateRight::Between(
                value_at(sql, operand_start, lo),
                value_at(sql, operand_start + lo.len() + 5, hi),
            )
        }
        other => {
            let op = match other {
                ">" => CompareOperator::Gt,
                ">=" => CompareOperator::Ge,
                "<" => CompareOperator::Lt,
                "<=" => CompareOperator::Le,
                _ => panic!("unsupported operator {}", other),
            };
            PredicateRight::Compare(op, value_at(sql, operand_start, operand))
        }
    };

    Predicate { span, column, right }
}

/// WHERE clause from OR groups of AND predicates.
pub fn where_of(sql: &str, groups: Vec<Vec<&str>>) -> WhereSegment {
    let and_groups = groups
        .into_iter()
        .map(|g| g.into_iter().map(|p| pred(sql, p)).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    let start = span_of(sql, "WHERE").start();
    let stop = and_groups.iter().flatten().map(|p| p.span.stop()).max().unwrap();
    WhereSegment { span: Span::new(start, stop), and_groups }
}

fn projection_at(start: usize, raw: &str) -> Projection {
    let span = Span::new(start, start + raw.len() - 1);
    let (body, alias) = match raw.find(" AS ") {
        Some(p) => (&raw[..p], Some(&raw[p + 4..])),
        None => (raw, None),
    };

    let projection = if body == "*" || body.ends_with(".*") {
        Projection::Shorthand {
            span,
            owner: body.strip_suffix(".*").map(|o| o.to_string()),
            actual_columns: vec![],
        }
    } else if let Some(open) = body.find('(') {
        let func = body[..open].to_ascii_uppercase();
        let mut argument = &body[open + 1..body.len() - 1];
        let distinct = argument.starts_with("DISTINCT ");
        if distinct {
            argument = &argument[9..];
        }
        let kind = match func.as_str() {
            "COUNT" => Some(AggregationType::Count),
            "SUM" => Some(AggregationType::Sum),
            "AVG" => Some(AggregationType::Avg),
            "MIN" => Some(AggregationType::Min),
            "MAX" => Some(AggregationType::Max),
            _ => None,
        };
        match kind {
            Some(kind) => Projection::Aggregation {
                span,
                kind,
                distinct,
                argument: argument.to_string(),
                alias: None,
            },
            None => Projection::Expression { span, text: body.to_string(), alias: None },
        }
    } else {
        Projection::column(span, column_at(start, body))
    };

    match alias {
        Some(alias) => projection.with_alias(alias),
        None => projection,
    }
}

/// Select list written as `items` joined by `, ` right after `SELECT `.
pub fn projections(sql: &str, items: &[&str]) -> ProjectionsContext {
    let mut pos = span_of(sql, "SELECT").end() + 1;
    let distinct = sql[pos..].starts_with("DISTINCT ");
    if distinct {
        pos += 9;
    }
    let start = pos;
    let mut list = vec![];
    for item in items {
        assert_eq!(&sql[pos..pos + item.len()], *item);
        list.push(projection_at(pos, item));
        pos += item.len() + 2;
    }
    let mut ctx = ProjectionsContext::new(Span::new(start, pos - 3), list);
    ctx.distinct_row = distinct;
    ctx
}

fn order_items(sql: &str, keyword: &str, items: &[&str]) -> OrderByContext {
    let kw = span_of(sql, keyword);
    let mut pos = kw.end() + 1;
    let mut list = vec![];
    for item in items {
        assert_eq!(&sql[pos..pos + item.len()], *item);
        let (target, direction) = match item.rsplit_once(' ') {
            Some((t, d)) if d.eq_ignore_ascii_case("DESC") => (t, OrderDirection::Desc),
            Some((t, d)) if d.eq_ignore_ascii_case("ASC") => (t, OrderDirection::Asc),
            _ => (*item, OrderDirection::Asc),
        };
        let target = match target.parse::<usize>() {
            Ok(idx) => OrderByTarget::Index(idx),
            Err(_) if target.contains('(') => OrderByTarget::Expression(target.to_string()),
            Err(_) => OrderByTarget::Column(column_at(pos, target)),
        };
        list.push(OrderByItem::new(target, direction));
        pos += item.len() + 2;
    }
    OrderByContext::new(Span::new(kw.start(), pos - 3), list)
}

pub fn order_by(sql: &str, items: &[&str]) -> OrderByContext {
    order_items(sql, "ORDER BY", items)
}

pub fn group_by(sql: &str, items: &[&str]) -> OrderByContext {
    order_items(sql, "GROUP BY", items)
}

/// `LIMIT n`, `LIMIT o, n` or `LIMIT n OFFSET o`.
pub fn limit(sql: &str) -> PaginationContext {
    let kw = span_of(sql, "LIMIT");
    let start = kw.end() + 1;
    let rest = &sql[start..];
    let value = |offset: usize, raw: &str| -> PaginationValue {
        match value_at(sql, start + offset, raw) {
            ExprValue::Parameter { span, index } => PaginationValue::parameter(span, index),
            ExprValue::Literal { span, value } => {
                PaginationValue::literal(span, value.as_u64().unwrap())
            }
        }
    };

    let first_end = rest.find(|c: char| c == ',' || c == ' ').unwrap_or(rest.len());
    let first = &rest[..first_end];
    if rest[first_end..].starts_with(", ") {
        let second_start = first_end + 2;
        let second_end = rest[second_start..].find(' ').map_or(rest.len(), |p| p + second_start);
        let second = &rest[second_start..second_end];
        PaginationContext::new(Some(value(0, first)), Some(value(second_start, second)))
    } else if rest[first_end..].starts_with(" OFFSET ") {
        let second_start = first_end + 8;
        let second_end = rest[second_start..].find(' ').map_or(rest.len(), |p| p + second_start);
        let second = &rest[second_start..second_end];
        PaginationContext::new(Some(value(second_start, second)), Some(value(0, first)))
    } else {
        PaginationContext::new(None, Some(value(0, first)))
    }
}

/// INSERT column list and rows, read from `(cols) VALUES (..), (..)`.
pub fn insert_of(sql: &str) -> InsertContext {
    let values_kw = span_of(sql, "VALUES");
    let mut ctx = InsertContext::default();

    if let Some(open) = sql[..values_kw.start()].find('(') {
        let close = sql[..values_kw.start()].rfind(')').unwrap();
        let mut pos = open + 1;
        for raw in sql[open + 1..close].split(',') {
            let lead = raw.len() - raw.trim_start().len();
            ctx.columns.push(column_at(pos + lead, raw.trim()));
            pos += raw.len() + 1;
        }
    }

    let mut pos = values_kw.end();
    while let Some(open) = sql[pos..].find('(').map(|p| p + pos) {
        let close = sql[open..].find(')').map(|p| p + open).unwrap();
        let mut values = vec![];
        let mut item_pos = open + 1;
        for raw in sql[open + 1..close].split(',') {
            let lead = raw.len() - raw.trim_start().len();
            values.push(value_at(sql, item_pos + lead, raw));
            item_pos += raw.len() + 1;
        }
        ctx.rows.push(InsertRow { span: Span::new(open, close), values });
        pos = close + 1;
        if !sql[pos..].trim_start().starts_with(',') {
            break;
        }
    }
    ctx
}

/// `col = value` assignments of an UPDATE.
pub fn assignment(sql: &str, text_: &str) -> Assignment {
    let span = span_of(sql, text_);
    let (column_raw, value_raw) = text_.split_once(" = ").unwrap();
    Assignment {
        span,
        column: column_at(span.start(), column_raw),
        value: value_at(sql, span.start() + column_raw.len() + 3, value_raw),
    }
}

#[test]
fn test_fixture_spans() {
    let sql = "SELECT * FROM db.t_order o WHERE o.order_id IN (1, ?) LIMIT ?, 10";
    let t = table(sql, "t_order");
    assert_eq!(text(sql, t.span), "t_order");
    assert_eq!(t.owner.as_ref().map(|o| text(sql, o.span)), Some("db"));
    assert_eq!(t.alias.as_deref(), Some("o"));

    let p = pred(sql, "o.order_id IN (1, ?)");
    assert_eq!(text(sql, p.column.span), "order_id");
    match &p.right {
        PredicateRight::In(values) => {
            assert_eq!(text(sql, values[1].span()), "?");
            assert_eq!(values[1].parameter_index(), Some(0));
        }
        _ => unreachable!(),
    }

    let page = limit(sql);
    assert_eq!(page.offset.unwrap().parameter_index(), Some(1));
    assert_eq!(text(sql, page.row_count.unwrap().span), "10");

    let sql = "INSERT INTO t_order (order_id, user_id) VALUES (1, ?), (2, 'a')";
    let insert = insert_of(sql);
    assert_eq!(text(sql, insert.columns[1].span), "user_id");
    assert_eq!(text(sql, insert.rows[1].span), "(2, 'a')");
    assert_eq!(text(sql, insert.rows[1].values[1].span()), "'a'");
}
