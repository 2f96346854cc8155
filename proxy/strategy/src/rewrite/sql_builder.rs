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


use super::{token::SqlToken, RewriteError};
use crate::route::RouteUnit;

/// Splices token renderings into the original SQL.
pub struct SqlBuilder<'a> {
    sql: &'a str,
    tokens: &'a [SqlToken],
}

impl<'a> SqlBuilder<'a> {
    pub fn new(sql: &'a str, tokens: &'a [SqlToken]) -> Self {
        SqlBuilder { sql, tokens }
    }

    pub fn to_sql(&self, unit: Option<&RouteUnit>) -> Result<String, RewriteError> {
        if self.tokens.is_empty() {
            return Ok(self.sql.to_string());
        }

        let mut ordered = self.tokens.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|t| t.range());

        let mut result = String::with_capacity(self.sql.len());
        let mut cursor = 0;
        for token in ordered {
            let (start, end) = token.range();
            if end > self.sql.len()
                || !self.sql.is_char_boundary(start)
                || !self.sql.is_char_boundary(end)
            {
                return Err(RewriteError::TokenOutOfRange { start, end, len: self.sql.len() });
            }
            if start < cursor {
                return Err(RewriteError::OverlappingToken { start, cursor });
            }

            result.push_str(&self.sql[cursor..start]);
            result.push_str(&token.render(unit));
            cursor = end;
        }
        result.push_str(&self.sql[cursor..]);

        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        rewrite::token::{AppendToken, RemoveToken, TableToken},
        route::RouteMapper,
        statement::{fixture::span_of, QuoteCharacter},
    };

    #[test]
    fn test_without_tokens() {
        let sql = "SELECT * FROM t_order WHERE order_id = 1";
        assert_eq!(SqlBuilder::new(sql, &[]).to_sql(None).unwrap(), sql);
    }

    #[test]
    fn test_splice_in_order() {
        let sql = "SELECT price FROM db.t_order";
        let tokens = vec![
            SqlToken::Table(TableToken {
                span: span_of(sql, "t_order"),
                logic_table: "t_order".to_string(),
                quote: QuoteCharacter::None,
            }),
            SqlToken::Projections(AppendToken {
                position: span_of(sql, "price").end(),
                items: vec!["order_id AS ORDER_BY_DERIVED_0".to_string()],
            }),
            SqlToken::Remove(RemoveToken {
                start: span_of(sql, "db").start(),
                end: span_of(sql, "t_order").start(),
            }),
        ];
        let unit = RouteUnit::new(
            RouteMapper::new("ds0", "ds0"),
            vec![RouteMapper::new("t_order", "t_order_1")],
        );

        assert_eq!(
            SqlBuilder::new(sql, &tokens).to_sql(Some(&unit)).unwrap(),
            "SELECT price, order_id AS ORDER_BY_DERIVED_0 FROM t_order_1"
        );
    }

    #[test]
    fn test_invalid_tokens() {
        let sql = "SELECT * FROM t_order";
        let overlapping = vec![
            SqlToken::Remove(RemoveToken { start: 5, end: 10 }),
            SqlToken::Remove(RemoveToken { start: 8, end: 12 }),
        ];
        assert!(matches!(
            SqlBuilder::new(sql, &overlapping).to_sql(None),
            Err(RewriteError::OverlappingToken { start: 8, cursor: 10 })
        ));

        let out_of_range = vec![SqlToken::Remove(RemoveToken { start: 14, end: 40 })];
        assert!(matches!(
            SqlBuilder::new(sql, &out_of_range).to_sql(None),
            Err(RewriteError::TokenOutOfRange { end: 40, .. })
        ));
    }
}
