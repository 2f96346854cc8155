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


use strategy::{
    config::RuleConfig,
    encrypt::EncryptRule,
    merge::{MemoryQueryResult, MergeEngine, QueryResult},
    metadata::TableMetas,
    rewrite::{
        generator::RouteInfo, RewriteRules, RouteSqlRewriteEngine, SqlRewriteEntry, SqlUnit,
    },
    route::{HintValues, RouteUnit, ShardingRouter},
    sharding::{condition::ShardingConditionEngine, ShardingRule},
    statement::*,
    SqlValue,
};

const RULES: &str = r#"
    [sharding]
    data_sources = ["ds0", "ds1"]
    default_data_source = "ds0"

    [[sharding.table]]
    logic_table = "t_order"
    actual_data_nodes = "ds${0..1}.t_order_${0..1}"
    database_strategy = { type = "standard", sharding_column = "user_id", algorithm = { type = "inline", expression = "ds${user_id % 2}" } }
    table_strategy = { type = "standard", sharding_column = "order_id", algorithm = { type = "mod", sharding_count = 2 } }

    [[encrypt.encryptor]]
    name = "digest"
    type = "sha1"

    [[encrypt.encryptor]]
    name = "stream"
    type = "rc4"
    key = "Key"

    [[encrypt.table]]
    name = "t_user"

    [[encrypt.table.column]]
    logic_column = "pwd"
    cipher_column = "pwd_cipher"
    encryptor = "digest"

    [[encrypt.table.column]]
    logic_column = "phone"
    cipher_column = "phone_cipher"
    encryptor = "stream"
"#;

struct Kernel {
    config: RuleConfig,
    sharding: ShardingRule,
    encrypt: EncryptRule,
    metas: TableMetas,
}

impl Kernel {
    fn new() -> Self {
        let config: RuleConfig = toml::from_str(RULES).unwrap();
        let sharding = ShardingRule::new(&config.sharding).unwrap();
        let encrypt = EncryptRule::new(config.encrypt.as_ref().unwrap()).unwrap();
        Kernel { config, sharding, encrypt, metas: TableMetas::new() }
    }

    fn execute(
        &self,
        sql: &str,
        stmt: &StatementContext,
        params: &[SqlValue],
    ) -> Vec<(RouteUnit, SqlUnit)> {
        let mut conditions =
            ShardingConditionEngine::new(&self.sharding, &self.metas).create(stmt, params).unwrap();
        let route = ShardingRouter::new(&self.sharding, &self.metas)
            .route(stmt, &mut conditions, &HintValues::new())
            .unwrap();

        let rules = RewriteRules {
            sharding: Some(&self.sharding),
            encrypt: Some(&self.encrypt),
            shadow: None,
            metas: &self.metas,
            props: &self.config.props,
        };
        let info = RouteInfo { single_routing: route.is_single_routing(), conditions: &conditions };
        let ctx = SqlRewriteEntry::new(rules).create_context(sql, params, stmt, Some(info)).unwrap();
        RouteSqlRewriteEngine::rewrite(&ctx, &route).unwrap().into_iter().collect()
    }

    fn merge_engine(&self) -> MergeEngine<'_> {
        MergeEngine::new(Some(&self.encrypt), &self.config.props)
    }
}

fn nth(sql: &str, needle: &str, n: usize) -> Span {
    let start = sql.match_indices(needle).nth(n).unwrap().0;
    Span::new(start, start + needle.len() - 1)
}

fn span(sql: &str, needle: &str) -> Span {
    nth(sql, needle, 0)
}

fn column(sql: &str, name: &str, n: usize) -> ColumnSegment {
    ColumnSegment::new(nth(sql, name, n), name)
}

fn cursor(labels: &[&str], rows: Vec<Vec<SqlValue>>) -> Box<dyn QueryResult> {
    Box::new(MemoryQueryResult::new(labels.iter().map(|l| l.to_string()).collect(), rows))
}

#[test]
fn test_group_by_avg_over_every_node() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let kernel = Kernel::new();
    let sql = "SELECT user_id, AVG(price) FROM t_order GROUP BY user_id";
    let stmt = StatementContext::new(StatementKind::Select)
        .with_table(TableSegment::new(span(sql, "t_order"), "t_order"))
        .with_projections(ProjectionsContext::new(
            Span::new(span(sql, "user_id").start(), span(sql, "AVG(price)").stop()),
            vec![
                Projection::column(span(sql, "user_id"), column(sql, "user_id", 0)),
                Projection::aggregation(span(sql, "AVG(price)"), AggregationType::Avg, "price"),
            ],
        ))
        .with_group_by(OrderByContext::new(
            Span::new(span(sql, "GROUP BY").start(), sql.len() - 1),
            vec![OrderByItem::column(column(sql, "user_id", 1), OrderDirection::Asc)],
        ));

    let units = kernel.execute(sql, &stmt, &[]);
    assert_eq!(units.len(), 4);
    for (route_unit, unit) in units.iter() {
        let table = route_unit.actual_table("t_order").unwrap();
        assert_eq!(
            unit.sql,
            format!(
                "SELECT user_id, AVG(price), COUNT(price) AS AVG_DERIVED_COUNT_0, \
                 SUM(price) AS AVG_DERIVED_SUM_0 FROM {} GROUP BY user_id ORDER BY user_id ASC",
                table
            )
        );
        assert!(unit.parameters.is_empty());
    }

    let labels = ["user_id", "AVG(price)", "AVG_DERIVED_COUNT_0", "AVG_DERIVED_SUM_0"];
    let row = |user: i64, avg: f64, count: i64, sum: i64| {
        vec![SqlValue::Int(user), SqlValue::Float(avg), SqlValue::Int(count), SqlValue::Int(sum)]
    };
    let results = vec![
        cursor(&labels, vec![row(1, 10.0, 2, 20), row(2, 4.0, 1, 4)]),
        cursor(&labels, vec![row(1, 40.0, 1, 40)]),
        cursor(&labels, vec![row(3, 5.0, 2, 10)]),
        cursor(&labels, vec![]),
    ];
    let mut merged = kernel.merge_engine().merge(&stmt, results, &[]).unwrap();

    let mut rows = vec![];
    while merged.next().unwrap() {
        rows.push((merged.value(0).unwrap(), merged.value(1).unwrap()));
    }
    assert_eq!(
        rows,
        vec![
            (SqlValue::Int(1), SqlValue::Float(20.0)),
            (SqlValue::Int(2), SqlValue::Float(4.0)),
            (SqlValue::Int(3), SqlValue::Float(5.0)),
        ]
    );
    assert_eq!(merged.column_count(), 2);
    assert_eq!(merged.column_label(1).as_deref(), Some("AVG(price)"));
}

#[test]
fn test_encrypted_query_and_decrypted_result() {
    let kernel = Kernel::new();
    let sql = "SELECT phone FROM t_user WHERE pwd = ?";
    let stmt = StatementContext::new(StatementKind::Select)
        .with_table(TableSegment::new(span(sql, "t_user"), "t_user"))
        .with_projections(ProjectionsContext::new(
            span(sql, "phone"),
            vec![Projection::column(span(sql, "phone"), column(sql, "phone", 0))],
        ))
        .with_where(WhereSegment {
            span: Span::new(span(sql, "WHERE").start(), sql.len() - 1),
            and_groups: vec![vec![Predicate {
                span: span(sql, "pwd = ?"),
                column: column(sql, "pwd", 0),
                right: PredicateRight::Equal(ExprValue::Parameter { span: span(sql, "?"), index: 0 }),
            }]],
        });

    let units = kernel.execute(sql, &stmt, &[SqlValue::Int(1)]);
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].0.data_source(), "ds0");
    assert_eq!(units[0].0.actual_table("t_user"), Some("t_user"));
    assert_eq!(units[0].1.sql, "SELECT phone_cipher AS phone FROM t_user WHERE pwd_cipher = ?");
    assert_eq!(
        units[0].1.parameters,
        vec![SqlValue::from("356a192b7913b04c54574d18c28d46e6395428ab")]
    );

    let cipher = kernel.encrypt.encrypt("t_user", "phone", &SqlValue::from("13800000000")).unwrap();
    let results = vec![cursor(&["phone"], vec![vec![cipher]])];
    let mut merged = kernel.merge_engine().merge(&stmt, results, &[]).unwrap();
    assert!(merged.next().unwrap());
    assert_eq!(merged.value(0).unwrap(), SqlValue::from("13800000000"));
    assert!(!merged.next().unwrap());
}
