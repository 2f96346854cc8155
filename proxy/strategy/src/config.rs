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


use serde::{Deserialize, Serialize};

use crate::statement::DatabaseType;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid inline expression {0:?}: {1}")]
    InvalidInlineExpression(String, String),

    #[error("unknown encryptor {0:?}")]
    UnknownEncryptor(String),

    #[error("encryptor {0:?} requires a key")]
    EncryptorKeyRequired(String),

    #[error("binding group references unknown table {0:?}")]
    UnknownBindingTable(String),

    #[error("binding tables {0:?} and {1:?} have different actual node layouts")]
    BindingTableMismatch(String, String),

    #[error("unknown data source {0:?}")]
    UnknownDataSource(String),

    #[error("table {0:?} has no actual data nodes and no data sources are configured")]
    NoDataNodes(String),

    #[error("sharding count must be greater than 0 for {0:?}")]
    ZeroShardingCount(String),

    #[error("plain column should be required for {0}.{1}")]
    PlainColumnRequired(String, String),
}

/// Sharding rule of one logical schema.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ShardingConfig {
    #[serde(default)]
    pub data_sources: Vec<String>,
    pub default_data_source: Option<String>,
    #[serde(default, rename = "table")]
    pub tables: Vec<TableRuleConfig>,
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,
    #[serde(default)]
    pub broadcast_tables: Vec<String>,
    pub default_database_strategy: Option<StrategyConfig>,
    pub default_table_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub allow_cartesian: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TableRuleConfig {
    pub logic_table: String,
    /// Inline expression such as `ds${0..1}.t_order_${0..3}`.
    pub actual_data_nodes: Option<String>,
    pub database_strategy: Option<StrategyConfig>,
    pub table_strategy: Option<StrategyConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Standard { sharding_column: String, algorithm: AlgorithmConfig },
    Complex { sharding_columns: Vec<String>, algorithm: AlgorithmConfig },
    Hint { algorithm: AlgorithmConfig },
    None,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    Mod { sharding_count: u64 },
    #[serde(rename = "crc32mod")]
    Crc32Mod { sharding_count: u64 },
    Inline { expression: String },
    ComplexInline { expression: String },
    BoundaryRange { boundaries: Vec<i64> },
    HintInline { expression: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EncryptConfig {
    #[serde(default, rename = "encryptor")]
    pub encryptors: Vec<EncryptorConfig>,
    #[serde(default, rename = "table")]
    pub tables: Vec<EncryptTableConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncryptorType {
    Sha1,
    Rc4,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EncryptorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub encryptor_type: EncryptorType,
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EncryptTableConfig {
    pub name: String,
    #[serde(default, rename = "column")]
    pub columns: Vec<EncryptColumnConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EncryptColumnConfig {
    pub logic_column: String,
    pub cipher_column: String,
    pub assisted_query_column: Option<String>,
    pub plain_column: Option<String>,
    pub encryptor: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ShadowConfig {
    pub column: String,
    #[serde(default, rename = "mapping")]
    pub data_source_mappings: Vec<ShadowMappingConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ShadowMappingConfig {
    pub source: String,
    pub shadow: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Props {
    #[serde(default)]
    pub sql_show: bool,
    #[serde(default = "default_true")]
    pub query_with_cipher_column: bool,
    #[serde(default)]
    pub database_type: DatabaseType,
}

impl Default for Props {
    fn default() -> Self {
        Props { sql_show: false, query_with_cipher_column: true, database_type: DatabaseType::MySQL }
    }
}

/// Every rule of one logical schema.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RuleConfig {
    #[serde(default)]
    pub sharding: ShardingConfig,
    pub encrypt: Option<EncryptConfig>,
    pub shadow: Option<ShadowConfig>,
    #[serde(default)]
    pub props: Props,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_rule_config() {
        let config = r#"
            [sharding]
            data_sources = ["ds0", "ds1"]
            binding_tables = [["t_order", "t_order_item"]]
            broadcast_tables = ["t_config"]

            [sharding.default_database_strategy]
            type = "standard"
            sharding_column = "user_id"
            algorithm = { type = "mod", sharding_count = 2 }

            [[sharding.table]]
            logic_table = "t_order"
            actual_data_nodes = "ds${0..1}.t_order_${0..1}"
            table_strategy = { type = "standard", sharding_column = "order_id", algorithm = { type = "inline", expression = "t_order_${order_id % 2}" } }

            [[encrypt.encryptor]]
            name = "sha1"
            type = "sha1"

            [[encrypt.table]]
            name = "t_user"
            [[encrypt.table.column]]
            logic_column = "pwd"
            cipher_column = "pwd_cipher"
            encryptor = "sha1"

            [props]
            sql_show = true
            database_type = "postgresql"
        "#;

        let config: RuleConfig = toml::from_str(config).unwrap();
        assert_eq!(config.sharding.data_sources, vec!["ds0", "ds1"]);
        assert_eq!(config.sharding.tables[0].logic_table, "t_order");
        assert_eq!(
            config.sharding.default_database_strategy,
            Some(StrategyConfig::Standard {
                sharding_column: "user_id".to_string(),
                algorithm: AlgorithmConfig::Mod { sharding_count: 2 },
            })
        );
        let encrypt = config.encrypt.unwrap();
        assert_eq!(encrypt.encryptors[0].encryptor_type, EncryptorType::Sha1);
        assert_eq!(encrypt.tables[0].columns[0].cipher_column, "pwd_cipher");
        assert!(config.props.sql_show);
        assert!(config.props.query_with_cipher_column);
        assert_eq!(config.props.database_type, DatabaseType::PostgreSQL);
    }
}
