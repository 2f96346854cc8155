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


use std::{env, ffi::OsString, fs::File, io::prelude::*, str::FromStr};

use clap::{Arg, Command};
use serde::{Deserialize, Serialize};
use shard_error::{Error, ErrorKind};
use strategy::{config::RuleConfig, metadata::TableMetaConfig};
use tracing::{trace, Level};

use crate::env_const::*;

#[derive(Default, Clone)]
pub struct ShardConfigBuilder {
    pub _config_path: String,
    pub _log_level: String,
    pub _sql_show: String,
    pub _version: String,

    pub _git_tag: String,
    pub _git_commit: String,
    pub _git_branch: String,
}

fn toml_error(e: toml::de::Error) -> Error {
    Error::new(ErrorKind::Runtime(Box::new(e)))
}

impl ShardConfigBuilder {
    pub fn new() -> Self {
        ShardConfigBuilder::default()
    }

    pub fn build_from_str(&self, config: &str) -> Result<ShardConfig, Error> {
        toml::from_str(config).map_err(toml_error)
    }

    pub fn build_from_file(&self, path: &str) -> Result<ShardConfig, Error> {
        let mut file = File::open(path)?;
        let mut config_str = String::new();
        file.read_to_string(&mut config_str)?;
        self.build_from_str(&config_str)
    }

    pub fn build_from_cmd<I, T>(mut self, args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Command::new("pisa-shard")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .help("Config path")
                    .env(ENV_PISA_SHARD_CONFIG)
                    .default_value(DEFAULT_LOCAL_CONFIG)
                    .takes_value(true),
            )
            .arg(
                Arg::new("loglevel")
                    .long("log-level")
                    .help("Log level")
                    .takes_value(true),
            )
            .try_get_matches_from(args)
            .map_err(|e| Error::new(ErrorKind::Runtime(Box::new(e))))?;

        if let Some(config) = matches.value_of("config") {
            self._config_path = config.to_string();
        }
        if let Some(loglevel) = matches.value_of("loglevel") {
            self._log_level = loglevel.to_string();
        }

        Ok(self)
    }

    pub fn build_from_env(mut self) -> Self {
        self._log_level = env::var(ENV_PISA_SHARD_LOG_LEVEL).unwrap_or_default();
        self._sql_show = env::var(ENV_PISA_SHARD_SQL_SHOW).unwrap_or_default();
        self._git_tag = env::var(ENV_GIT_TAG).unwrap_or_default();
        self._git_commit = env::var(ENV_GIT_COMMIT).unwrap_or_default();
        self._git_branch = env::var(ENV_GIT_BRANCH).unwrap_or_default();
        self
    }

    pub fn build_version(mut self) -> Self {
        if !self._git_tag.is_empty() {
            self._version = self._git_tag.clone();
        } else {
            self._version = format!("{}-{}", self._git_branch, self._git_commit);
        }
        self
    }

    /// Reads the file named on the command line, then lets command line
    /// flags and environment variables override it, in that order.
    pub fn load_config<I, T>(self, args: I) -> Result<ShardConfig, Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cmd_builder = ShardConfigBuilder::default().build_from_cmd(args)?;
        let env_builder = ShardConfigBuilder::default().build_from_env().build_version();

        let mut config = self.build_from_file(&cmd_builder._config_path)?;
        cmd_builder.apply(&mut config);
        env_builder.apply(&mut config);
        config.version = Some(env_builder._version);

        trace!("configs: {:#?}", config);
        Ok(config)
    }

    fn apply(&self, config: &mut ShardConfig) {
        if !self._log_level.is_empty() {
            config.log_level = self._log_level.clone();
        }
        if let Ok(sql_show) = self._sql_show.parse::<bool>() {
            config.rules.props.sql_show = sql_show;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShardConfig {
    #[serde(default)]
    pub log_level: String,
    #[serde(flatten)]
    pub rules: RuleConfig,
    #[serde(default, rename = "table_meta")]
    pub table_metas: Vec<TableMetaConfig>,
    pub version: Option<String>,
}

impl ShardConfig {
    pub fn new() -> Self {
        ShardConfig::default()
    }

    pub fn get_log_level(&self) -> &str {
        if self.log_level.is_empty() {
            DEFAULT_PISA_SHARD_LOG_LEVEL
        } else {
            &self.log_level
        }
    }

    pub fn get_rules(&self) -> &RuleConfig {
        &self.rules
    }
}

/// Installs the global `fmt` subscriber. Later calls keep the first one.
pub fn init_tracing(log_level: &str) {
    let _ = tracing_subscriber::fmt().with_max_level(Level::from_str(log_level).ok()).try_init();
}

#[cfg(test)]
mod test {
    use super::*;

    const CONFIG: &str = r#"
        log_level = "debug"

        [sharding]
        data_sources = ["ds0", "ds1"]

        [[sharding.table]]
        logic_table = "t_order"
        actual_data_nodes = "ds${0..1}.t_order_${0..1}"
        database_strategy = { type = "standard", sharding_column = "user_id", algorithm = { type = "mod", sharding_count = 2 } }
        table_strategy = { type = "standard", sharding_column = "order_id", algorithm = { type = "inline", expression = "t_order_${order_id % 2}" } }

        [shadow]
        column = "is_shadow"

        [[shadow.mapping]]
        source = "ds0"
        shadow = "shadow_ds0"

        [props]
        sql_show = true

        [[table_meta]]
        name = "t_order"
        indexes = ["idx_status"]
        [[table_meta.column]]
        name = "order_id"
        primary_key = true
    "#;

    #[test]
    fn test_build_from_str() {
        let config = ShardConfigBuilder::new().build_from_str(CONFIG).unwrap();
        assert_eq!(config.get_log_level(), "debug");
        assert_eq!(config.rules.sharding.tables[0].logic_table, "t_order");
        assert!(config.rules.props.sql_show);
        assert_eq!(config.rules.shadow.as_ref().unwrap().column, "is_shadow");
        assert_eq!(config.table_metas[0].indexes, vec!["idx_status"]);
        assert!(config.table_metas[0].columns[0].primary_key);
    }

    #[test]
    fn test_default_log_level() {
        let config = ShardConfigBuilder::new().build_from_str("").unwrap();
        assert_eq!(config.get_log_level(), DEFAULT_PISA_SHARD_LOG_LEVEL);
        assert!(config.rules.sharding.tables.is_empty());
        assert!(ShardConfigBuilder::new().build_from_str("log_level = 1").is_err());
    }

    #[test]
    fn test_cmd_overrides_file() {
        let path = env::temp_dir().join("pisa_shard_config_test.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let path = path.to_string_lossy().to_string();

        let config = ShardConfigBuilder::new()
            .load_config(vec!["pisa-shard", "-c", path.as_str(), "--log-level", "trace"])
            .unwrap();
        assert_eq!(config.rules.sharding.data_sources, vec!["ds0", "ds1"]);
        if env::var(ENV_PISA_SHARD_LOG_LEVEL).is_err() {
            assert_eq!(config.log_level, "trace");
        }
        assert!(config.version.is_some());

        let missing = ShardConfigBuilder::new().build_from_file("/nonexistent/pisa.toml");
        assert!(matches!(missing.unwrap_err().kind(), ErrorKind::Io(_)));
    }
}
