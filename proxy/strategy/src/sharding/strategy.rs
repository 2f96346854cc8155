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


use indexmap::{IndexMap, IndexSet};

use super::{algorithm::ShardingAlgorithm, condition::ShardingValues};
use crate::{
    config::{ConfigError, StrategyConfig},
    route::RouteError,
    value::SqlValue,
};

/// How a level (database or table) of a logical table picks its targets.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardingStrategy {
    Standard { sharding_column: String, algorithm: ShardingAlgorithm },
    Complex { sharding_columns: Vec<String>, algorithm: ShardingAlgorithm },
    Hint { algorithm: ShardingAlgorithm },
    None,
}

impl Default for ShardingStrategy {
    fn default() -> Self {
        ShardingStrategy::None
    }
}

impl TryFrom<&StrategyConfig> for ShardingStrategy {
    type Error = ConfigError;

    fn try_from(config: &StrategyConfig) -> Result<Self, Self::Error> {
        Ok(match config {
            StrategyConfig::Standard { sharding_column, algorithm } => ShardingStrategy::Standard {
                sharding_column: sharding_column.clone(),
                algorithm: ShardingAlgorithm::try_from(algorithm)?,
            },
            StrategyConfig::Complex { sharding_columns, algorithm } => ShardingStrategy::Complex {
                sharding_columns: sharding_columns.clone(),
                algorithm: ShardingAlgorithm::try_from(algorithm)?,
            },
            StrategyConfig::Hint { algorithm } => {
                ShardingStrategy::Hint { algorithm: ShardingAlgorithm::try_from(algorithm)? }
            }
            StrategyConfig::None => ShardingStrategy::None,
        })
    }
}

impl ShardingStrategy {
    pub fn sharding_columns(&self) -> Vec<&str> {
        match self {
            ShardingStrategy::Standard { sharding_column, .. } => vec![sharding_column.as_str()],
            ShardingStrategy::Complex { sharding_columns, .. } => {
                sharding_columns.iter().map(|c| c.as_str()).collect()
            }
            ShardingStrategy::Hint { .. } | ShardingStrategy::None => vec![],
        }
    }

    pub fn is_hint(&self) -> bool {
        matches!(self, ShardingStrategy::Hint { .. })
    }

    /// Picks targets among `available`. `values` is keyed by lower-cased column;
    /// a missing column means the level cannot be narrowed.
    pub fn do_sharding(
        &self,
        available: &[String],
        values: &IndexMap<String, ShardingValues>,
        hint: Option<&[SqlValue]>,
    ) -> Result<Vec<String>, RouteError> {
        match self {
            ShardingStrategy::Standard { sharding_column, algorithm } => {
                match values.get(&sharding_column.to_ascii_lowercase()) {
                    Some(ShardingValues::List(list)) => {
                        let mut targets = IndexSet::new();
                        for v in list.iter() {
                            targets.insert(algorithm.do_precise(available, sharding_column, v)?);
                        }
                        Ok(available.iter().filter(|a| targets.contains(*a)).cloned().collect())
                    }
                    Some(ShardingValues::Range(range)) => {
                        algorithm.do_range(available, sharding_column, range)
                    }
                    None => Ok(available.to_vec()),
                }
            }
            ShardingStrategy::Complex { sharding_columns, algorithm } => {
                let columns = sharding_columns
                    .iter()
                    .filter_map(|c| {
                        values.get(&c.to_ascii_lowercase()).map(|v| (c.clone(), v.clone()))
                    })
                    .collect::<IndexMap<_, _>>();
                if columns.is_empty() {
                    return Ok(available.to_vec());
                }
                algorithm.do_complex(available, &columns)
            }
            ShardingStrategy::Hint { algorithm } => match hint {
                Some(hint) if !hint.is_empty() => algorithm.do_hint(available, hint),
                _ => Ok(available.to_vec()),
            },
            ShardingStrategy::None => Ok(available.to_vec()),
        }
    }
}

#[cfg(test)]
mod test {
    use indexmap::IndexMap;

    use super::*;
    use crate::config::AlgorithmConfig;

    #[test]
    fn test_standard_strategy() {
        let strategy = ShardingStrategy::try_from(&StrategyConfig::Standard {
            sharding_column: "user_id".to_string(),
            algorithm: AlgorithmConfig::Mod { sharding_count: 2 },
        })
        .unwrap();
        let available = vec!["ds0".to_string(), "ds1".to_string()];

        let mut values = IndexMap::new();
        assert_eq!(strategy.do_sharding(&available, &values, None).unwrap(), available);

        values.insert(
            "user_id".to_string(),
            ShardingValues::List(vec![SqlValue::Int(3), SqlValue::Int(1)]),
        );
        assert_eq!(strategy.do_sharding(&available, &values, None).unwrap(), vec!["ds1"]);

        values.insert("user_id".to_string(), ShardingValues::List(vec![]));
        assert!(strategy.do_sharding(&available, &values, None).unwrap().is_empty());
    }

    #[test]
    fn test_hint_strategy() {
        let strategy = ShardingStrategy::try_from(&StrategyConfig::Hint {
            algorithm: AlgorithmConfig::HintInline { expression: "ds${value}".to_string() },
        })
        .unwrap();
        let available = vec!["ds0".to_string(), "ds1".to_string()];
        let values = IndexMap::new();
        assert_eq!(strategy.do_sharding(&available, &values, None).unwrap().len(), 2);
        assert_eq!(
            strategy.do_sharding(&available, &values, Some(&[SqlValue::Int(1)])).unwrap(),
            vec!["ds1"]
        );
    }
}
