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


use std::ops::Bound;

use crc32fast::Hasher;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use tracing::trace;

use super::{
    condition::{ShardingValues, ValueRange},
    inline_expr::InlineExpression,
};
use crate::{
    config::{AlgorithmConfig, ConfigError},
    route::RouteError,
    value::SqlValue,
};

/// Variable the hint inline expression binds each hint value to.
pub const HINT_VALUE_VARIABLE: &str = "value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModKind {
    Mod,
    Crc32Mod,
}

pub trait CalcShardingIdx<I> {
    fn calc(self, kind: ModKind, sharding_count: I) -> Option<u64>;
}

fn crc32_rem(bytes: &[u8], sharding_count: u64) -> Option<u64> {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    (hasher.finalize() as u64).checked_rem(sharding_count)
}

impl CalcShardingIdx<u64> for u64 {
    fn calc(self, kind: ModKind, sharding_count: u64) -> Option<u64> {
        match kind {
            ModKind::Mod => self.checked_rem(sharding_count),
            ModKind::Crc32Mod => crc32_rem(&self.to_be_bytes(), sharding_count),
        }
    }
}

impl CalcShardingIdx<u64> for i64 {
    fn calc(self, kind: ModKind, sharding_count: u64) -> Option<u64> {
        match kind {
            ModKind::Mod => {
                let count = i64::try_from(sharding_count).ok().filter(|c| *c > 0)?;
                Some(self.rem_euclid(count) as u64)
            }
            ModKind::Crc32Mod => crc32_rem(&self.to_be_bytes(), sharding_count),
        }
    }
}

impl CalcShardingIdx<u64> for f64 {
    fn calc(self, kind: ModKind, sharding_count: u64) -> Option<u64> {
        match kind {
            ModKind::Mod if sharding_count == 0 => None,
            ModKind::Mod => Some(self.rem_euclid(sharding_count as f64).round() as u64),
            ModKind::Crc32Mod => crc32_rem(&self.to_be_bytes(), sharding_count),
        }
    }
}

impl CalcShardingIdx<u64> for &str {
    fn calc(self, kind: ModKind, sharding_count: u64) -> Option<u64> {
        match kind {
            ModKind::Mod => self.trim().parse::<i64>().ok()?.calc(kind, sharding_count),
            ModKind::Crc32Mod => crc32_rem(self.as_bytes(), sharding_count),
        }
    }
}

impl CalcShardingIdx<u64> for &SqlValue {
    fn calc(self, kind: ModKind, sharding_count: u64) -> Option<u64> {
        match self {
            SqlValue::Int(v) => v.calc(kind, sharding_count),
            SqlValue::UInt(v) => v.calc(kind, sharding_count),
            SqlValue::Float(v) => v.calc(kind, sharding_count),
            SqlValue::Bool(v) => (*v as u64).calc(kind, sharding_count),
            SqlValue::Str(v) => v.as_str().calc(kind, sharding_count),
            SqlValue::Bytes(v) if kind == ModKind::Crc32Mod => crc32_rem(v, sharding_count),
            _ => None,
        }
    }
}

/// Numeric suffix of an actual name: `t_order_00003` -> 3.
fn name_suffix(name: &str) -> Option<u64> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

fn find_by_suffix<'a>(available: &'a [String], idx: u64) -> Option<&'a String> {
    available.iter().find(|name| name_suffix(name) == Some(idx))
}

fn find_by_name<'a>(available: &'a [String], name: &str) -> Option<&'a String> {
    available.iter().find(|a| a.eq_ignore_ascii_case(name))
}

/// Keeps `available` order so that routing is deterministic.
fn in_available_order(available: &[String], targets: &IndexSet<String>) -> Vec<String> {
    available.iter().filter(|a| targets.contains(*a)).cloned().collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShardingAlgorithm {
    Mod { sharding_count: u64 },
    Crc32Mod { sharding_count: u64 },
    Inline { expression: InlineExpression },
    ComplexInline { expression: InlineExpression },
    BoundaryRange { boundaries: Vec<i64> },
    HintInline { expression: InlineExpression },
}

impl TryFrom<&AlgorithmConfig> for ShardingAlgorithm {
    type Error = ConfigError;

    fn try_from(config: &AlgorithmConfig) -> Result<Self, Self::Error> {
        let parse = |raw: &str| {
            InlineExpression::parse(raw)
                .map_err(|e| ConfigError::InvalidInlineExpression(raw.to_string(), e.to_string()))
        };

        Ok(match config {
            AlgorithmConfig::Mod { sharding_count } => {
                if *sharding_count == 0 {
                    return Err(ConfigError::ZeroShardingCount("mod".to_string()));
                }
                ShardingAlgorithm::Mod { sharding_count: *sharding_count }
            }
            AlgorithmConfig::Crc32Mod { sharding_count } => {
                if *sharding_count == 0 {
                    return Err(ConfigError::ZeroShardingCount("crc32mod".to_string()));
                }
                ShardingAlgorithm::Crc32Mod { sharding_count: *sharding_count }
            }
            AlgorithmConfig::Inline { expression } => {
                ShardingAlgorithm::Inline { expression: parse(expression)? }
            }
            AlgorithmConfig::ComplexInline { expression } => {
                ShardingAlgorithm::ComplexInline { expression: parse(expression)? }
            }
            AlgorithmConfig::BoundaryRange { boundaries } => {
                let mut boundaries = boundaries.clone();
                boundaries.sort_unstable();
                boundaries.dedup();
                ShardingAlgorithm::BoundaryRange { boundaries }
            }
            AlgorithmConfig::HintInline { expression } => {
                ShardingAlgorithm::HintInline { expression: parse(expression)? }
            }
        })
    }
}

impl ShardingAlgorithm {
    /// Target for one `column = value`.
    pub fn do_precise(
        &self,
        available: &[String],
        column: &str,
        value: &SqlValue,
    ) -> Result<String, RouteError> {
        let no_data_node = || RouteError::NoDataNode {
            column: column.to_string(),
            value: value.to_string(),
            available: available.to_vec(),
        };

        let target = match self {
            ShardingAlgorithm::Mod { sharding_count } => {
                let idx = value.calc(ModKind::Mod, *sharding_count).ok_or_else(|| {
                    RouteError::NotNumeric(column.to_string(), value.to_string())
                })?;
                find_by_suffix(available, idx)
            }
            ShardingAlgorithm::Crc32Mod { sharding_count } => {
                let idx = value.calc(ModKind::Crc32Mod, *sharding_count).ok_or_else(|| {
                    RouteError::NotNumeric(column.to_string(), value.to_string())
                })?;
                find_by_suffix(available, idx)
            }
            ShardingAlgorithm::BoundaryRange { boundaries } => {
                let v = value.as_f64().ok_or_else(|| {
                    RouteError::NotNumeric(column.to_string(), value.to_string())
                })?;
                find_by_suffix(available, Self::partition(boundaries, v))
            }
            ShardingAlgorithm::Inline { expression }
            | ShardingAlgorithm::ComplexInline { expression } => {
                let mut vars = IndexMap::new();
                vars.insert(column.to_string(), value.clone());
                find_by_name(available, &expression.evaluate_single(&vars)?)
            }
            ShardingAlgorithm::HintInline { expression } => {
                let mut vars = IndexMap::new();
                vars.insert(HINT_VALUE_VARIABLE.to_string(), value.clone());
                find_by_name(available, &expression.evaluate_single(&vars)?)
            }
        };

        trace!("sharding {} = {} resolves to {:?}", column, value, target);
        target.cloned().ok_or_else(no_data_node)
    }

    /// Targets for a range condition. Algorithms that cannot narrow a range
    /// return every available target.
    pub fn do_range(
        &self,
        available: &[String],
        column: &str,
        range: &ValueRange,
    ) -> Result<Vec<String>, RouteError> {
        match self {
            ShardingAlgorithm::Mod { sharding_count } => {
                let lower = match &range.lower {
                    Bound::Included(v) => v.as_i64(),
                    Bound::Excluded(v) => v.as_i64().and_then(|v| v.checked_add(1)),
                    Bound::Unbounded => None,
                };
                let upper = match &range.upper {
                    Bound::Included(v) => v.as_i64(),
                    Bound::Excluded(v) => v.as_i64().and_then(|v| v.checked_sub(1)),
                    Bound::Unbounded => None,
                };

                match (lower, upper) {
                    (Some(lo), Some(hi)) if hi < lo => Ok(vec![]),
                    (Some(lo), Some(hi)) if ((hi - lo) as u64) < *sharding_count => {
                        let mut targets = IndexSet::new();
                        for v in lo..=hi {
                            targets.insert(self.do_precise(available, column, &SqlValue::Int(v))?);
                        }
                        Ok(in_available_order(available, &targets))
                    }
                    _ => Ok(available.to_vec()),
                }
            }
            ShardingAlgorithm::BoundaryRange { boundaries } => {
                let bound_value = |b: &Bound<SqlValue>| match b {
                    Bound::Included(v) | Bound::Excluded(v) => v.as_f64(),
                    Bound::Unbounded => None,
                };
                let lo = bound_value(&range.lower).map_or(0, |v| Self::partition(boundaries, v));
                let hi = bound_value(&range.upper)
                    .map_or(boundaries.len() as u64, |v| Self::partition(boundaries, v));
                Ok(available
                    .iter()
                    .filter(|name| name_suffix(name).map_or(false, |idx| idx >= lo && idx <= hi))
                    .cloned()
                    .collect())
            }
            _ => Ok(available.to_vec()),
        }
    }

    /// Targets for several sharding columns at once.
    pub fn do_complex(
        &self,
        available: &[String],
        values: &IndexMap<String, ShardingValues>,
    ) -> Result<Vec<String>, RouteError> {
        let expression = match self {
            ShardingAlgorithm::ComplexInline { expression } => expression,
            _ => {
                return match values.iter().next() {
                    Some((column, ShardingValues::List(list))) => {
                        let mut targets = IndexSet::new();
                        for v in list.iter() {
                            targets.insert(self.do_precise(available, column, v)?);
                        }
                        Ok(in_available_order(available, &targets))
                    }
                    Some((column, ShardingValues::Range(range))) => {
                        self.do_range(available, column, range)
                    }
                    None => Ok(available.to_vec()),
                };
            }
        };

        let mut columns = vec![];
        let mut lists = vec![];
        for var in expression.variables() {
            let found = values.iter().find(|(k, _)| k.eq_ignore_ascii_case(&var));
            match found {
                Some((_, ShardingValues::List(list))) => {
                    columns.push(var);
                    lists.push(list.clone());
                }
                _ => return Ok(available.to_vec()),
            }
        }

        if columns.is_empty() {
            let target = expression.evaluate_single(&IndexMap::new())?;
            return Ok(find_by_name(available, &target).into_iter().cloned().collect());
        }

        let mut targets = IndexSet::new();
        for combination in lists.into_iter().multi_cartesian_product() {
            let vars: IndexMap<String, SqlValue> = columns.iter().cloned().zip(combination.into_iter()).collect();
            let target = expression.evaluate_single(&vars)?;
            let found = find_by_name(available, &target).ok_or_else(|| RouteError::NoDataNode {
                column: columns.join(","),
                value: target.clone(),
                available: available.to_vec(),
            })?;
            targets.insert(found.clone());
        }

        Ok(in_available_order(available, &targets))
    }

    /// Targets for hint values.
    pub fn do_hint(&self, available: &[String], values: &[SqlValue]) -> Result<Vec<String>, RouteError> {
        let mut targets = IndexSet::new();
        for v in values {
            targets.insert(self.do_precise(available, HINT_VALUE_VARIABLE, v)?);
        }
        Ok(in_available_order(available, &targets))
    }

    fn partition(boundaries: &[i64], value: f64) -> u64 {
        boundaries.iter().filter(|b| value >= **b as f64).count() as u64
    }
}
