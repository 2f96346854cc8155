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


use std::collections::{BTreeMap, BTreeSet};

use crate::{rewrite::RewriteError, value::SqlValue};

/// Original parameters plus replacements, insertions and removals, all keyed
/// by original index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StandardParameterBuilder {
    original: Vec<SqlValue>,
    added: BTreeMap<usize, Vec<SqlValue>>,
    replaced: BTreeMap<usize, SqlValue>,
    removed: BTreeSet<usize>,
}

impl StandardParameterBuilder {
    pub fn new(original: Vec<SqlValue>) -> Self {
        StandardParameterBuilder { original, ..Default::default() }
    }

    pub fn original_parameters(&self) -> &[SqlValue] {
        &self.original
    }

    pub fn added_index_and_parameters(&self) -> &BTreeMap<usize, Vec<SqlValue>> {
        &self.added
    }

    pub fn replaced_index_and_parameters(&self) -> &BTreeMap<usize, SqlValue> {
        &self.replaced
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    /// Inserts `values` before original parameter `index`; `index == len` appends.
    pub fn add(&mut self, index: usize, values: Vec<SqlValue>) -> Result<(), RewriteError> {
        if index > self.original.len() {
            return Err(RewriteError::ParameterIndexOutOfRange(index, self.original.len()));
        }
        self.added.entry(index).or_insert_with(Vec::new).extend(values);
        Ok(())
    }

    pub fn replace(&mut self, index: usize, value: SqlValue) -> Result<(), RewriteError> {
        self.check_index(index)?;
        self.replaced.insert(index, value);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<(), RewriteError> {
        self.check_index(index)?;
        self.removed.insert(index);
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), RewriteError> {
        if index >= self.original.len() {
            return Err(RewriteError::ParameterIndexOutOfRange(index, self.original.len()));
        }
        Ok(())
    }

    pub fn parameters(&self) -> Vec<SqlValue> {
        let mut result = Vec::with_capacity(self.original.len());
        for (idx, value) in self.original.iter().enumerate() {
            if let Some(added) = self.added.get(&idx) {
                result.extend(added.iter().cloned());
            }
            if self.removed.contains(&idx) {
                continue;
            }
            result.push(self.replaced.get(&idx).unwrap_or(value).clone());
        }
        if let Some(added) = self.added.get(&self.original.len()) {
            result.extend(added.iter().cloned());
        }
        result
    }
}
