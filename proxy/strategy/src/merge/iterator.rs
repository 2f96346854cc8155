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


use super::{MergeError, MergedResult, QueryResult};
use crate::value::SqlValue;

/// Drains the cursors one after another, in route order.
pub struct IteratorStreamMergedResult {
    results: Vec<Box<dyn QueryResult>>,
    current: usize,
}

impl IteratorStreamMergedResult {
    pub fn new(results: Vec<Box<dyn QueryResult>>) -> Self {
        IteratorStreamMergedResult { results, current: 0 }
    }
}

impl MergedResult for IteratorStreamMergedResult {
    fn next(&mut self) -> Result<bool, MergeError> {
        while let Some(result) = self.results.get_mut(self.current) {
            if result.next()? {
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        self.results.get(self.current).ok_or(MergeError::NoCurrentRow)?.value(index)
    }

    fn column_count(&self) -> usize {
        self.results.first().map_or(0, |r| r.column_count())
    }

    fn column_label(&self, index: usize) -> Option<String> {
        self.results.first().and_then(|r| r.column_label(index))
    }
}
