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


use crate::value::SqlValue;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("cursor failed: {0}")]
    Cursor(String),

    #[error("column index {0} is out of range, {1} columns")]
    ColumnIndexOutOfRange(usize, usize),

    #[error("cannot resolve column {0:?} in the merged result")]
    UnknownColumn(String),

    #[error("{function} cannot aggregate {value}")]
    TypeMismatch { function: &'static str, value: String },

    #[error("cannot decrypt column {index}: {value}")]
    Decrypt { index: usize, value: String },

    #[error("no current row, call next first")]
    NoCurrentRow,

    #[error("only select statements produce merged query results")]
    NotQuery,
}

/// Forward-only cursor over the rows one data node returned.
pub trait QueryResult {
    fn next(&mut self) -> Result<bool, MergeError>;

    /// Value of column `index`, 0-based, in the current row.
    fn value(&self, index: usize) -> Result<SqlValue, MergeError>;

    fn column_count(&self) -> usize;

    fn column_label(&self, index: usize) -> Option<String>;
}

/// The single cursor a merged statement exposes. Same contract as [`QueryResult`].
pub trait MergedResult {
    fn next(&mut self) -> Result<bool, MergeError>;

    fn value(&self, index: usize) -> Result<SqlValue, MergeError>;

    fn column_count(&self) -> usize;

    fn column_label(&self, index: usize) -> Option<String>;
}

/// Rows held in memory, for executors that buffer and for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueryResult {
    labels: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    cursor: Option<usize>,
}

impl MemoryQueryResult {
    pub fn new(labels: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        MemoryQueryResult { labels, rows, cursor: None }
    }

    fn current(&self) -> Result<&Vec<SqlValue>, MergeError> {
        self.cursor.and_then(|c| self.rows.get(c)).ok_or(MergeError::NoCurrentRow)
    }
}

impl QueryResult for MemoryQueryResult {
    fn next(&mut self) -> Result<bool, MergeError> {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        let row = self.current()?;
        row.get(index).cloned().ok_or(MergeError::ColumnIndexOutOfRange(index, row.len()))
    }

    fn column_count(&self) -> usize {
        self.labels.len()
    }

    fn column_label(&self, index: usize) -> Option<String> {
        self.labels.get(index).cloned()
    }
}
