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


use std::collections::HashMap;

use super::{MergeError, MergedResult};
use crate::{encrypt::Encryptor, value::SqlValue};

/// Applies `LIMIT offset, row_count` to a merged stream.
pub struct LimitDecorator {
    inner: Box<dyn MergedResult>,
    row_count: Option<u64>,
    emitted: u64,
    skip_all: bool,
}

impl LimitDecorator {
    pub fn new(
        mut inner: Box<dyn MergedResult>,
        offset: u64,
        row_count: Option<u64>,
    ) -> Result<Self, MergeError> {
        let mut skip_all = false;
        for _ in 0..offset {
            if !inner.next()? {
                skip_all = true;
                break;
            }
        }
        Ok(LimitDecorator { inner, row_count, emitted: 0, skip_all })
    }
}

impl MergedResult for LimitDecorator {
    fn next(&mut self) -> Result<bool, MergeError> {
        if self.skip_all {
            return Ok(false);
        }
        if let Some(row_count) = self.row_count {
            if self.emitted >= row_count {
                return Ok(false);
            }
        }
        self.emitted += 1;
        self.inner.next()
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        self.inner.value(index)
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_label(&self, index: usize) -> Option<String> {
        self.inner.column_label(index)
    }
}

/// Applies a `ROWNUM` / `ROW_NUMBER()` window. Row numbers start at 1 and the
/// row count bound is absolute. An opened offset (`> x`) skips `x` rows, a closed
/// one (`>= x`) skips `x - 1`; an opened row count (`<= y`) keeps row `y`, a
/// closed one (`< y`) stops before it.
pub struct RowNumberDecorator {
    inner: Box<dyn MergedResult>,
    row_count: Option<u64>,
    row_count_bound_opened: bool,
    /// Rows consumed so far, skipped rows included.
    consumed: u64,
    skip_all: bool,
}

impl RowNumberDecorator {
    pub fn new(
        mut inner: Box<dyn MergedResult>,
        offset: u64,
        offset_bound_opened: bool,
        row_count: Option<u64>,
        row_count_bound_opened: bool,
    ) -> Result<Self, MergeError> {
        let skip = if offset_bound_opened { offset } else { offset.saturating_sub(1) };
        let mut skip_all = false;
        for _ in 0..skip {
            if !inner.next()? {
                skip_all = true;
                break;
            }
        }
        Ok(RowNumberDecorator {
            inner,
            row_count,
            row_count_bound_opened,
            consumed: skip,
            skip_all,
        })
    }
}

impl MergedResult for RowNumberDecorator {
    fn next(&mut self) -> Result<bool, MergeError> {
        if self.skip_all {
            return Ok(false);
        }
        let row_count = match self.row_count {
            Some(row_count) => row_count,
            None => return self.inner.next(),
        };

        let row_number = self.consumed + 1;
        let within = if self.row_count_bound_opened {
            row_number <= row_count
        } else {
            row_number < row_count
        };
        if !within {
            return Ok(false);
        }
        self.consumed = row_number;
        self.inner.next()
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        self.inner.value(index)
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_label(&self, index: usize) -> Option<String> {
        self.inner.column_label(index)
    }
}

/// Hides the derived columns appended to the select list.
pub struct VisibleColumnsDecorator {
    inner: Box<dyn MergedResult>,
    column_count: usize,
}

impl VisibleColumnsDecorator {
    pub fn new(inner: Box<dyn MergedResult>, column_count: usize) -> Self {
        VisibleColumnsDecorator { inner, column_count }
    }
}

impl MergedResult for VisibleColumnsDecorator {
    fn next(&mut self) -> Result<bool, MergeError> {
        self.inner.next()
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        if index >= self.column_count {
            return Err(MergeError::ColumnIndexOutOfRange(index, self.column_count));
        }
        self.inner.value(index)
    }

    fn column_count(&self) -> usize {
        self.column_count
    }

    fn column_label(&self, index: usize) -> Option<String> {
        if index >= self.column_count {
            return None;
        }
        self.inner.column_label(index)
    }
}

/// Decrypts cipher columns read through reversible encryptors.
pub struct EncryptDecorator {
    inner: Box<dyn MergedResult>,
    decryptors: HashMap<usize, Encryptor>,
}

impl EncryptDecorator {
    pub fn new(inner: Box<dyn MergedResult>, decryptors: HashMap<usize, Encryptor>) -> Self {
        EncryptDecorator { inner, decryptors }
    }
}

impl MergedResult for EncryptDecorator {
    fn next(&mut self) -> Result<bool, MergeError> {
        self.inner.next()
    }

    fn value(&self, index: usize) -> Result<SqlValue, MergeError> {
        let value = self.inner.value(index)?;
        match self.decryptors.get(&index) {
            Some(encryptor) => encryptor
                .decrypt(&value)
                .ok_or_else(|| MergeError::Decrypt { index, value: value.to_string() }),
            None => Ok(value),
        }
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_label(&self, index: usize) -> Option<String> {
        self.inner.column_label(index)
    }
}
