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


use super::segment::Span;
use crate::value::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationValueKind {
    Literal(u64),
    Parameter(usize),
}

/// One bound of a LIMIT clause or of a row-number predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationValue {
    pub span: Span,
    pub kind: PaginationValueKind,
    /// Offsets: `ROWNUM > x` is opened, `ROWNUM >= x` is not. Row counts:
    /// `ROWNUM <= y` is opened, `ROWNUM < y` is not. Always false for LIMIT.
    pub bound_opened: bool,
}

impl PaginationValue {
    pub fn literal(span: Span, value: u64) -> Self {
        PaginationValue { span, kind: PaginationValueKind::Literal(value), bound_opened: false }
    }

    pub fn parameter(span: Span, index: usize) -> Self {
        PaginationValue { span, kind: PaginationValueKind::Parameter(index), bound_opened: false }
    }

    pub fn opened(mut self, opened: bool) -> Self {
        self.bound_opened = opened;
        self
    }

    pub fn parameter_index(&self) -> Option<usize> {
        match self.kind {
            PaginationValueKind::Parameter(idx) => Some(idx),
            PaginationValueKind::Literal(_) => None,
        }
    }

    /// Resolves the bound. Placeholders without a usable value resolve to `None`.
    pub fn value(&self, params: &[SqlValue]) -> Option<u64> {
        match self.kind {
            PaginationValueKind::Literal(v) => Some(v),
            PaginationValueKind::Parameter(idx) => params.get(idx).and_then(|v| v.as_u64()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaginationContext {
    pub offset: Option<PaginationValue>,
    pub row_count: Option<PaginationValue>,
}

impl PaginationContext {
    pub fn new(offset: Option<PaginationValue>, row_count: Option<PaginationValue>) -> Self {
        PaginationContext { offset, row_count }
    }

    pub fn has_pagination(&self) -> bool {
        self.offset.is_some() || self.row_count.is_some()
    }

    pub fn actual_offset(&self, params: &[SqlValue]) -> u64 {
        self.offset.and_then(|v| v.value(params)).unwrap_or(0)
    }

    pub fn actual_row_count(&self, params: &[SqlValue]) -> Option<u64> {
        self.row_count.and_then(|v| v.value(params))
    }

    pub fn is_offset_bound_opened(&self) -> bool {
        self.offset.map_or(false, |v| v.bound_opened)
    }

    pub fn is_row_count_bound_opened(&self) -> bool {
        self.row_count.map_or(false, |v| v.bound_opened)
    }

    /// Offset sent to each shard of a multi-route statement.
    pub fn revised_offset(&self) -> u64 {
        0
    }

    /// Row count sent to each shard of a multi-route statement. `max_row_count`
    /// applies when every row must reach the merger. A row-number bound is
    /// already absolute, so only LIMIT counts are widened by the offset.
    pub fn revised_row_count(
        &self,
        params: &[SqlValue],
        row_number_style: bool,
        max_row_count: Option<u64>,
    ) -> Option<u64> {
        if let Some(max) = max_row_count {
            return Some(max);
        }

        let row_count = self.actual_row_count(params)?;
        if row_number_style {
            Some(row_count)
        } else {
            Some(self.actual_offset(params).saturating_add(row_count))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_revised_row_count_for_limit() {
        // LIMIT ?, ?
        let pagination = PaginationContext::new(
            Some(PaginationValue::parameter(Span::new(40, 40), 0)),
            Some(PaginationValue::parameter(Span::new(43, 43), 1)),
        );
        let params = vec![SqlValue::Int(2), SqlValue::Int(3)];
        assert_eq!(pagination.actual_offset(&params), 2);
        assert_eq!(pagination.actual_row_count(&params), Some(3));
        assert_eq!(pagination.revised_row_count(&params, false, None), Some(5));
        assert_eq!(pagination.revised_row_count(&params, false, Some(u32::MAX as u64)), Some(u32::MAX as u64));
    }

    #[test]
    fn test_revised_row_count_for_row_number() {
        let pagination = PaginationContext::new(
            Some(PaginationValue::literal(Span::new(80, 80), 2).opened(true)),
            Some(PaginationValue::literal(Span::new(60, 60), 4)),
        );
        assert_eq!(pagination.revised_row_count(&[], true, None), Some(4));
        assert!(pagination.is_offset_bound_opened());
        assert!(!pagination.is_row_count_bound_opened());
    }
}
