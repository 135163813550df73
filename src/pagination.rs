//! Pagination and range selection
//!
//! Two mutually exclusive ways to address a window of an ordered collection:
//! page mode (`page` + `page_size`) and range mode (a 1-based inclusive
//! `"start-end"` string). Both validate their bounds instead of clamping to
//! the last available window.

use serde::Serialize;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Width of the ranges suggested for retrieving a whole collection
pub const SUGGESTED_RANGE_WIDTH: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("Please use either 'page' or 'file_range', not both")]
    ConflictingModes,

    #[error("Invalid file_range format '{0}'. Use '1-10' or '11-20'")]
    InvalidRange(String),

    #[error("Page number must be 1 or greater.")]
    InvalidPage,

    #[error("Page size must be 1 or greater.")]
    InvalidPageSize,

    #[error("Page {page} does not exist. The result has {total_pages} page(s).")]
    PageOutOfRange { page: usize, total_pages: usize },

    #[error("Range {start}-{end} starts after the last item. The result has {total} item(s).")]
    RangeOutOfRange {
        start: usize,
        end: usize,
        total: usize,
    },
}

/// A requested window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PageRequest {
    Page { page: usize, page_size: usize },
    /// 1-based, inclusive
    Range { start: usize, end: usize },
}

impl PageRequest {
    /// Page mode request; both values must be at least 1
    pub fn page(page: i64, page_size: i64) -> Result<Self, PaginationError> {
        if page < 1 {
            return Err(PaginationError::InvalidPage);
        }
        if page_size < 1 {
            return Err(PaginationError::InvalidPageSize);
        }
        Ok(PageRequest::Page {
            page: page as usize,
            page_size: page_size as usize,
        })
    }

    /// Parse a `"start-end"` range
    pub fn parse_range(range: &str) -> Result<Self, PaginationError> {
        let invalid = || PaginationError::InvalidRange(range.to_string());

        let (start, end) = range.split_once('-').ok_or_else(invalid)?;
        let start: usize = start.trim().parse().map_err(|_| invalid())?;
        let end: usize = end.trim().parse().map_err(|_| invalid())?;

        if start == 0 || end < start {
            return Err(invalid());
        }
        Ok(PageRequest::Range { start, end })
    }

    /// Resolve tool arguments into a request.
    ///
    /// `page` and `file_range` together are rejected; with neither, page 1 is
    /// assumed.
    pub fn from_args(
        page: Option<i64>,
        page_size: i64,
        file_range: Option<&str>,
    ) -> Result<Self, PaginationError> {
        match (page, file_range) {
            (Some(_), Some(_)) => Err(PaginationError::ConflictingModes),
            (None, Some(range)) => Self::parse_range(range),
            (page, None) => Self::page(page.unwrap_or(1), page_size),
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, PageRequest::Range { .. })
    }

    /// Compute the window over `total` items
    pub fn window(&self, total: usize) -> Result<PageWindow, PaginationError> {
        match *self {
            PageRequest::Page { page, page_size } => {
                let total_pages = total.div_ceil(page_size);
                let start = (page - 1).saturating_mul(page_size);
                if start >= total {
                    return Err(PaginationError::PageOutOfRange { page, total_pages });
                }
                let end = (start + page_size).min(total);
                Ok(PageWindow {
                    request: *self,
                    total,
                    total_pages,
                    start,
                    end,
                })
            }
            PageRequest::Range { start, end } => {
                if start > total {
                    return Err(PaginationError::RangeOutOfRange { start, end, total });
                }
                let start_idx = start - 1;
                let end_idx = end.min(total);
                Ok(PageWindow {
                    request: *self,
                    total,
                    total_pages: total.div_ceil(end_idx - start_idx),
                    start: start_idx,
                    end: end_idx,
                })
            }
        }
    }
}

impl fmt::Display for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageRequest::Page { page, .. } => write!(f, "page={}", page),
            PageRequest::Range { start, end } => write!(f, "file_range='{}-{}'", start, end),
        }
    }
}

/// A validated window: zero-based `[start, end)` plus navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub request: PageRequest,
    pub total: usize,
    /// `ceil(total / width)`; in range mode the width is the clamped range
    pub total_pages: usize,
    pub start: usize,
    pub end: usize,
}

impl PageWindow {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.start.min(items.len())..self.end.min(items.len())]
    }

    /// The window after this one, same width
    pub fn next(&self) -> Option<PageRequest> {
        match self.request {
            PageRequest::Page { page, page_size } => (page < self.total_pages)
                .then_some(PageRequest::Page {
                    page: page + 1,
                    page_size,
                }),
            PageRequest::Range { .. } => (self.end < self.total).then(|| PageRequest::Range {
                start: self.end + 1,
                end: (self.end + self.len()).min(self.total),
            }),
        }
    }

    /// The window before this one, same width
    pub fn previous(&self) -> Option<PageRequest> {
        match self.request {
            PageRequest::Page { page, page_size } => (page > 1).then_some(PageRequest::Page {
                page: page - 1,
                page_size,
            }),
            PageRequest::Range { .. } => (self.start > 0).then(|| PageRequest::Range {
                start: (self.start + 1).saturating_sub(self.len()).max(1),
                end: self.start,
            }),
        }
    }
}

/// Ranges of `width` items covering `total` items, e.g. `["1-10", "11-20", "21-25"]`
pub fn suggested_ranges(total: usize, width: usize) -> Vec<String> {
    let width = width.max(1);
    (0..total)
        .step_by(width)
        .map(|i| format!("{}-{}", i + 1, (i + width).min(total)))
        .collect()
}
