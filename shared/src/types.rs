//! Common types used by list endpoints

use serde::{Deserialize, Serialize};

/// Largest page size a client may request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Pagination parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl Pagination {
    /// Build from optional query values, clamping to sane bounds
    pub fn from_query(page: Option<u32>, limit: Option<u32>) -> Self {
        let defaults = Self::default();
        Self {
            page: page.unwrap_or(defaults.page).max(1),
            limit: limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, pagination: Pagination, total: i64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(pagination, total),
        }
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    pub fn new(pagination: Pagination, total: i64) -> Self {
        let limit = i64::from(pagination.limit.max(1));
        Self {
            page: pagination.page,
            limit: pagination.limit,
            total,
            total_pages: (total.max(0) + limit - 1) / limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination::from_query(Some(0), Some(1000));
        assert_eq!(p, Pagination { page: 1, limit: MAX_PAGE_SIZE });
        assert_eq!(Pagination::from_query(Some(3), Some(10)).offset(), 20);
    }

    #[test]
    fn test_total_pages() {
        let p = Pagination { page: 1, limit: 20 };
        assert_eq!(PaginationMeta::new(p, 0).total_pages, 0);
        assert_eq!(PaginationMeta::new(p, 20).total_pages, 1);
        assert_eq!(PaginationMeta::new(p, 21).total_pages, 2);
    }
}
