//! Listing filters and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditKind;
use crate::permission::SharePermission;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Sort order for secret listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSort {
    #[default]
    Name,
    CreatedAt,
    SharedAt,
    Owner,
}

/// Filter for `list_secrets`. All predicate fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct SecretFilter {
    pub namespace: Option<String>,
    pub zone: Option<String>,
    pub environment: Option<String>,
    pub secret_type: Option<String>,
    /// Only secrets owned by the requesting principal.
    pub owned_only: bool,
    /// Only secrets shared *with* the requesting principal.
    pub shared_only: bool,
    /// Minimum share permission the principal must hold on the row.
    pub permission_at_least: Option<SharePermission>,
    pub page: u32,
    pub page_size: u32,
    pub sort_by: SecretSort,
}

impl SecretFilter {
    /// Normalizes page/page_size into the supported range.
    pub fn normalized(mut self) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        self.page_size = self.page_size.min(MAX_PAGE_SIZE);
        self
    }

    pub fn offset(&self) -> u32 {
        (self.page.max(1) - 1) * self.page_size
    }
}

/// Filter for audit log queries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub kind: Option<AuditKind>,
    pub actor_user_id: Option<i64>,
    pub target_user_id: Option<i64>,
    pub namespace_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

impl AuditFilter {
    pub fn normalized(mut self) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        self.page_size = self.page_size.min(MAX_PAGE_SIZE);
        self
    }

    pub fn offset(&self) -> u32 {
        (self.page.max(1) - 1) * self.page_size
    }
}

/// One page of results plus totals, the shape every listing endpoint
/// returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total: u64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            ((total + page_size as u64 - 1) / page_size as u64) as u32
        };
        Self {
            items,
            page,
            page_size,
            total,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_normalization() {
        let f = SecretFilter::default().normalized();
        assert_eq!(f.page, 1);
        assert_eq!(f.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(f.offset(), 0);

        let f = SecretFilter {
            page: 3,
            page_size: 1000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(f.page_size, MAX_PAGE_SIZE);
        assert_eq!(f.offset(), 2 * MAX_PAGE_SIZE);
    }

    #[test]
    fn page_totals() {
        let page = Page::new(vec![1, 2, 3], 1, 3, 7);
        assert_eq!(page.total_pages, 3);

        let empty: Page<i32> = Page::new(Vec::new(), 1, 20, 0);
        assert_eq!(empty.total_pages, 0);
    }
}
