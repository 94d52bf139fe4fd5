//! Pagination envelope shared by both query modes

use safemode_common::QueryOptions;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

/// Wrap one page of results; `page` is 1-based and 0 is read as 1
pub fn paginate<T>(data: Vec<T>, total: usize, page: usize, limit: usize) -> Page<T> {
    let page = page.max(1);
    let pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
    Page {
        data,
        pagination: Pagination {
            page,
            limit,
            total,
            pages,
            has_more: page < pages,
        },
    }
}

/// Skip/limit options selecting one page
pub fn page_options(page: usize, limit: usize) -> QueryOptions {
    QueryOptions::new()
        .skip(page.max(1).saturating_sub(1).saturating_mul(limit))
        .limit(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate() {
        let page = paginate(vec![1, 2, 3], 23, 2, 10);
        assert_eq!(page.pagination.pages, 3);
        assert!(page.pagination.has_more);

        let last = paginate(vec![21, 22, 23], 23, 3, 10);
        assert!(!last.pagination.has_more);

        let empty = paginate(Vec::<u8>::new(), 0, 0, 10);
        assert_eq!(empty.pagination.page, 1);
        assert_eq!(empty.pagination.pages, 0);
        assert!(!empty.pagination.has_more);
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(paginate(vec!["a"], 1, 1, 20)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "data": ["a"],
                "pagination": {"page": 1, "limit": 20, "total": 1, "pages": 1, "hasMore": false}
            })
        );
    }

    #[test]
    fn test_page_options() {
        let options = page_options(3, 10);
        assert_eq!(options.skip, Some(20));
        assert_eq!(options.limit, Some(10));
        assert_eq!(page_options(0, 10).skip, Some(0));
    }
}
