//! Pagination types shared by every list query.

use serde::{Deserialize, Serialize};

/// Upper bound for `per_page`
pub const MAX_PER_PAGE: u32 = 100;

/// Pagination parameters for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    /// 1-based
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 10,
        }
    }
}

impl ListParams {
    /// `page` is raised to 1 and `per_page` clamped to `1..=MAX_PER_PAGE`
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    /// Rows to skip, for `OFFSET`
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * self.limit()
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

/// One page of a list plus the totals needed to page through it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Matching rows across all pages
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, params: &ListParams) -> Self {
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
            total_pages: total_pages(total, params.per_page),
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

/// `ceil(total / per_page)`, zero for an empty set
pub fn total_pages(total: i64, per_page: u32) -> u32 {
    if total <= 0 || per_page == 0 {
        return 0;
    }
    let per_page = per_page as i64;
    ((total + per_page - 1) / per_page) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_list_params_clamps() {
        let params = ListParams::new(0, 0);
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, 1);

        let params = ListParams::new(3, 500);
        assert_eq!(params.per_page, MAX_PER_PAGE);
        assert_eq!(params.offset(), 200);
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }

    #[test]
    fn test_has_next_and_prev() {
        let params = ListParams::new(2, 10);
        let result: PagedResult<i32> = PagedResult::new(vec![1; 10], 25, &params);
        assert!(result.has_next());
        assert!(result.has_prev());

        let params = ListParams::new(3, 10);
        let result: PagedResult<i32> = PagedResult::new(vec![1; 5], 25, &params);
        assert!(!result.has_next());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn property_page_slice_is_bounded(
            total in 0usize..500,
            page in 0u32..60,
            per_page in 0u32..150,
        ) {
            let params = ListParams::new(page, per_page);
            let data: Vec<usize> = (0..total).collect();
            let slice: Vec<usize> = data
                .iter()
                .copied()
                .skip(params.offset() as usize)
                .take(params.limit() as usize)
                .collect();

            prop_assert!(slice.len() <= params.per_page as usize);
            let offset = params.offset() as usize;
            if offset < total {
                prop_assert_eq!(slice.len(), (params.per_page as usize).min(total - offset));
            } else {
                prop_assert!(slice.is_empty());
            }

            let result = PagedResult::new(slice, total as i64, &params);
            let pages = result.total_pages as usize;
            prop_assert!(pages * params.per_page as usize >= total);
            if pages > 0 {
                prop_assert!((pages - 1) * (params.per_page as usize) < total);
            }
        }
    }
}
