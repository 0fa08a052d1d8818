//! Index view pagination. Out-of-range pages clamp to the nearest valid
//! page instead of erroring; the display range shows at most five entries
//! centered on the current page.

/// A resolved page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub num_pages: usize,
    pub total: usize,
    pub per_page: usize,
}

impl Page {
    /// Resolve a requested page against a listing of `total` items.
    ///
    /// `requested` below 1 clamps to 1, beyond the last page clamps to the
    /// last page. An empty listing still has one (empty) page.
    pub fn resolve(total: usize, per_page: usize, requested: i64) -> Self {
        let per_page = per_page.max(1);
        let num_pages = total.div_ceil(per_page).max(1);
        let number = requested.clamp(1, num_pages as i64) as usize;
        Page {
            number,
            num_pages,
            total,
            per_page,
        }
    }

    pub fn offset(&self) -> usize {
        (self.number - 1) * self.per_page
    }

    /// Page numbers to display: a window of at most five pages centered on
    /// the current one, clamped at both ends.
    pub fn range(&self) -> Vec<usize> {
        let start = self.number.saturating_sub(2).max(1);
        let end = (self.number + 2).min(self.num_pages);
        (start..=end).collect()
    }
}

/// Parse a raw `page` query value. Non-integer or missing values fall back
/// to page 1.
pub fn parse_page(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.parse::<i64>().ok()).unwrap_or(1)
}
