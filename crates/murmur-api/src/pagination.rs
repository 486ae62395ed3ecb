use serde::Deserialize;

const MAX_LIMIT: u32 = 100;

/// `?page=&limit=` offset pagination; `page` is zero-based.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    10
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 0,
            limit: default_limit(),
        }
    }
}

impl PageQuery {
    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        self.page.saturating_mul(self.limit())
    }

    /// The following page index if rows remain past this one.
    pub fn next_page(&self, total: i64) -> Option<u32> {
        let seen = i64::from(self.page.saturating_add(1)) * i64::from(self.limit());
        (seen < total).then(|| self.page + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_page_only_when_rows_remain() {
        let q = PageQuery { page: 0, limit: 10 };
        assert_eq!(q.offset(), 0);
        assert_eq!(q.next_page(10), None);
        assert_eq!(q.next_page(11), Some(1));

        let q = PageQuery { page: 2, limit: 5 };
        assert_eq!(q.offset(), 10);
        assert_eq!(q.next_page(15), None);
        assert_eq!(q.next_page(16), Some(3));
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(PageQuery { page: 0, limit: 0 }.limit(), 1);
        assert_eq!(PageQuery { page: 0, limit: 5000 }.limit(), MAX_LIMIT);
    }
}
