pub mod chat;
pub mod checkin;
pub mod error;
pub mod follow;
pub mod geo;
pub mod ids;

pub use error::{CoreError, CoreResult};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Turns 1-based `page`/`page_size` query values into `(offset, limit)`.
/// Missing or zero values fall back to page 1 and the default size.
pub fn page_window(page: Option<u32>, page_size: Option<u32>) -> (u32, u32) {
    let page = page.filter(|p| *p >= 1).unwrap_or(1);
    let size = page_size
        .filter(|s| *s >= 1)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    ((page - 1).saturating_mul(size), size)
}
