//! Fixed-size page file with a reference-counted page cache.

mod frame;
mod store;

/// Layout helpers for ordinary data pages.
pub mod data_page;
/// Validity stamp kept in page 1.
pub mod page_one;

pub use frame::Page;
pub use store::{PageHandle, PageLoader, PageStore, MIN_CACHE_PAGES};

/// Size of every page in the `.db` file.
pub const PAGE_SIZE: usize = 8192;
