//! Address translation: the per-core page-table walker and its per-level
//! lookup caches.

pub mod ptw;
pub mod ptw_cache;

pub use ptw::PageTableWalker;
pub use ptw_cache::PtwCache;
