pub mod base;
pub mod cache;
pub mod drift_search;
pub mod global_search;
pub mod local_search;
pub mod router;
