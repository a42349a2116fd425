pub mod base;
pub mod retry;
pub mod utils;
