pub mod map;
pub mod prompts;
pub mod reduce;
pub mod search;
