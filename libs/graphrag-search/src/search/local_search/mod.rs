pub mod expander;
pub mod prompts;
pub mod search;
