pub mod prompts;
pub mod search;
pub mod state;
