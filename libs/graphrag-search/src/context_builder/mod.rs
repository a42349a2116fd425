pub mod community_context;
pub mod context_table;
pub mod local_context;
