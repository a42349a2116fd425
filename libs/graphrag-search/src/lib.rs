pub mod config;
pub mod context_builder;
pub mod error;
pub mod llm;
pub mod models;
pub mod retrieval;
pub mod search;
pub mod vector_stores;
