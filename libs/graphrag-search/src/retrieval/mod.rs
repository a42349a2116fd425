pub mod community_reports;
pub mod entities;
pub mod graph;
