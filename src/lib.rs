pub mod common;
pub mod config;
pub mod dist_table;
pub mod error;
pub mod instance;
pub mod map;
pub mod post_processing;
pub mod scenario;
pub mod solver;
pub mod stat;
