pub mod admission;
pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod state;
pub mod token_bucket;
pub mod ui;
