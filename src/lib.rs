pub mod analytics;
pub mod api;
pub mod config;
pub mod cursor;
pub mod storage;
