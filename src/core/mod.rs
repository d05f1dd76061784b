pub mod types;
pub mod config;
pub mod error;
pub mod index;
