pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod store;
pub mod types;
