pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod fsutil;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod schemas;
