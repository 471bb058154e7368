pub mod adapter;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod types;
