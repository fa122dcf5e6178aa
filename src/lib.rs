pub mod protocol;
pub mod registry;
pub mod monitor;
pub mod service;
pub mod config;
