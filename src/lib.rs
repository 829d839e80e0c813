pub mod config;
pub mod error;
pub mod gateway;
pub mod indexer;
pub mod logging;
pub mod models;
pub mod rag;
pub mod server;
pub mod service;
