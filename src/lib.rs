pub mod affinity;
pub mod bridge;
pub mod config;
pub mod host;
pub mod lifecycle;
pub mod mcp;
pub mod models;
