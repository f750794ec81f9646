//! Caching forwarding proxy library.

// Core subsystems
pub mod config;
pub mod error;
pub mod net;
pub mod protocol;

// Traffic management
pub mod cache;
pub mod forward;
pub mod health;
pub mod load_balancer;
pub mod upstream;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use lifecycle::{ProxyServer, Shutdown};
