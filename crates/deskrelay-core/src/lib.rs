pub mod auth;
pub mod config;
pub mod observability;
pub mod protocol;
