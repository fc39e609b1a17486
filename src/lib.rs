pub mod api;
pub mod auth;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod rate_limit;
pub mod sweeper;
pub mod wal;
