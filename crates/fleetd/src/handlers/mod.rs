//! HTTP request handlers.

pub mod fleet;
pub mod health;

pub use fleet::{
    add_backend_handler, auto_switch_handler, health_checks_handler, set_active_handler,
    statistics_handler, status_handler, switch_primary_handler,
};
pub use health::health_handler;
