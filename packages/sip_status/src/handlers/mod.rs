pub mod auth;
pub mod events;
pub mod health;
pub mod test_update;

// Re-export all handlers for easy route registration
pub use auth::{login_handler, logout_handler};
pub use events::{ClientAddr, events_handler};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use test_update::test_update_handler;
