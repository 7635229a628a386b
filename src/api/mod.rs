//! API layer
//!
//! HTTP handlers for the application behind the auth guard.

mod app;

pub use app::app_router;
