//! TNS API Library
//!
//! Presence and notification server for the teacher notification system:
//! kiosk and teacher event streams, paging, and the timetable-driven
//! availability scheduler.

pub mod config;
pub mod error;
pub mod presence;
pub mod push;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
