pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventHub, EventKind, MediaEvent};
