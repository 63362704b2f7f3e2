//! Common types shared by the request orchestrator crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
