//! Shared types for the mini-app worker workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
