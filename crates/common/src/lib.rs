//! Types shared by the session refresh crates and the proxy service

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
