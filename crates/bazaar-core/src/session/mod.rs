//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: `Identity`, `IssuedToken` and the process-wide `Session` value
//! - `endpoint`: `CredentialEndpoint` (token issuer) and `TokenSource`
//!   (what authenticated callers need from the token lifecycle)

mod endpoint;
mod model;

pub use endpoint::{CredentialEndpoint, TokenSource};
pub use model::{Identity, IssuedToken, Session};
