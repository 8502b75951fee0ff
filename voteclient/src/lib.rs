#[macro_use]
extern crate serde;

mod auth;
mod envelope;
mod error;
mod keychain;
mod livestate;
mod machine;
mod model;
mod runtime;
mod serde_base64;
mod token;
mod transport;

pub use auth::*;
pub use envelope::*;
pub use error::*;
pub use keychain::*;
pub use livestate::*;
pub use machine::*;
pub use model::*;
pub use runtime::*;
pub use serde_base64::*;
pub use token::*;
pub use transport::*;

#[cfg(test)]
mod tests;
