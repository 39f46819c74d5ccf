//! enum-echo: a Thrift echo server for cross-language interoperability
//! tests.
//!
//! The server speaks one of four Thrift wire protocols, selected at startup,
//! and answers every `echo` call with the message it was given. The message
//! type, `ContainerOfEnums`, exercises enums with implicit, explicit and
//! mixed codes, alone and inside lists, sets and maps.

pub mod config;
pub mod error;
pub mod protocols;
pub mod server;
pub mod service;
mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use protocols::Protocol;
pub use server::Server;
