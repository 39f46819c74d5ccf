//! The echo service: message types, the capability trait, the bundled
//! handler, and the processor and client that carry calls over a protocol.

pub mod client;
pub mod handler;
pub mod processor;
pub mod types;

pub use client::EchoClient;
pub use handler::EchoHandler;
pub use processor::{ProcessResult, Processor};
pub use types::{
    ContainerOfEnums, DefinedValues, EchoArgs, EchoResult, HeterogeneousValues, Status,
    UndefinedValues,
};

use crate::error::ApplicationError;

/// What a server offers for the `echo` method.
///
/// Errors are sent back to the caller as an `EXCEPTION` reply.
pub trait EchoService {
    fn echo(&self, message: ContainerOfEnums) -> Result<ContainerOfEnums, ApplicationError>;
}
