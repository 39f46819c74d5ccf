//! The bundled echo handler.

use super::{ContainerOfEnums, EchoService};
use crate::error::ApplicationError;
use crate::protocols::Protocol;
use tracing::info;

/// Hands every message back unchanged and logs it.
#[derive(Debug, Clone, Copy)]
pub struct EchoHandler {
    protocol: Protocol,
}

impl EchoHandler {
    /// `protocol` is only used to label log lines.
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }
}

impl EchoService for EchoHandler {
    fn echo(&self, message: ContainerOfEnums) -> Result<ContainerOfEnums, ApplicationError> {
        info!(protocol = %self.protocol, message = %message, "Echo");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Status;

    #[test]
    fn test_echo_returns_input() {
        let handler = EchoHandler::new(Protocol::Compact);
        let message = ContainerOfEnums {
            status: Some(vec![Status::INACTIVE, Status(99)]),
            ..ContainerOfEnums::default()
        };
        assert_eq!(handler.echo(message.clone()).unwrap(), message);
    }

    #[test]
    fn test_echo_empty_message() {
        let handler = EchoHandler::new(Protocol::Json);
        let message = ContainerOfEnums::empty();
        assert_eq!(handler.echo(message.clone()).unwrap(), message);
    }
}
