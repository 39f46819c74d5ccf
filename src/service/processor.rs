//! Turns one buffered call into a reply.
//!
//! The processor reads a message envelope, dispatches `echo` calls to the
//! service and encodes the reply. It works on whatever bytes the connection
//! has buffered: if they do not yet hold a whole message it asks for more.

use super::{ContainerOfEnums, EchoArgs, EchoResult, EchoService};
use crate::error::{ApplicationError, ApplicationErrorKind, ProtocolError, ProtocolResult};
use crate::protocols::{
    InputProtocol, MessageIdentifier, Protocol, TMessageType, TType, WireStruct,
};
use bytes::Bytes;
use tracing::{debug, warn};

const ECHO_METHOD: &str = "echo";

/// Outcome of processing the front of a connection buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// The buffer does not hold a whole message yet.
    NeedData,
    /// One message was handled.
    Done {
        /// Bytes of the buffer the message occupied.
        consumed: usize,
        /// Encoded reply. `None` for one-way calls.
        response: Option<Bytes>,
        /// Whether the connection must be closed after sending the reply.
        close: bool,
    },
}

pub struct Processor<S> {
    service: S,
    protocol: Protocol,
}

impl<S: EchoService> Processor<S> {
    pub fn new(service: S, protocol: Protocol) -> Self {
        Self { service, protocol }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Process the message at the front of `buf`.
    ///
    /// An error means the stream can no longer be trusted and the connection
    /// should be dropped without a reply.
    pub fn process(&self, buf: &[u8]) -> ProtocolResult<ProcessResult> {
        match self.dispatch(buf) {
            Err(ProtocolError::Incomplete) => Ok(ProcessResult::NeedData),
            other => other,
        }
    }

    fn dispatch(&self, buf: &[u8]) -> ProtocolResult<ProcessResult> {
        let mut input = self.protocol.factory().input(buf)?;
        let ident = input.read_message_begin()?;

        match ident.message_type {
            TMessageType::Call | TMessageType::Oneway if ident.name == ECHO_METHOD => {
                let args = match read_args(input.as_mut()) {
                    Ok(args) => args,
                    Err(ProtocolError::Incomplete) => return Err(ProtocolError::Incomplete),
                    Err(e) => {
                        warn!(error = %e, "Failed to decode echo arguments");
                        let error =
                            ApplicationError::new(ApplicationErrorKind::ProtocolError, e.to_string());
                        return Ok(ProcessResult::Done {
                            consumed: buf.len(),
                            response: self.reply_unless_oneway(&ident, Err(error))?,
                            close: true,
                        });
                    }
                };
                let consumed = input.consumed();
                let message = args.message.unwrap_or_else(ContainerOfEnums::empty);
                let outcome = self.service.echo(message).map(|echoed| EchoResult {
                    success: Some(echoed),
                });
                Ok(ProcessResult::Done {
                    consumed,
                    response: self.reply_unless_oneway(&ident, outcome)?,
                    close: false,
                })
            }
            TMessageType::Call | TMessageType::Oneway => {
                skip_args(input.as_mut())?;
                debug!(method = %ident.name, "Unknown method");
                let error = ApplicationError::new(
                    ApplicationErrorKind::UnknownMethod,
                    format!("Invalid method name: '{}'", ident.name),
                );
                Ok(ProcessResult::Done {
                    consumed: input.consumed(),
                    response: self.reply_unless_oneway(&ident, Err(error))?,
                    close: false,
                })
            }
            TMessageType::Reply | TMessageType::Exception => {
                skip_args(input.as_mut())?;
                debug!(message_type = ?ident.message_type, "Unexpected message type");
                let error = ApplicationError::new(
                    ApplicationErrorKind::InvalidMessageType,
                    format!("Unexpected message type {:?}", ident.message_type),
                );
                Ok(ProcessResult::Done {
                    consumed: input.consumed(),
                    response: Some(self.encode_exception(&ident, &error)?),
                    close: false,
                })
            }
        }
    }

    fn reply_unless_oneway(
        &self,
        ident: &MessageIdentifier,
        outcome: Result<EchoResult, ApplicationError>,
    ) -> ProtocolResult<Option<Bytes>> {
        if ident.message_type == TMessageType::Oneway {
            return Ok(None);
        }
        let reply = match outcome {
            Ok(result) => self.encode(
                &MessageIdentifier::new(&ident.name, TMessageType::Reply, ident.sequence_number),
                &result,
            )?,
            Err(error) => self.encode_exception(ident, &error)?,
        };
        Ok(Some(reply))
    }

    fn encode_exception(
        &self,
        ident: &MessageIdentifier,
        error: &ApplicationError,
    ) -> ProtocolResult<Bytes> {
        self.encode(
            &MessageIdentifier::new(&ident.name, TMessageType::Exception, ident.sequence_number),
            error,
        )
    }

    fn encode<T: WireStruct>(&self, ident: &MessageIdentifier, body: &T) -> ProtocolResult<Bytes> {
        let mut output = self.protocol.factory().output();
        output.write_message_begin(ident)?;
        body.write(output.as_mut())?;
        output.write_message_end()?;
        Ok(output.take_output())
    }
}

fn read_args(input: &mut dyn InputProtocol) -> ProtocolResult<EchoArgs> {
    let args = EchoArgs::read(input)?;
    input.read_message_end()?;
    Ok(args)
}

fn skip_args(input: &mut dyn InputProtocol) -> ProtocolResult<()> {
    input.skip(TType::Struct)?;
    input.read_message_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{EchoHandler, Status};

    struct Failing;

    impl EchoService for Failing {
        fn echo(&self, _message: ContainerOfEnums) -> Result<ContainerOfEnums, ApplicationError> {
            Err(ApplicationError::new(
                ApplicationErrorKind::InternalError,
                "boom",
            ))
        }
    }

    fn request(protocol: Protocol, ident: &MessageIdentifier, message: &ContainerOfEnums) -> Bytes {
        let mut output = protocol.factory().output();
        output.write_message_begin(ident).unwrap();
        EchoArgs {
            message: Some(message.clone()),
        }
        .write(output.as_mut())
        .unwrap();
        output.write_message_end().unwrap();
        output.take_output()
    }

    fn sample() -> ContainerOfEnums {
        ContainerOfEnums {
            status: Some(vec![Status::ACTIVE, Status::INACTIVE]),
            ..ContainerOfEnums::default()
        }
    }

    fn done(result: ProcessResult) -> (usize, Option<Bytes>, bool) {
        match result {
            ProcessResult::Done {
                consumed,
                response,
                close,
            } => (consumed, response, close),
            ProcessResult::NeedData => panic!("expected a complete message"),
        }
    }

    fn decode_reply(
        protocol: Protocol,
        bytes: &[u8],
    ) -> (MessageIdentifier, Result<EchoResult, ApplicationError>) {
        let mut input = protocol.factory().input(bytes).unwrap();
        let ident = input.read_message_begin().unwrap();
        let body = if ident.message_type == TMessageType::Exception {
            Err(ApplicationError::read(input.as_mut()).unwrap())
        } else {
            Ok(EchoResult::read(input.as_mut()).unwrap())
        };
        input.read_message_end().unwrap();
        (ident, body)
    }

    #[test]
    fn test_echo_reply_every_protocol() {
        for protocol in Protocol::ALL {
            let processor = Processor::new(EchoHandler::new(protocol), protocol);
            let call = MessageIdentifier::new("echo", TMessageType::Call, 11);
            let bytes = request(protocol, &call, &sample());

            let (consumed, response, close) = done(processor.process(&bytes).unwrap());
            assert_eq!(consumed, bytes.len());
            assert!(!close);

            let (ident, body) = decode_reply(protocol, &response.unwrap());
            assert_eq!(ident, MessageIdentifier::new("echo", TMessageType::Reply, 11));
            assert_eq!(body.unwrap().success, Some(sample()), "protocol {protocol}");
        }
    }

    #[test]
    fn test_partial_message_needs_data() {
        let protocol = Protocol::Binary;
        let processor = Processor::new(EchoHandler::new(protocol), protocol);
        let call = MessageIdentifier::new("echo", TMessageType::Call, 1);
        let bytes = request(protocol, &call, &sample());

        for cut in [0, 3, bytes.len() - 1] {
            assert_eq!(
                processor.process(&bytes[..cut]).unwrap(),
                ProcessResult::NeedData
            );
        }
    }

    #[test]
    fn test_consumes_only_first_message() {
        let protocol = Protocol::Compact;
        let processor = Processor::new(EchoHandler::new(protocol), protocol);
        let first = request(
            protocol,
            &MessageIdentifier::new("echo", TMessageType::Call, 1),
            &sample(),
        );
        let second = request(
            protocol,
            &MessageIdentifier::new("echo", TMessageType::Call, 2),
            &ContainerOfEnums::empty(),
        );
        let mut both = first.to_vec();
        both.extend_from_slice(&second);

        let (consumed, _, _) = done(processor.process(&both).unwrap());
        assert_eq!(consumed, first.len());
    }

    #[test]
    fn test_unknown_method() {
        let protocol = Protocol::Json;
        let processor = Processor::new(EchoHandler::new(protocol), protocol);
        let call = MessageIdentifier::new("ping", TMessageType::Call, 5);
        let bytes = request(protocol, &call, &sample());

        let (consumed, response, close) = done(processor.process(&bytes).unwrap());
        assert_eq!(consumed, bytes.len());
        assert!(!close);

        let (ident, body) = decode_reply(protocol, &response.unwrap());
        assert_eq!(ident, MessageIdentifier::new("ping", TMessageType::Exception, 5));
        let error = body.unwrap_err();
        assert_eq!(error.kind, ApplicationErrorKind::UnknownMethod);
        assert_eq!(error.message, "Invalid method name: 'ping'");
    }

    #[test]
    fn test_reply_message_type_rejected() {
        let protocol = Protocol::Binary;
        let processor = Processor::new(EchoHandler::new(protocol), protocol);
        let reply = MessageIdentifier::new("echo", TMessageType::Reply, 3);
        let bytes = request(protocol, &reply, &sample());

        let (_, response, _) = done(processor.process(&bytes).unwrap());
        let (_, body) = decode_reply(protocol, &response.unwrap());
        assert_eq!(body.unwrap_err().kind, ApplicationErrorKind::InvalidMessageType);
    }

    #[test]
    fn test_oneway_has_no_reply() {
        let protocol = Protocol::SimpleJson;
        let processor = Processor::new(EchoHandler::new(protocol), protocol);
        let oneway = MessageIdentifier::new("echo", TMessageType::Oneway, 0);
        let bytes = request(protocol, &oneway, &sample());

        let (consumed, response, close) = done(processor.process(&bytes).unwrap());
        assert_eq!(consumed, bytes.len());
        assert_eq!(response, None);
        assert!(!close);
    }

    #[test]
    fn test_service_error_becomes_exception() {
        let protocol = Protocol::Compact;
        let processor = Processor::new(Failing, protocol);
        let call = MessageIdentifier::new("echo", TMessageType::Call, 9);
        let bytes = request(protocol, &call, &sample());

        let (_, response, _) = done(processor.process(&bytes).unwrap());
        let (ident, body) = decode_reply(protocol, &response.unwrap());
        assert_eq!(ident.message_type, TMessageType::Exception);
        assert_eq!(ident.sequence_number, 9);
        assert_eq!(
            body.unwrap_err(),
            ApplicationError::new(ApplicationErrorKind::InternalError, "boom")
        );
    }

    #[test]
    fn test_bad_arguments_close_connection() {
        let protocol = Protocol::Json;
        let processor = Processor::new(EchoHandler::new(protocol), protocol);
        let bytes = br#"[1,"echo",1,4,{"1":{"rec":{"10":{"lst":["str",1,"x"]}}}}]"#;

        let (consumed, response, close) = done(processor.process(bytes).unwrap());
        assert_eq!(consumed, bytes.len());
        assert!(close);
        let (_, body) = decode_reply(protocol, &response.unwrap());
        assert_eq!(body.unwrap_err().kind, ApplicationErrorKind::ProtocolError);
    }

    #[test]
    fn test_garbage_envelope_is_an_error() {
        let protocol = Protocol::Json;
        let processor = Processor::new(EchoHandler::new(protocol), protocol);
        assert!(processor.process(b"{\"not\":\"a message\"}").is_err());
    }
}
