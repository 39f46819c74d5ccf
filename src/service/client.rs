//! Blocking client for the echo service.

use super::{ContainerOfEnums, EchoArgs, EchoResult};
use crate::error::{ApplicationError, ApplicationErrorKind, Error, ProtocolError, ProtocolResult, Result};
use crate::protocols::{MessageIdentifier, Protocol, TMessageType, WireStruct};
use crate::transport::{self, READ_CHUNK};
use bytes::{Buf, BytesMut};
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

type DecodedReply = (MessageIdentifier, std::result::Result<EchoResult, ApplicationError>, usize);

/// Calls `echo` on a server over one TCP connection.
pub struct EchoClient {
    stream: TcpStream,
    protocol: Protocol,
    buffer: BytesMut,
    next_seq: i32,
}

impl EchoClient {
    pub fn connect(addr: impl ToSocketAddrs, protocol: Protocol) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            protocol,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            next_seq: 1,
        })
    }

    pub fn echo(&mut self, message: &ContainerOfEnums) -> Result<ContainerOfEnums> {
        self.call("echo", message)
    }

    /// Call `method` with `message` as its only argument.
    ///
    /// An `EXCEPTION` reply comes back as `Error::Application`.
    pub fn call(&mut self, method: &str, message: &ContainerOfEnums) -> Result<ContainerOfEnums> {
        let seq = self.send(method, TMessageType::Call, message)?;
        let (ident, body) = self.receive()?;

        if ident.name != method {
            return Err(ApplicationError::new(
                ApplicationErrorKind::WrongMethodName,
                format!("expected reply to '{method}', got '{}'", ident.name),
            )
            .into());
        }
        if ident.sequence_number != seq {
            return Err(ApplicationError::new(
                ApplicationErrorKind::BadSequenceId,
                format!("expected sequence id {seq}, got {}", ident.sequence_number),
            )
            .into());
        }

        body?.success.ok_or_else(|| {
            ApplicationError::new(ApplicationErrorKind::MissingResult, "echo returned no result")
                .into()
        })
    }

    /// Send `echo` as a one-way call. The server sends nothing back.
    pub fn echo_oneway(&mut self, message: &ContainerOfEnums) -> Result<()> {
        self.send("echo", TMessageType::Oneway, message).map(|_| ())
    }

    fn send(
        &mut self,
        method: &str,
        message_type: TMessageType,
        message: &ContainerOfEnums,
    ) -> Result<i32> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let mut output = self.protocol.factory().output();
        output.write_message_begin(&MessageIdentifier::new(method, message_type, seq))?;
        EchoArgs {
            message: Some(message.clone()),
        }
        .write(output.as_mut())?;
        output.write_message_end()?;
        let request = output.take_output();

        trace!(method, seq, bytes = request.len(), "Sending call");
        self.stream.write_all(&request)?;
        self.stream.flush()?;
        Ok(seq)
    }

    fn receive(
        &mut self,
    ) -> Result<(MessageIdentifier, std::result::Result<EchoResult, ApplicationError>)> {
        loop {
            if !self.buffer.is_empty() {
                match decode_reply(self.protocol, &self.buffer) {
                    Ok((ident, body, consumed)) => {
                        self.buffer.advance(consumed);
                        return Ok((ident, body));
                    }
                    Err(ProtocolError::Incomplete) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let target = transport::next_target(self.buffer.len(), usize::MAX);
            if transport::fill(&mut self.stream, &mut self.buffer, target)? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

fn decode_reply(protocol: Protocol, buf: &[u8]) -> ProtocolResult<DecodedReply> {
    let mut input = protocol.factory().input(buf)?;
    let ident = input.read_message_begin()?;
    let body = match ident.message_type {
        TMessageType::Reply => Ok(EchoResult::read(input.as_mut())?),
        TMessageType::Exception => Err(ApplicationError::read(input.as_mut())?),
        other => {
            return Err(ProtocolError::invalid(format!(
                "unexpected {other:?} message from server"
            )))
        }
    };
    input.read_message_end()?;
    Ok((ident, body, input.consumed()))
}
