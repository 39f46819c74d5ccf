//! TCP server for the echo service.
//!
//! One thread, blocking sockets, one connection at a time. A connection is
//! served until the client hangs up; clients that connect meanwhile wait in
//! the listen backlog. Errors on a connection end that connection only.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocols::Protocol;
use crate::service::{EchoService, ProcessResult, Processor};
use crate::transport::{self, READ_CHUNK};
use bytes::{Buf, BytesMut};
use socket2::{Domain, Socket, Type};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, trace, warn};

/// Pending connections queued by the kernel while one is being served
const LISTEN_BACKLOG: i32 = 128;

/// Server instance
pub struct Server<S> {
    listener: TcpListener,
    processor: Processor<S>,
    max_message_size: usize,
}

impl<S: EchoService> Server<S> {
    /// Bind the listening socket described by `config`.
    pub fn bind(config: &Config, service: S) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = resolve(&addr)
            .and_then(create_listener)
            .map_err(|source| Error::Bind { addr, source })?;

        Ok(Server {
            listener,
            processor: Processor::new(service, config.protocol),
            max_message_size: config.max_message_size,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn protocol(&self) -> Protocol {
        self.processor.protocol()
    }

    /// Accept and serve connections until the process is stopped.
    ///
    /// Returns only when the listening socket itself stops working.
    pub fn serve(&self) -> Result<()> {
        loop {
            match self.serve_one() {
                Ok(()) => {}
                Err(Error::Io(e)) if listener_is_broken(&e) => return Err(Error::Io(e)),
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }
    }

    /// Accept one connection and serve it to completion.
    ///
    /// Only accept failures are returned. Errors while serving are logged.
    pub fn serve_one(&self) -> Result<()> {
        let (stream, peer) = self.listener.accept()?;
        debug!(peer = %peer, "New connection");

        match self.handle_connection(stream) {
            Ok(()) => debug!(peer = %peer, "Connection closed"),
            Err(e) => warn!(peer = %peer, error = %e, "Connection error"),
        }
        Ok(())
    }

    /// Read messages and write replies until the peer closes the connection.
    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);

        loop {
            // A message longer than the limit never looks complete
            let window = &buffer[..buffer.len().min(self.max_message_size)];
            let result = if window.is_empty() {
                ProcessResult::NeedData
            } else {
                self.processor.process(window)?
            };

            match result {
                ProcessResult::NeedData => {
                    if buffer.len() >= self.max_message_size {
                        return Err(Error::MessageTooLarge {
                            size: buffer.len(),
                            max: self.max_message_size,
                        });
                    }

                    let target = transport::next_target(buffer.len(), self.max_message_size);
                    if transport::fill(&mut stream, &mut buffer, target)? == 0 {
                        if is_blank(&buffer) {
                            trace!("Connection closed by client");
                            return Ok(());
                        }
                        return Err(Error::ConnectionClosed);
                    }
                }
                ProcessResult::Done {
                    consumed,
                    response,
                    close,
                } => {
                    buffer.advance(consumed);
                    if let Some(response) = response {
                        trace!(bytes = response.len(), "Sending reply");
                        stream.write_all(&response)?;
                        stream.flush()?;
                    }
                    if close {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Whether only inter-message whitespace is left, which the JSON protocols
/// allow between documents.
fn is_blank(buffer: &[u8]) -> bool {
    buffer.iter().all(u8::is_ascii_whitespace)
}

/// Accept failures that no later accept can recover from, such as accepting
/// on a socket that is not listening.
fn listener_is_broken(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported
    )
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{addr} did not resolve to any address"),
        )
    })
}

fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ContainerOfEnums, EchoClient, EchoHandler, Status};
    use std::thread;

    fn test_config(protocol: Protocol) -> Config {
        Config {
            protocol,
            host: "127.0.0.1".to_string(),
            port: 0,
            max_message_size: 1024 * 1024,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let server = Server::bind(&test_config(Protocol::Binary), EchoHandler::new(Protocol::Binary))
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.protocol(), Protocol::Binary);
    }

    #[test]
    fn test_bind_failure() {
        let first = Server::bind(&test_config(Protocol::Json), EchoHandler::new(Protocol::Json))
            .unwrap();
        let mut config = test_config(Protocol::Json);
        config.port = first.local_addr().unwrap().port();

        let err = Server::bind(&config, EchoHandler::new(Protocol::Json))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[test]
    fn test_serve_one_connection() {
        let protocol = Protocol::Compact;
        let server = Server::bind(&test_config(protocol), EchoHandler::new(protocol)).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || server.serve_one());

        let message = ContainerOfEnums {
            status: Some(vec![Status::ACTIVE]),
            ..ContainerOfEnums::default()
        };
        let mut client = EchoClient::connect(addr, protocol).unwrap();
        assert_eq!(client.echo(&message).unwrap(), message);
        assert_eq!(client.echo(&message).unwrap(), message);
        drop(client);

        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_oversized_message_drops_connection() {
        let protocol = Protocol::Binary;
        let mut config = test_config(protocol);
        config.max_message_size = 16;
        let server = Server::bind(&config, EchoHandler::new(protocol)).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || server.serve_one());

        let message = ContainerOfEnums {
            undefined_list: Some(vec![crate::service::UndefinedValues::Two; 32]),
            ..ContainerOfEnums::empty()
        };
        let mut client = EchoClient::connect(addr, protocol).unwrap();
        assert!(client.echo(&message).is_err());

        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_serve_returns_when_listener_breaks() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(socket2::Protocol::TCP)).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        socket.bind(&addr.into()).unwrap();
        // Bound but never listening, so accept fails with EINVAL
        let server = Server {
            listener: socket.into(),
            processor: Processor::new(EchoHandler::new(Protocol::Json), Protocol::Json),
            max_message_size: 1024,
        };

        match server.serve() {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput),
            other => panic!("expected a broken listener, got {other:?}"),
        }
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(b""));
        assert!(is_blank(b" \r\n"));
        assert!(!is_blank(b" ["));
    }
}
