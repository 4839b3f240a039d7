//! `embedded-io-async` adapter for embassy-net TCP sockets.
//!
//! The MQTT client is generic over `embedded_io_async::{Read, Write}`; this
//! wrapper forwards to the socket's own async methods so the client does not
//! depend on which embedded-io release embassy-net implements.

use embassy_net::tcp::{self, TcpSocket};
use embedded_io::{ErrorKind, ErrorType};
use embedded_io_async::{Read, Write};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("tcp error: {0:?}")]
pub struct TcpError(pub tcp::Error);

impl embedded_io::Error for TcpError {
    fn kind(&self) -> ErrorKind {
        // The only socket error embassy-net reports
        ErrorKind::ConnectionReset
    }
}

pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> TcpTransport<'a> {
    pub fn new(socket: TcpSocket<'a>) -> Self {
        Self { socket }
    }
}

impl ErrorType for TcpTransport<'_> {
    type Error = TcpError;
}

impl Read for TcpTransport<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        TcpSocket::read(&mut self.socket, buf).await.map_err(TcpError)
    }
}

impl Write for TcpTransport<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        TcpSocket::write(&mut self.socket, buf).await.map_err(TcpError)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        TcpSocket::flush(&mut self.socket).await.map_err(TcpError)
    }
}
