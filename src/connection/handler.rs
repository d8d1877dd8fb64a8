//! Connection Handler Module
//!
//! This module handles individual client connections. Each client gets
//! its own handler task that runs in a loop, extracting request frames,
//! executing them, and writing back reply frames.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Extract request frame   │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Execute request         │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Write reply frame       │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / END / protocol violation
//! ```
//!
//! ## Framing
//!
//! Both directions are length-prefixed: a 32-bit little-endian payload
//! length, then the payload. TCP is a stream, so the read buffer
//! accumulates bytes until at least one whole frame is available;
//! multiple frames in one read (pipelining) are executed in order,
//! which is also what gives each client FIFO reply ordering.
//!
//! A protocol violation (unknown opcode, truncated request, oversized
//! frame) is never answered: the connection is dropped on the spot.

use crate::commands::{QueryError, QueryHandler};
use crate::protocol::Reply;
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Bytes of length prefix on every frame
const LENGTH_PREFIX: usize = 4;

/// Handles a single client connection.
///
/// This struct manages the read buffer, frame extraction, and reply
/// writing for one connected client.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The query handler (shared across connections)
    query_handler: QueryHandler,

    /// Largest request frame this server accepts
    max_frame: usize,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(stream: TcpStream, addr: SocketAddr, query_handler: QueryHandler) -> Self {
        let max_frame = {
            let engine = query_handler.engine().lock().unwrap();
            let limits = engine.limits();
            // opcode + TTL span + separators + key + value, with slack
            limits.max_key_size + limits.max_value_size + 64
        };

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            query_handler,
            max_frame,
        }
    }

    /// Runs the main connection loop.
    ///
    /// Reads requests from the client, executes them, and writes back
    /// replies until the client disconnects, asks to close, or violates
    /// the protocol.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");
        self.query_handler.engine().lock().unwrap().client_connected();

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client connection closed"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.query_handler
            .engine()
            .lock()
            .unwrap()
            .client_disconnected();
        result
    }

    /// The main read-execute-reply loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Drain every complete frame already buffered
            while let Some(frame) = self.try_take_frame()? {
                let response = self
                    .query_handler
                    .execute(&frame)
                    .map_err(ConnectionError::Protocol)?;

                self.send_reply(&response.reply).await?;

                if response.close_after_flush {
                    trace!(client = %self.addr, "Close requested, shutting down");
                    return Ok(());
                }
            }

            // Need more data - read from the socket
            self.read_more_data().await?;
        }
    }

    /// Attempts to extract one complete request frame from the buffer.
    fn try_take_frame(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let len = u32::from_le_bytes(self.buffer[..LENGTH_PREFIX].try_into().unwrap()) as usize;
        if len > self.max_frame {
            return Err(ConnectionError::FrameTooLarge {
                size: len,
                max: self.max_frame,
            });
        }

        if self.buffer.len() < LENGTH_PREFIX + len {
            trace!(
                client = %self.addr,
                buffered = self.buffer.len(),
                needed = LENGTH_PREFIX + len,
                "Incomplete frame, need more data"
            );
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX);
        let frame = self.buffer.split_to(len).freeze();
        Ok(Some(frame))
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial frame in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    /// Writes one reply frame and flushes it.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let payload = reply.encode();
        self.stream
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await?;
        self.stream.write_all(&payload).await?;
        self.stream.flush().await?;
        trace!(
            client = %self.addr,
            bytes = LENGTH_PREFIX + payload.len(),
            "Sent reply"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Protocol violation from the dispatcher; dropped without a reply
    #[error("protocol violation: {0}")]
    Protocol(QueryError),

    /// Client disconnected normally
    #[error("client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial frame)
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Request frame exceeds the configured maximum
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Handles a client connection to completion.
///
/// This is a convenience function that creates a [`ConnectionHandler`]
/// and runs it, folding expected disconnects into silence.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, query_handler: QueryHandler) {
    let handler = ConnectionHandler::new(stream, addr, query_handler);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
