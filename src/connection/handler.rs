//! Connection Handler
//!
//! One task per client. The task reads into a buffer, executes every complete
//! request it holds, writes all replies in one flush, then reads again.
//!
//! ```text
//!  read ──> parse* ──> execute* ──> flush ──┐
//!   ▲                                       │
//!   └───────────────────────────────────────┘
//!         ends on EOF, QUIT, protocol error or I/O error
//! ```
//!
//! TCP may deliver half a request or several at once, so parsing never
//! consumes bytes until a whole request is buffered.

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, ParserLimits, Reply, Request, RequestParser};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Room for request framing on top of the largest argument.
const FRAME_OVERHEAD: usize = 64 * 1024;

/// Counters shared by all connections.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serves a single client stream.
pub struct ConnectionHandler<S> {
    stream: S,
    peer: SocketAddr,
    input: BytesMut,
    output: BytesMut,
    commands: CommandHandler,
    parser: RequestParser,
    max_buffered: usize,
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        commands: CommandHandler,
        limits: ParserLimits,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();
        Self {
            stream,
            peer,
            input: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            output: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            parser: RequestParser::new(limits),
            max_buffered: limits.max_bulk_len.saturating_add(FRAME_OVERHEAD),
            stats,
        }
    }

    /// Runs until the client goes away or asks to quit.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.peer, "Client connected");

        let result = self.serve().await;
        match &result {
            Ok(()) => info!(client = %self.peer, "Client disconnected"),
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Connection closed with error"),
        }

        self.stats.closed();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut quit = false;
            while let Some(request) = self.next_request().await? {
                let reply = self.commands.execute(&request).await;
                self.stats.commands_processed.fetch_add(1, Ordering::Relaxed);
                reply.encode_into(&mut self.output);

                if request.is_quit() {
                    quit = true;
                    break;
                }
            }
            self.flush().await?;

            if quit || !self.fill().await? {
                return Ok(());
            }
        }
    }

    /// Takes the next complete request off the input buffer. A framing error
    /// is reported to the client before the connection is dropped.
    async fn next_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        match self.parser.parse(&self.input) {
            Ok(Some((request, consumed))) => {
                let _ = self.input.split_to(consumed);
                trace!(client = %self.peer, consumed, remaining = self.input.len(), "Parsed request");
                Ok(Some(request))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                Reply::error(format!("ERR Protocol error: {}", e)).encode_into(&mut self.output);
                self.flush().await?;
                Err(ConnectionError::Protocol(e))
            }
        }
    }

    /// Reads more bytes. Returns false on a clean EOF.
    async fn fill(&mut self) -> Result<bool, ConnectionError> {
        if self.input.len() >= self.max_buffered {
            return Err(ConnectionError::BufferFull(self.input.len()));
        }
        self.input.reserve(INITIAL_BUFFER_SIZE);

        let n = self.stream.read_buf(&mut self.input).await?;
        if n == 0 {
            return if self.input.is_empty() {
                Ok(false)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }
        self.stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(true)
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.output.is_empty() {
            return Ok(());
        }
        let out = self.output.split();
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        self.stats.bytes_written.fetch_add(out.len() as u64, Ordering::Relaxed);
        trace!(client = %self.peer, bytes = out.len(), "Sent replies");
        Ok(())
    }
}

/// Why a connection ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("stream ended inside a request")]
    UnexpectedEof,

    #[error("request buffer limit exceeded ({0} bytes)")]
    BufferFull(usize),
}

/// Serves `stream` to completion. Errors are logged, not returned.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    commands: CommandHandler,
    limits: ParserLimits,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = ConnectionHandler::new(stream, peer, commands, limits, stats)
        .run()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::service::KvService;
    use crate::storage::MemoryBackend;
    use tokio::io::{duplex, DuplexStream};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    const T0: i64 = 1_700_000_000;

    fn store() -> Arc<KvService> {
        Arc::new(KvService::with_parts(
            StoreConfig::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(ManualClock::new(T0)),
        ))
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn spawn_on_duplex(
        store: Arc<KvService>,
        stats: Arc<ConnectionStats>,
    ) -> (DuplexStream, JoinHandle<Result<(), ConnectionError>>) {
        let (client, server) = duplex(64 * 1024);
        let handler = ConnectionHandler::new(
            server,
            peer(),
            CommandHandler::new(store),
            ParserLimits::default(),
            stats,
        );
        (client, tokio::spawn(handler.run()))
    }

    async fn read_until_closed(stream: &mut DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_pipelined_requests_then_quit() {
        let stats = Arc::new(ConnectionStats::new());
        let (mut client, task) = spawn_on_duplex(store(), Arc::clone(&stats));

        client
            .write_all(
                b"*1\r\n$4\r\nPING\r\n\
                  *5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nEX\r\n$2\r\n60\r\n\
                  GET k\r\n\
                  QUIT\r\n\
                  PING\r\n",
            )
            .await
            .unwrap();

        let out = read_until_closed(&mut client).await;
        assert_eq!(&out[..], b"+PONG\r\n+OK\r\n$1\r\nv\r\n+OK\r\n");
        assert!(task.await.unwrap().is_ok());
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 4);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_request_split_across_reads() {
        let (mut client, task) = spawn_on_duplex(store(), Arc::new(ConnectionStats::new()));

        client.write_all(b"*2\r\n$3\r\nGE").await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"T\r\n$4\r\nnone\r\n").await.unwrap();

        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"$-1\r\n");

        drop(client);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_protocol_error_is_reported_then_closed() {
        let stats = Arc::new(ConnectionStats::new());
        let (mut client, task) = spawn_on_duplex(store(), Arc::clone(&stats));

        client.write_all(b"*1\r\n:5\r\n").await.unwrap();
        let out = read_until_closed(&mut client).await;
        assert!(out.starts_with(b"-ERR Protocol error"));

        assert!(matches!(
            task.await.unwrap(),
            Err(ConnectionError::Protocol(ParseError::ExpectedBulk(':')))
        ));
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_eof_inside_request() {
        let (mut client, task) = spawn_on_duplex(store(), Arc::new(ConnectionStats::new()));

        client.write_all(b"*2\r\n$3\r\nGET\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(ConnectionError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = store();
        let stats = Arc::new(ConnectionStats::new());

        let server_store = Arc::clone(&store);
        let server_stats = Arc::clone(&stats);
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(
                stream,
                peer,
                CommandHandler::new(server_store),
                ParserLimits::default(),
                server_stats,
            )
            .await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"SET greeting hello EXAT 1700000100\r\nTTL greeting\r\nDEL greeting\r\nGET greeting\r\nQUIT\r\n")
            .await
            .unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(&out[..], b"+OK\r\n:100\r\n+OK\r\n$-1\r\n+OK\r\n");

        server.await.unwrap();
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(store.stats().engine.tombstones, 1);
    }
}
