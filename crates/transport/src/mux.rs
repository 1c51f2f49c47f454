//! The yamux session wrapper.
//!
//! yamux's connection object makes progress only while polled, so every
//! session gets one driver task that owns the connection and serves two
//! queues: outbound open requests and inbound streams. Handles are cheap
//! clones; when the driver exits (peer gone, protocol error, or an explicit
//! close) every queued and future request observes
//! [`TransportError::ConnectionClosed`].

use std::task::{Context, Poll};

use futures::future;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tokio_util::sync::PollSender;
use tracing::debug;
use yamux::{Connection, ConnectionError, Mode};

use protocol::limits::MAX_STREAMS_PER_SESSION;

use crate::error::TransportError;

/// A multiplexed substream with tokio I/O traits attached.
pub type MuxStream = Compat<yamux::Stream>;

/// Capacity of the inbound stream queue before the driver stops accepting.
const INBOUND_QUEUE: usize = 32;

/// Lifecycle of a session transport.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum MuxState {
    /// The driver is running and streams can be opened.
    #[default]
    Running,
    /// The driver has exited; `error` holds the failure, if any.
    Closed {
        /// Rendered connection error, absent on a clean shutdown.
        error: Option<String>,
    },
}

enum Command {
    Open(oneshot::Sender<Result<yamux::Stream, TransportError>>),
    Close,
}

/// Handle to a multiplexed session.
#[derive(Clone)]
pub struct Multiplex {
    command_tx: mpsc::Sender<Command>,
    state: watch::Receiver<MuxState>,
}

/// Receiver half for streams the peer opens.
pub struct IncomingStreams {
    rx: mpsc::Receiver<yamux::Stream>,
}

impl IncomingStreams {
    /// Waits for the next peer-opened stream; `None` once the session ends.
    pub async fn next(&mut self) -> Option<MuxStream> {
        self.rx.recv().await.map(FuturesAsyncReadCompatExt::compat)
    }
}

impl Multiplex {
    /// Wraps `io` as the dialing (server-process) side of a session.
    pub fn client<S>(io: S) -> (Self, IncomingStreams)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        Self::spawn(io, Mode::Client)
    }

    /// Wraps `io` as the listening (bridge-process) side of a session.
    pub fn server<S>(io: S) -> (Self, IncomingStreams)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        Self::spawn(io, Mode::Server)
    }

    fn spawn<S>(io: S, mode: Mode) -> (Self, IncomingStreams)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let mut config = yamux::Config::default();
        config.set_max_num_streams(MAX_STREAMS_PER_SESSION);

        let connection = Connection::new(io.compat(), config, mode);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (state_tx, state_rx) = watch::channel(MuxState::default());

        tokio::spawn(async move {
            let mut driver = Driver {
                connection,
                command_rx,
                pending_open: None,
                inbound: PollSender::new(inbound_tx),
                parked: None,
                closing: false,
            };
            let result = future::poll_fn(|cx| driver.poll(cx)).await;
            let error = result.err().map(|err| err.to_string());
            if let Some(error) = &error {
                debug!(%error, "session transport ended");
            }
            let _ = state_tx.send(MuxState::Closed { error });
        });

        (
            Self {
                command_tx,
                state: state_rx,
            },
            IncomingStreams { rx: inbound_rx },
        )
    }

    /// Opens a new outbound stream.
    pub async fn open_stream(&self) -> Result<MuxStream, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Open(reply_tx))
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        let stream = reply_rx
            .await
            .map_err(|_| TransportError::ConnectionClosed)??;
        Ok(stream.compat())
    }

    /// Requests a clean shutdown of the session.
    pub async fn close(&self) {
        let _ = self.command_tx.send(Command::Close).await;
    }

    /// Reports whether the driver has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.state.borrow(), MuxState::Closed { .. })
    }

    /// Resolves once the driver exits, returning the final state.
    pub async fn closed(&self) -> MuxState {
        let mut state = self.state.clone();
        loop {
            if let MuxState::Closed { .. } = &*state.borrow() {
                return state.borrow().clone();
            }
            if state.changed().await.is_err() {
                return state.borrow().clone();
            }
        }
    }
}

struct Driver<S> {
    connection: Connection<S>,
    command_rx: mpsc::Receiver<Command>,
    pending_open: Option<oneshot::Sender<Result<yamux::Stream, TransportError>>>,
    inbound: PollSender<yamux::Stream>,
    parked: Option<yamux::Stream>,
    closing: bool,
}

impl<S> Driver<S>
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin,
{
    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ConnectionError>> {
        loop {
            if self.closing {
                return self.connection.poll_close(cx);
            }

            let mut progress = false;

            // Deliver a previously accepted inbound stream before polling
            // for more; the bounded queue is the backpressure boundary.
            if let Some(stream) = self.parked.take() {
                match self.inbound.poll_reserve(cx) {
                    Poll::Ready(Ok(())) => {
                        let _ = self.inbound.send_item(stream);
                        progress = true;
                    }
                    Poll::Ready(Err(_)) => {
                        // Receiver gone; dropping the stream resets it.
                        progress = true;
                    }
                    Poll::Pending => self.parked = Some(stream),
                }
            }

            if self.pending_open.is_none() {
                match self.command_rx.poll_recv(cx) {
                    Poll::Ready(Some(Command::Open(reply))) => {
                        self.pending_open = Some(reply);
                        progress = true;
                    }
                    Poll::Ready(Some(Command::Close)) | Poll::Ready(None) => {
                        self.closing = true;
                        continue;
                    }
                    Poll::Pending => {}
                }
            }

            if self.pending_open.is_some() {
                match self.connection.poll_new_outbound(cx) {
                    Poll::Ready(Ok(stream)) => {
                        if let Some(reply) = self.pending_open.take() {
                            let _ = reply.send(Ok(stream));
                        }
                        progress = true;
                    }
                    Poll::Ready(Err(ConnectionError::TooManyStreams)) => {
                        // The session survives; only this open is refused.
                        if let Some(reply) = self.pending_open.take() {
                            let _ = reply.send(Err(TransportError::StreamLimit));
                        }
                        progress = true;
                    }
                    Poll::Ready(Err(err)) => {
                        if let Some(reply) = self.pending_open.take() {
                            let _ = reply.send(Err(TransportError::ConnectionClosed));
                        }
                        return Poll::Ready(Err(err));
                    }
                    Poll::Pending => {}
                }
            }

            if self.parked.is_none() {
                match self.connection.poll_next_inbound(cx) {
                    Poll::Ready(Some(Ok(stream))) => {
                        self.parked = Some(stream);
                        progress = true;
                    }
                    Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                    Poll::Ready(None) => return Poll::Ready(Ok(())),
                    Poll::Pending => {}
                }
            }

            if !progress {
                return Poll::Pending;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framed::{read_frame, write_frame};
    use protocol::inner::{InnerFrame, Opcode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn session_pair() -> (Multiplex, IncomingStreams, Multiplex, IncomingStreams) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client, client_incoming) = Multiplex::client(client_io);
        let (server, server_incoming) = Multiplex::server(server_io);
        (client, client_incoming, server, server_incoming)
    }

    #[tokio::test]
    async fn open_stream_reaches_the_peer_accept_loop() {
        let (client, _ci, _server, mut server_incoming) = session_pair();

        let mut outbound = client.open_stream().await.expect("open succeeds");
        outbound.write_all(b"ping").await.expect("write");
        outbound.flush().await.expect("flush");

        let mut inbound = server_incoming.next().await.expect("stream arrives");
        let mut buf = [0u8; 4];
        inbound.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn inner_frames_round_trip_over_a_substream() {
        let (client, _ci, _server, mut server_incoming) = session_pair();

        let mut outbound = client.open_stream().await.expect("open succeeds");
        let frame =
            InnerFrame::new(Opcode::Open, 1, &b"bridge\0docker\0list_containers"[..])
                .expect("frame");
        write_frame(&mut outbound, &frame).await.expect("write");

        let mut inbound = server_incoming.next().await.expect("stream arrives");
        let received = read_frame(&mut inbound)
            .await
            .expect("read")
            .expect("one frame");
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn bridge_side_can_open_push_streams() {
        let (_client, mut client_incoming, server, _si) = session_pair();

        let mut push = server.open_stream().await.expect("open succeeds");
        push.write_all(b"event").await.expect("write");
        push.flush().await.expect("flush");

        let mut inbound = client_incoming.next().await.expect("stream arrives");
        let mut buf = [0u8; 5];
        inbound.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"event");
    }

    #[tokio::test]
    async fn close_refuses_further_opens() {
        let (client, _ci, server, _si) = session_pair();

        client.close().await;
        assert_eq!(client.closed().await, MuxState::Closed { error: None });

        let err = client.open_stream().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));

        // The peer observes the shutdown as well.
        server.closed().await;
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn dropping_the_peer_socket_closes_the_session() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client, _ci) = Multiplex::client(client_io);
        drop(server_io);

        client.closed().await;
        let err = client.open_stream().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
