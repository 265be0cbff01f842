//! Long-running receive loops: the reliable accept loop with per-connection
//! request handling, and the group drain loop

use crate::shutdown::{ShutdownListener, ShutdownSignal};
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::Message;
use swarm_transport::{Datagram, GroupTransport, TcpListenerTransport, TcpTransport, Transport};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

/// Pause after an empty group receive before polling again
const EMPTY_DATAGRAM_BACKOFF: Duration = Duration::from_millis(100);

/// Pause after a failed accept (descriptor exhaustion and the like)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Answers requests arriving on client connections
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Per-connection state, created when the connection is accepted
    type Session: Default + Send + 'static;

    /// Produce the reply to one request
    async fn handle(&self, session: &mut Self::Session, request: &Message) -> Message;

    /// Called once the connection is gone
    async fn close(&self, _session: Self::Session) {}
}

/// Where a connection is in its request/reply cycle
#[derive(Debug)]
enum ConnectionState {
    AwaitingRequest,
    Dispatching(Message),
    Responded,
    Closed,
}

/// Accept connections until shutdown, serving each on its own task.
/// The loop waits for its connection tasks before finishing.
pub fn spawn_accept_loop<H: Handler>(
    mut listener: TcpListenerTransport,
    handler: Arc<H>,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stop = shutdown.subscribe();
        let mut connections = JoinSet::new();
        let local_addr = listener.local_addr();

        loop {
            tokio::select! {
                _ = stop.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok(transport) => {
                        connections.spawn(serve_connection(
                            transport,
                            Arc::clone(&handler),
                            shutdown.subscribe(),
                        ));
                    }
                    Err(e) if e.is_closed() => break,
                    Err(e) => {
                        error!("Failed to accept connection on {}: {}", local_addr, e);
                        if backoff(&mut stop, ACCEPT_ERROR_BACKOFF).await {
                            break;
                        }
                    }
                },
                // reap finished connections
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        listener.close();
        while connections.join_next().await.is_some() {}
        debug!("Accept loop on {} stopped", local_addr);
    })
}

/// Sleep for `delay` unless shutdown arrives first. Returns true on shutdown.
async fn backoff(stop: &mut ShutdownListener, delay: Duration) -> bool {
    tokio::select! {
        _ = stop.wait() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Serve one connection: requests are answered strictly in order until the
/// peer leaves or shutdown is signalled.
pub async fn serve_connection<H: Handler>(
    mut transport: TcpTransport,
    handler: Arc<H>,
    mut shutdown: ShutdownListener,
) {
    let peer: SocketAddr = transport.peer_addr();
    let mut session = H::Session::default();
    let mut state = ConnectionState::AwaitingRequest;

    loop {
        state = match state {
            ConnectionState::AwaitingRequest => {
                let received = tokio::select! {
                    _ = shutdown.wait() => None,
                    received = transport.receive() => Some(received),
                };
                match received {
                    Some(Ok(request)) => ConnectionState::Dispatching(request),
                    Some(Err(e)) if e.is_closed() => ConnectionState::Closed,
                    Some(Err(e)) => {
                        warn!("Failed to read from {}: {}", peer, e);
                        ConnectionState::Closed
                    }
                    None => ConnectionState::Closed,
                }
            }
            ConnectionState::Dispatching(request) => {
                debug!("Request from {}: {}", peer, request);
                let reply = handler.handle(&mut session, &request).await;
                match transport.send(&reply).await {
                    Ok(()) => ConnectionState::Responded,
                    Err(e) => {
                        warn!("Failed to reply to {}: {}", peer, e);
                        ConnectionState::Closed
                    }
                }
            }
            ConnectionState::Responded => ConnectionState::AwaitingRequest,
            ConnectionState::Closed => break,
        };
    }

    if let Err(e) = transport.close().await {
        debug!("Error closing connection to {}: {}", peer, e);
    }
    handler.close(session).await;
    debug!("Connection from {} closed", peer);
}

/// Drain the group channel until shutdown, passing each datagram's sender and
/// decoded message to `on_message`. The loop owns the membership and leaves
/// the group when it ends.
pub fn spawn_group_loop<F, Fut>(
    name: &'static str,
    group: GroupTransport,
    mut shutdown: ShutdownListener,
    mut on_message: F,
) -> JoinHandle<()>
where
    F: FnMut(SocketAddr, Message) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let datagram = tokio::select! {
                _ = shutdown.wait() => break,
                datagram = group.recv_datagram() => datagram,
            };
            match datagram {
                Datagram::Received { sender, raw } => on_message(sender, Message::decode(&raw)).await,
                Datagram::Empty => {
                    if group.is_closed() {
                        break;
                    }
                    tokio::time::sleep(EMPTY_DATAGRAM_BACKOFF).await;
                }
            }
        }

        group.leave();
        debug!("{} loop stopped", name);
    })
}
