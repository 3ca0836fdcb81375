use crate::adapters::bus::{BusConnection, BusMessage, MethodCall, ObjectPath, ObjectRegistry};
use crate::error::{ERROR_UNKNOWN_OBJECT, MmsError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::Instrument;

const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Local object bus over a Unix socket. Each line is one JSON-encoded
/// [`MethodCall`] from a client or one [`BusMessage`] to clients. Replies go
/// to the calling client only, signals to every connected client.
#[derive(Debug)]
pub struct SocketBus {
    registry: ObjectRegistry,
    outgoing: broadcast::Sender<BusMessage>,
    next_client: AtomicU64,
}

impl SocketBus {
    /// Binds the socket, replacing a stale socket file left by a previous run.
    ///
    /// # Errors
    /// Returns an I/O error if the socket cannot be bound.
    pub fn bind(path: &Path, capacity: usize) -> Result<(Arc<Self>, UnixListener)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale bus socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(path)?;
        let (outgoing, _) = broadcast::channel(capacity);
        let bus = Arc::new(Self { registry: ObjectRegistry::default(), outgoing, next_client: AtomicU64::new(1) });
        Ok((bus, listener))
    }

    pub async fn serve(self: Arc<Self>, listener: UnixListener, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let client_id = format!(":1.{}", self.next_client.fetch_add(1, Ordering::Relaxed));
                            let bus = Arc::clone(&self);
                            let client_shutdown = shutdown.clone();
                            tokio::spawn(
                                bus.handle_client(stream, client_id.clone(), client_shutdown)
                                    .instrument(tracing::info_span!("bus_client", client = %client_id)),
                            );
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to accept bus client"),
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Bus listener shutting down...");
    }

    async fn handle_client(
        self: Arc<Self>,
        stream: UnixStream,
        client_id: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::debug!("Bus client connected");
        let (mut sink, mut lines) = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)).split();
        let mut outgoing = BroadcastStream::new(self.outgoing.subscribe());

        loop {
            tokio::select! {
                line = lines.next() => {
                    let Some(Ok(line)) = line else { break };
                    let mut call: MethodCall = match serde_json::from_str(&line) {
                        Ok(call) => call,
                        Err(e) => {
                            tracing::warn!(error = %e, "Discarding malformed method call");
                            continue;
                        }
                    };
                    call.sender = Some(client_id.clone());
                    if let Err(call) = self.registry.route(call).await {
                        let reply = call.error(ERROR_UNKNOWN_OBJECT, format!("No such object path '{}'", call.path));
                        if let Err(e) = send_line(&mut sink, &reply).await {
                            tracing::warn!(error = %e, "Could not send reply");
                            break;
                        }
                    }
                }
                message = outgoing.next() => {
                    match message {
                        Some(Ok(message)) => {
                            if message.destination().is_some_and(|d| d != client_id) {
                                continue;
                            }
                            if let Err(e) = send_line(&mut sink, &message).await {
                                tracing::warn!(error = %e, "Could not forward bus message");
                                break;
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                            tracing::warn!(missed = n, "Bus client lagged behind");
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Bus client disconnected");
    }
}

async fn send_line<S>(sink: &mut S, message: &BusMessage) -> Result<()>
where
    S: futures::Sink<String, Error = tokio_util::codec::LinesCodecError> + Unpin,
{
    let line = serde_json::to_string(message)?;
    sink.send(line).await.map_err(|e| MmsError::Bus(e.to_string()))
}

#[async_trait]
impl BusConnection for SocketBus {
    async fn send(&self, message: BusMessage) -> Result<()> {
        if self.outgoing.send(message).is_err() {
            tracing::debug!("No bus clients connected, message dropped");
        }
        Ok(())
    }

    fn register_object_path(&self, path: ObjectPath, calls: mpsc::Sender<MethodCall>) {
        self.registry.register(path, calls);
    }

    fn unregister_object_path(&self, path: &ObjectPath) {
        self.registry.unregister(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::bus::{Signal, Variant};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_call_routing_and_signal_fanout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("bus.sock");
        let (bus, listener) = SocketBus::bind(&socket, 16).expect("bind");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(Arc::clone(&bus).serve(listener, shutdown_rx));

        let (calls_tx, mut calls_rx) = mpsc::channel(4);
        bus.register_object_path(ObjectPath::new("/svc"), calls_tx);

        let stream = UnixStream::connect(&socket).await.expect("connect");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half).lines();

        let call = MethodCall::new(3, ObjectPath::new("/svc"), "org.example", "Ping", vec![Variant::from("x")]);
        let mut line = serde_json::to_string(&call).expect("encode");
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.expect("write");

        let received = calls_rx.recv().await.expect("call routed");
        assert_eq!(received.member, "Ping");
        let sender = received.sender.clone().expect("sender stamped");

        bus.send(received.method_return().with_arg("pong").into()).await.expect("send reply");
        let reply: BusMessage =
            serde_json::from_str(&reader.next_line().await.expect("read").expect("line")).expect("decode");
        assert_eq!(reply.destination(), Some(sender.as_str()));

        bus.send(Signal::new(ObjectPath::new("/svc"), "org.example", "Changed").into()).await.expect("send signal");
        let signal: BusMessage =
            serde_json::from_str(&reader.next_line().await.expect("read").expect("line")).expect("decode");
        assert!(matches!(signal, BusMessage::Signal(s) if s.member == "Changed"));

        let _ = shutdown_tx.send(true);
        server.await.expect("server task");
    }
}
