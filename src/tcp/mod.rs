//! TCP transport proxy: opens, writes to, reads from, and closes outbound
//! TCP connections on Persona's behalf, keyed by flow identity.

pub mod request;
pub mod response;

pub use request::{Request, RequestType};
pub use response::{Response, ResponseType};

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, trace};

use crate::identity::Identity;

const READ_DEADLINE: Duration = Duration::from_millis(100);
const READ_BUFFER_LEN: usize = 1024;
// Spec-mandated rendezvous queues: a sender blocks until the single slot is
// free, so a stalled consumer applies backpressure immediately rather than
// absorbing a backlog.
const QUEUE_CAPACITY: usize = 1;

/// A live connection table entry: the write half used to service `Write`
/// requests, plus a handle to stop the paired reader task on explicit
/// `Close` without it racing a spurious post-close `Error`.
struct Connection {
    write_half: OwnedWriteHalf,
    stop: oneshot::Sender<()>,
}

/// Control messages a spawned connect/reader task sends back to the proxy's
/// main loop, which is the sole mutator of the connection table.
enum Control {
    Connected(Identity, OwnedWriteHalf, oneshot::Sender<()>),
    Disconnected(String),
}

pub struct Proxy {
    requests: mpsc::Receiver<Request>,
    responses: mpsc::Sender<Response>,
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    connections: HashMap<String, Connection>,
}

impl Proxy {
    /// Spawns the proxy actor, returning the request sender, response
    /// receiver, and a handle to the actor task itself so the caller can
    /// abort it directly rather than wait on a channel-closure cascade.
    /// Aborting (or otherwise dropping) this task drops every `Connection`
    /// in the table, which fires its `stop` signal and tears down the
    /// matching reader task.
    pub fn spawn() -> (mpsc::Sender<Request>, mpsc::Receiver<Response>, JoinHandle<()>) {
        let (req_tx, req_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (resp_tx, resp_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(QUEUE_CAPACITY);

        let proxy = Proxy {
            requests: req_rx,
            responses: resp_tx,
            control_tx,
            control_rx,
            connections: HashMap::new(),
        };

        let handle = tokio::spawn(proxy.run());

        (req_tx, resp_rx, handle)
    }

    async fn run(mut self) {
        debug!("tcp proxy started");

        loop {
            tokio::select! {
                maybe_req = self.requests.recv() => {
                    match maybe_req {
                        Some(req) => self.handle_request(req).await,
                        None => {
                            debug!("tcp proxy stopping, request channel closed");
                            return;
                        }
                    }
                }
                Some(ctrl) = self.control_rx.recv() => {
                    self.handle_control(ctrl);
                }
            }
        }
    }

    fn handle_control(&mut self, ctrl: Control) {
        match ctrl {
            Control::Connected(identity, write_half, stop) => {
                self.connections.insert(
                    identity.as_str().to_string(),
                    Connection { write_half, stop },
                );
            }
            Control::Disconnected(key) => {
                self.connections.remove(&key);
            }
        }
    }

    async fn handle_request(&mut self, req: Request) {
        match req.kind {
            RequestType::Open => self.handle_open(req.identity).await,
            RequestType::Write => self.handle_write(req.identity, req.payload).await,
            RequestType::Close => self.handle_close(req.identity).await,
        }
    }

    async fn handle_open(&mut self, identity: Identity) {
        if self.connections.contains_key(identity.as_str()) {
            self.emit(Response::error(identity, "already open")).await;
            return;
        }

        trace!(identity = %identity, "dialing upstream");

        let responses = self.responses.clone();
        let control = self.control_tx.clone();
        tokio::spawn(Self::connect(identity, responses, control));
    }

    async fn connect(
        identity: Identity,
        responses: mpsc::Sender<Response>,
        control: mpsc::Sender<Control>,
    ) {
        match TcpStream::connect(identity.destination()).await {
            Ok(stream) => {
                debug!(identity = %identity, "upstream connected");

                let (read_half, write_half) = stream.into_split();
                let (stop_tx, stop_rx) = oneshot::channel();

                if control
                    .send(Control::Connected(identity.clone(), write_half, stop_tx))
                    .await
                    .is_err()
                {
                    return;
                }

                tokio::spawn(Self::read_loop(
                    identity.clone(),
                    read_half,
                    responses.clone(),
                    control,
                    stop_rx,
                ));

                let _ = responses.send(Response::connect_success(identity)).await;
            }
            Err(err) => {
                error!(identity = %identity, error = %err, "dial failed");
                let _ = responses
                    .send(Response::error(identity.clone(), err.to_string()))
                    .await;
                let _ = responses.send(Response::connect_failure(identity)).await;
            }
        }
    }

    async fn read_loop(
        identity: Identity,
        mut read_half: OwnedReadHalf,
        responses: mpsc::Sender<Response>,
        control: mpsc::Sender<Control>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut buf = vec![0u8; READ_BUFFER_LEN];

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!(identity = %identity, "reader stopped for explicit close");
                    return;
                }
                result = timeout(READ_DEADLINE, read_half.read(&mut buf)) => {
                    match result {
                        Ok(Ok(0)) => {
                            // Clean EOF is a graceful close, not a failure: tell
                            // Persona `Close` rather than `Error`, mirroring the
                            // explicit-Close response path.
                            debug!(identity = %identity, "upstream closed cleanly");
                            let _ = responses.send(Response::close(identity.clone())).await;
                            let _ = control
                                .send(Control::Disconnected(identity.as_str().to_string()))
                                .await;
                            return;
                        }
                        Ok(Ok(n)) => {
                            trace!(identity = %identity, bytes = n, "read from upstream");
                            let _ = responses
                                .send(Response::data(identity.clone(), buf[..n].to_vec()))
                                .await;
                        }
                        Ok(Err(err)) => {
                            error!(identity = %identity, error = %err, "upstream read error");
                            let _ = responses
                                .send(Response::error(identity.clone(), err.to_string()))
                                .await;
                            let _ = control
                                .send(Control::Disconnected(identity.as_str().to_string()))
                                .await;
                            return;
                        }
                        Err(_elapsed) => {
                            // Read deadline hit with no data: this is how we keep the
                            // loop interactive enough to notice `stop`, not an error.
                            continue;
                        }
                    }
                }
            }
        }
    }

    async fn handle_write(&mut self, identity: Identity, payload: Option<Vec<u8>>) {
        let payload = match payload {
            Some(p) if !p.is_empty() => p,
            _ => {
                self.emit(Response::error(identity, "empty write")).await;
                return;
            }
        };

        let Some(conn) = self.connections.get_mut(identity.as_str()) else {
            self.emit(Response::error(identity, "no such connection")).await;
            return;
        };

        match conn.write_half.write_all(&payload).await {
            Ok(()) => {}
            Err(err) => self.emit(Response::error(identity, err.to_string())).await,
        }
    }

    async fn handle_close(&mut self, identity: Identity) {
        let Some(mut conn) = self.connections.remove(identity.as_str()) else {
            self.emit(Response::error(identity, "no such connection")).await;
            return;
        };

        let _ = conn.write_half.shutdown().await;
        let _ = conn.stop.send(());

        self.emit(Response::close(identity)).await;
    }

    async fn emit(&self, response: Response) {
        let _ = self.responses.send(response).await;
    }
}

impl Drop for Proxy {
    /// Fires every open connection's `stop` signal so its reader task exits
    /// as soon as the proxy actor itself stops, instead of lingering on its
    /// own socket read deadline or EOF. Run when `run()` returns normally
    /// and also when the caller aborts the actor task outright, since
    /// aborting drops `self` mid-poll.
    fn drop(&mut self) {
        for (_, conn) in self.connections.drain() {
            let _ = conn.stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn identity_for(port: u16) -> Identity {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&[127, 0, 0, 1]);
        bytes[4..6].copy_from_slice(&12345u16.to_be_bytes());
        bytes[6..10].copy_from_slice(&[127, 0, 0, 1]);
        bytes[10..12].copy_from_slice(&port.to_be_bytes());
        Identity::new(&bytes).unwrap()
    }

    #[tokio::test]
    async fn open_write_read_close_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let identity = identity_for(port);

        let accept_task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            socket.write_all(b"world").await.unwrap();
            socket
        });

        let (req_tx, mut resp_rx, _handle) = Proxy::spawn();

        req_tx
            .send(Request {
                kind: RequestType::Open,
                identity: identity.clone(),
                payload: None,
            })
            .await
            .unwrap();

        let resp = resp_rx.recv().await.unwrap();
        assert_eq!(resp.kind, ResponseType::ConnectSuccess);

        req_tx
            .send(Request {
                kind: RequestType::Write,
                identity: identity.clone(),
                payload: Some(b"hello".to_vec()),
            })
            .await
            .unwrap();

        let server_socket = accept_task.await.unwrap();
        drop(server_socket);

        let resp = resp_rx.recv().await.unwrap();
        assert_eq!(resp.kind, ResponseType::Data);
        assert_eq!(resp.payload.as_deref(), Some(&b"world"[..]));

        req_tx
            .send(Request {
                kind: RequestType::Close,
                identity: identity.clone(),
                payload: None,
            })
            .await
            .unwrap();

        let resp = resp_rx.recv().await.unwrap();
        assert_eq!(resp.kind, ResponseType::Close);
    }

    #[tokio::test]
    async fn duplicate_open_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let identity = identity_for(port);

        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let (req_tx, mut resp_rx, _handle) = Proxy::spawn();

        req_tx
            .send(Request {
                kind: RequestType::Open,
                identity: identity.clone(),
                payload: None,
            })
            .await
            .unwrap();
        let first = resp_rx.recv().await.unwrap();
        assert_eq!(first.kind, ResponseType::ConnectSuccess);

        req_tx
            .send(Request {
                kind: RequestType::Open,
                identity: identity.clone(),
                payload: None,
            })
            .await
            .unwrap();
        let second = resp_rx.recv().await.unwrap();
        assert_eq!(second.kind, ResponseType::Error);
        assert_eq!(second.error_text.as_deref(), Some("already open"));
    }

    #[tokio::test]
    async fn write_without_connection_is_an_error() {
        let (req_tx, mut resp_rx, _handle) = Proxy::spawn();
        let identity = identity_for(1);

        req_tx
            .send(Request {
                kind: RequestType::Write,
                identity: identity.clone(),
                payload: Some(b"x".to_vec()),
            })
            .await
            .unwrap();

        let resp = resp_rx.recv().await.unwrap();
        assert_eq!(resp.kind, ResponseType::Error);
        assert_eq!(resp.error_text.as_deref(), Some("no such connection"));
    }

    #[tokio::test]
    async fn empty_write_is_an_error() {
        let (req_tx, mut resp_rx, _handle) = Proxy::spawn();
        let identity = identity_for(1);

        req_tx
            .send(Request {
                kind: RequestType::Write,
                identity,
                payload: Some(vec![]),
            })
            .await
            .unwrap();

        let resp = resp_rx.recv().await.unwrap();
        assert_eq!(resp.error_text.as_deref(), Some("empty write"));
    }

    #[tokio::test]
    async fn close_without_connection_is_an_error() {
        let (req_tx, mut resp_rx, _handle) = Proxy::spawn();
        let identity = identity_for(1);

        req_tx
            .send(Request {
                kind: RequestType::Close,
                identity,
                payload: None,
            })
            .await
            .unwrap();

        let resp = resp_rx.recv().await.unwrap();
        assert_eq!(resp.kind, ResponseType::Error);
    }

    #[tokio::test]
    async fn dial_failure_emits_error_then_connect_failure() {
        // Port 0 after an immediate bind+drop is not listening; connecting
        // to it should fail fast.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let identity = identity_for(port);

        let (req_tx, mut resp_rx, _handle) = Proxy::spawn();
        req_tx
            .send(Request {
                kind: RequestType::Open,
                identity,
                payload: None,
            })
            .await
            .unwrap();

        let first = resp_rx.recv().await.unwrap();
        assert_eq!(first.kind, ResponseType::Error);
        let second = resp_rx.recv().await.unwrap();
        assert_eq!(second.kind, ResponseType::ConnectFailure);
    }
}
