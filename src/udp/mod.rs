//! UDP transport proxy: relays datagrams to/from upstream UDP peers. Unlike
//! TCP there is no explicit `Open` — a socket is created lazily on the
//! first `Write` for a previously-unseen identity, and idle sockets are
//! reaped on a fixed cadence.

pub mod request;
pub mod response;

pub use request::{Request, RequestType};
pub use response::{Response, ResponseType};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::identity::Identity;

const READ_BUFFER_LEN: usize = 2048;
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
// Spec-mandated rendezvous queues: a sender blocks until the single slot is
// free, so a stalled consumer applies backpressure immediately rather than
// absorbing a backlog.
const QUEUE_CAPACITY: usize = 1;

struct Socket {
    handle: Arc<UdpSocket>,
    last_used: Instant,
    stop: oneshot::Sender<()>,
}

enum Control {
    Disconnected(String),
}

pub struct Proxy {
    requests: mpsc::Receiver<Request>,
    responses: mpsc::Sender<Response>,
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    sockets: HashMap<String, Socket>,
}

impl Proxy {
    /// Spawns the proxy actor, returning the request sender, response
    /// receiver, and a handle to the actor task itself so the caller can
    /// abort it directly rather than wait on a channel-closure cascade.
    /// Aborting (or otherwise dropping) this task drops every `Socket` in
    /// the table, which fires its `stop` signal and tears down the
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
            sockets: HashMap::new(),
        };

        let handle = tokio::spawn(proxy.run());

        (req_tx, resp_rx, handle)
    }

    async fn run(mut self) {
        debug!("udp proxy started");
        let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);
        cleanup.tick().await; // first tick fires immediately, nothing to evict yet

        loop {
            tokio::select! {
                maybe_req = self.requests.recv() => {
                    match maybe_req {
                        Some(req) => self.handle_request(req).await,
                        None => {
                            debug!("udp proxy stopping, request channel closed");
                            return;
                        }
                    }
                }
                Some(ctrl) = self.control_rx.recv() => {
                    self.handle_control(ctrl);
                }
                _ = cleanup.tick() => {
                    self.evict_idle();
                }
            }
        }
    }

    fn handle_control(&mut self, ctrl: Control) {
        match ctrl {
            Control::Disconnected(key) => {
                self.sockets.remove(&key);
            }
        }
    }

    fn evict_idle(&mut self) {
        let now = Instant::now();
        let stale: Vec<String> = self
            .sockets
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_used) >= IDLE_TIMEOUT)
            .map(|(key, _)| key.clone())
            .collect();

        for key in stale {
            if let Some(socket) = self.sockets.remove(&key) {
                trace!(identity = %key, "evicting idle udp socket");
                let _ = socket.stop.send(());
            }
        }
    }

    async fn handle_request(&mut self, req: Request) {
        match req.kind {
            RequestType::Write => self.handle_write(req.identity, req.payload).await,
        }
    }

    async fn handle_write(&mut self, identity: Identity, payload: Vec<u8>) {
        if payload.is_empty() {
            self.emit(Response::error(identity, "empty write")).await;
            return;
        }

        if !self.sockets.contains_key(identity.as_str()) {
            if let Err(err) = self.create_socket(identity.clone()).await {
                self.emit(Response::error(identity, err.to_string())).await;
                return;
            }
        }

        let dest = identity.destination();
        let Some(socket) = self.sockets.get_mut(identity.as_str()) else {
            return;
        };
        socket.last_used = Instant::now();

        if let Err(err) = socket.handle.send_to(&payload, SocketAddr::V4(dest)).await {
            error!(identity = %identity, error = %err, "udp send failed");
            self.emit(Response::error(identity, err.to_string())).await;
        }
    }

    async fn create_socket(&mut self, identity: Identity) -> std::io::Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let socket = Arc::new(socket);
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(Self::read_loop(
            identity.clone(),
            socket.clone(),
            self.responses.clone(),
            self.control_tx.clone(),
            stop_rx,
        ));

        self.sockets.insert(
            identity.as_str().to_string(),
            Socket {
                handle: socket,
                last_used: Instant::now(),
                stop: stop_tx,
            },
        );

        Ok(())
    }

    async fn read_loop(
        identity: Identity,
        socket: Arc<UdpSocket>,
        responses: mpsc::Sender<Response>,
        control: mpsc::Sender<Control>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let expected_source = SocketAddr::V4(identity.destination());
        let mut buf = vec![0u8; READ_BUFFER_LEN];

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!(identity = %identity, "reader stopped, socket evicted");
                    return;
                }
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, from)) if from == expected_source => {
                            trace!(identity = %identity, bytes = n, "read datagram");
                            let _ = responses
                                .send(Response::data(identity.clone(), buf[..n].to_vec()))
                                .await;
                        }
                        Ok((_, from)) => {
                            warn!(identity = %identity, %from, "dropping datagram from unexpected source");
                        }
                        Err(err) => {
                            error!(identity = %identity, error = %err, "udp read error");
                            let _ = responses
                                .send(Response::error(identity.clone(), err.to_string()))
                                .await;
                            let _ = control
                                .send(Control::Disconnected(identity.as_str().to_string()))
                                .await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn emit(&self, response: Response) {
        let _ = self.responses.send(response).await;
    }
}

impl Drop for Proxy {
    /// Fires every open socket's `stop` signal so its reader task exits as
    /// soon as the proxy actor itself stops, instead of lingering on its
    /// own `recv_from`. Run when `run()` returns normally and also when the
    /// caller aborts the actor task outright, since aborting drops `self`
    /// mid-poll.
    fn drop(&mut self) {
        for (_, socket) in self.sockets.drain() {
            let _ = socket.stop.send(());
        }
    }
}
