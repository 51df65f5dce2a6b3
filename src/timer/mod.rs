//! Timer subsystem proxy: arms a retransmission timer per flow identity and
//! fires a response once it elapses. Requests for an identity with a
//! running timer reset its deadline rather than starting a second one;
//! there is no explicit cancellation.

pub mod request;
pub mod response;

pub use request::Request;
pub use response::Response;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::identity::Identity;

/// Canonical retransmission timeout. An earlier revision of this logic
/// used a six-second literal alongside a stale "3 seconds" comment;
/// three seconds is what's actually wanted.
const RETRANSMISSION_TIMEOUT: Duration = Duration::from_secs(3);
// Spec-mandated rendezvous queues: a sender blocks until the single slot is
// free, so a stalled consumer applies backpressure immediately rather than
// absorbing a backlog.
const QUEUE_CAPACITY: usize = 1;
const RESET_QUEUE_CAPACITY: usize = 1;

enum Control {
    Fired(String),
}

pub struct Proxy {
    requests: mpsc::Receiver<Request>,
    responses: mpsc::Sender<Response>,
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    timers: HashMap<String, mpsc::Sender<()>>,
}

impl Proxy {
    /// Spawns the proxy actor, returning the request sender, response
    /// receiver, and a handle to the actor task itself so the caller can
    /// abort it directly rather than wait on a channel-closure cascade.
    /// Aborting (or otherwise dropping) this task drops every reset sender
    /// in the table, which causes its paired waiter task to exit.
    pub fn spawn() -> (mpsc::Sender<Request>, mpsc::Receiver<Response>, JoinHandle<()>) {
        let (req_tx, req_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (resp_tx, resp_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(QUEUE_CAPACITY);

        let proxy = Proxy {
            requests: req_rx,
            responses: resp_tx,
            control_tx,
            control_rx,
            timers: HashMap::new(),
        };

        let handle = tokio::spawn(proxy.run());

        (req_tx, resp_rx, handle)
    }

    async fn run(mut self) {
        debug!("timer proxy started");

        loop {
            tokio::select! {
                maybe_req = self.requests.recv() => {
                    match maybe_req {
                        Some(req) => self.handle_request(req).await,
                        None => {
                            debug!("timer proxy stopping, request channel closed");
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
            Control::Fired(key) => {
                self.timers.remove(&key);
            }
        }
    }

    async fn handle_request(&mut self, req: Request) {
        let key = req.identity.as_str().to_string();

        if let Some(reset) = self.timers.get(&key) {
            trace!(identity = %req.identity, "resetting existing timer");
            let _ = reset.send(()).await;
            return;
        }

        trace!(identity = %req.identity, lower_bound = req.lower_bound, "arming new timer");
        let (reset_tx, reset_rx) = mpsc::channel(RESET_QUEUE_CAPACITY);
        self.timers.insert(key, reset_tx);

        tokio::spawn(Self::wait(
            req.identity,
            req.lower_bound,
            self.responses.clone(),
            self.control_tx.clone(),
            reset_rx,
        ));
    }

    async fn wait(
        identity: Identity,
        lower_bound: u32,
        responses: mpsc::Sender<Response>,
        control: mpsc::Sender<Control>,
        mut reset_rx: mpsc::Receiver<()>,
    ) {
        let mut deadline = Box::pin(sleep(RETRANSMISSION_TIMEOUT));

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    trace!(identity = %identity, "timer fired");
                    let _ = responses
                        .send(Response::new(identity.clone(), lower_bound))
                        .await;
                    let _ = control
                        .send(Control::Fired(identity.as_str().to_string()))
                        .await;
                    return;
                }
                maybe_reset = reset_rx.recv() => {
                    match maybe_reset {
                        Some(()) => {
                            deadline.as_mut().reset(Instant::now() + RETRANSMISSION_TIMEOUT);
                        }
                        None => {
                            // Sender side (the proxy's table entry) is gone, which
                            // only happens once this timer has already fired and
                            // been evicted; nothing left to do.
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_for(port: u16) -> Identity {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&[10, 0, 0, 1]);
        bytes[4..6].copy_from_slice(&1u16.to_be_bytes());
        bytes[6..10].copy_from_slice(&[10, 0, 0, 2]);
        bytes[10..12].copy_from_slice(&port.to_be_bytes());
        Identity::new(&bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_timeout() {
        let (req_tx, mut resp_rx, _handle) = Proxy::spawn();
        let identity = identity_for(1);

        req_tx
            .send(Request {
                identity: identity.clone(),
                lower_bound: 9,
            })
            .await
            .unwrap();

        tokio::time::advance(RETRANSMISSION_TIMEOUT + Duration::from_millis(1)).await;

        let resp = resp_rx.recv().await.unwrap();
        assert_eq!(resp.identity.as_str(), identity.as_str());
        assert_eq!(resp.lower_bound, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_resets_rather_than_firing_twice() {
        let (req_tx, mut resp_rx, _handle) = Proxy::spawn();
        let identity = identity_for(2);

        req_tx
            .send(Request {
                identity: identity.clone(),
                lower_bound: 1,
            })
            .await
            .unwrap();

        tokio::time::advance(RETRANSMISSION_TIMEOUT - Duration::from_millis(500)).await;
        tokio::task::yield_now().await;

        // Reset before it fires; the response's lower bound should still be
        // the one captured when the timer was first created.
        req_tx
            .send(Request {
                identity: identity.clone(),
                lower_bound: 42,
            })
            .await
            .unwrap();
        tokio::task::yield_now().await;

        tokio::time::advance(RETRANSMISSION_TIMEOUT - Duration::from_millis(500)).await;
        assert!(resp_rx.try_recv().is_err(), "timer fired before the reset deadline");

        tokio::time::advance(Duration::from_secs(1)).await;
        let resp = resp_rx.recv().await.unwrap();
        assert_eq!(resp.lower_bound, 1);
    }
}
