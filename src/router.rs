//! The Router: demultiplexes the Persona link by subsystem tag, fans
//! requests out to the TCP/UDP/Timer proxies, and re-tags their responses
//! on the way back. Client<->Persona frames carrying the Client tag are
//! passed through untouched.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::framing::Frame;
use crate::tag::Subsystem;
use crate::{tcp, timer, udp};

/// Owns the five concurrent routing loops and the three subsystem proxy
/// actor tasks they feed. Aborting a `Router` tears the whole thing down:
/// every task here is aborted directly (rather than relying on its queues
/// being closed out from under it), and aborting a proxy task drops its
/// connection/socket/timer table, which in turn tears down that proxy's
/// reader/waiter tasks.
pub struct Router {
    tasks: Vec<JoinHandle<()>>,
}

impl Router {
    /// Spawns the Router's internal tasks. `from_client`/`to_client` are the
    /// raw frame queues for the Client link; `from_persona`/`to_persona` for
    /// the Persona link.
    pub fn spawn(
        from_client: mpsc::Receiver<Frame>,
        to_client: mpsc::Sender<Frame>,
        from_persona: mpsc::Receiver<Frame>,
        to_persona: mpsc::Sender<Frame>,
    ) -> Self {
        let (tcp_req_tx, tcp_resp_rx, tcp_task) = tcp::Proxy::spawn();
        let (udp_req_tx, udp_resp_rx, udp_task) = udp::Proxy::spawn();
        let (timer_req_tx, timer_resp_rx, timer_task) = timer::Proxy::spawn();

        let tasks = vec![
            tokio::spawn(route_client_to_persona(from_client, to_persona.clone())),
            tokio::spawn(route_persona(
                from_persona,
                to_client,
                tcp_req_tx,
                udp_req_tx,
                timer_req_tx,
            )),
            tokio::spawn(route_responses(
                tcp_resp_rx,
                to_persona.clone(),
                Subsystem::Tcp,
                |r: tcp::Response| r.serialize(),
                tcp::Response::should_forward,
            )),
            tokio::spawn(route_responses(
                udp_resp_rx,
                to_persona.clone(),
                Subsystem::Udp,
                |r: udp::Response| r.serialize(),
                udp::Response::should_forward,
            )),
            tokio::spawn(route_responses(
                timer_resp_rx,
                to_persona,
                Subsystem::Timer,
                |r: timer::Response| r.serialize(),
                |_: &timer::Response| true,
            )),
            tcp_task,
            udp_task,
            timer_task,
        ];

        Router { tasks }
    }

    /// Aborts every routing loop and every subsystem proxy actor. Each
    /// proxy's `Drop` impl (or, for Timer, plain channel closure) fires the
    /// stop signal for every still-open connection/socket/timer in its
    /// table as soon as its task is torn down here.
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn route_client_to_persona(mut from_client: mpsc::Receiver<Frame>, to_persona: mpsc::Sender<Frame>) {
    while let Some(frame) = from_client.recv().await {
        let mut tagged = Vec::with_capacity(frame.len() + 1);
        tagged.push(Subsystem::Client.tag());
        tagged.extend_from_slice(&frame);

        if to_persona.send(tagged).await.is_err() {
            return;
        }
    }
}

async fn route_persona(
    mut from_persona: mpsc::Receiver<Frame>,
    to_client: mpsc::Sender<Frame>,
    tcp_requests: mpsc::Sender<tcp::Request>,
    udp_requests: mpsc::Sender<udp::Request>,
    timer_requests: mpsc::Sender<timer::Request>,
) {
    while let Some(frame) = from_persona.recv().await {
        let Some((&tag, rest)) = frame.split_first() else {
            warn!("dropping empty persona frame");
            continue;
        };

        match Subsystem::from_tag(tag) {
            Some(Subsystem::Client) => {
                if to_client.send(rest.to_vec()).await.is_err() {
                    return;
                }
            }
            Some(Subsystem::Tcp) => match tcp::request::parse(rest) {
                Some(req) => {
                    let _ = tcp_requests.send(req).await;
                }
                None => warn!("dropping malformed tcp request from persona"),
            },
            Some(Subsystem::Udp) => match udp::request::parse(rest) {
                Some(req) => {
                    let _ = udp_requests.send(req).await;
                }
                None => warn!("dropping malformed udp request from persona"),
            },
            Some(Subsystem::Timer) => match timer::request::parse(rest) {
                Some(req) => {
                    let _ = timer_requests.send(req).await;
                }
                None => warn!("dropping malformed timer request from persona"),
            },
            None => warn!(tag, "dropping persona frame with unknown subsystem tag"),
        }
    }
}

/// Drains a subsystem's response queue, serializes each response, prepends
/// its subsystem tag, and forwards it to Persona. Generic over the
/// response type so the same loop shape serves TCP, UDP, and Timer without
/// risking the tag/queue mismatch that historically mistagged UDP
/// responses as TCP. `should_forward` lets each subsystem drop responses
/// that carry nothing worth telling Persona about (an `Error` with empty
/// text); Timer has no such case and always forwards.
async fn route_responses<T>(
    mut responses: mpsc::Receiver<T>,
    to_persona: mpsc::Sender<Frame>,
    subsystem: Subsystem,
    serialize: impl Fn(T) -> Vec<u8>,
    should_forward: impl Fn(&T) -> bool,
) {
    while let Some(response) = responses.recv().await {
        if !should_forward(&response) {
            continue;
        }

        let mut tagged = vec![subsystem.tag()];
        tagged.extend_from_slice(&serialize(response));

        if to_persona.send(tagged).await.is_err() {
            return;
        }
    }
}
