//! Persona subprocess lifecycle: spawns Persona, wires its stdio and a
//! client stream through a [`Router`] via the length-prefixed frame pumps,
//! and waits for any leg of the link to end.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::link::{self, LinkSide};
use crate::router::Router;

// Spec-mandated rendezvous queues: a sender blocks until the single slot is
// free, so a stalled consumer applies backpressure immediately rather than
// absorbing a backlog.
const QUEUE_CAPACITY: usize = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn persona process")]
    Spawn(#[source] std::io::Error),

    #[error("persona process did not expose a stdin pipe")]
    MissingStdin,

    #[error("persona process did not expose a stdout pipe")]
    MissingStdout,

    #[error("client read pump failed: {0}")]
    ClientRead(#[source] link::PumpError),

    #[error("client write pump failed: {0}")]
    ClientWrite(#[source] link::PumpError),

    #[error("persona read pump failed: {0}")]
    PersonaRead(#[source] link::PumpError),

    #[error("persona write pump failed: {0}")]
    PersonaWrite(#[source] link::PumpError),

    #[error("client read pump task panicked: {0}")]
    ClientReadPanicked(#[source] tokio::task::JoinError),

    #[error("client write pump task panicked: {0}")]
    ClientWritePanicked(#[source] tokio::task::JoinError),

    #[error("persona read pump task panicked: {0}")]
    PersonaReadPanicked(#[source] tokio::task::JoinError),

    #[error("persona write pump task panicked: {0}")]
    PersonaWritePanicked(#[source] tokio::task::JoinError),
}

impl Error {
    /// Process exit code for this failure, following the historical
    /// launcher's per-leg convention. A pump task panicking is treated as a
    /// fatal failure of that same leg, not a clean exit.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Spawn(_) | Error::MissingStdin => 12,
            Error::MissingStdout => 13,
            Error::ClientRead(_) | Error::ClientReadPanicked(_) => 2,
            Error::ClientWrite(_) | Error::ClientWritePanicked(_) => 3,
            Error::PersonaRead(_) | Error::PersonaReadPanicked(_) => 4,
            Error::PersonaWrite(_) | Error::PersonaWritePanicked(_) => 5,
        }
    }
}

/// Runs one client session: spawns Persona, wires the two links through a
/// fresh [`Router`], and blocks until either side of the link ends, at
/// which point everything for this session is torn down.
pub async fn run_session<S>(client: S, persona_path: &Path) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut child = Command::new(persona_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::Spawn)?;

    let persona_stdin = child.stdin.take().ok_or(Error::MissingStdin)?;
    let persona_stdout = child.stdout.take().ok_or(Error::MissingStdout)?;

    let (client_read, client_write) = tokio::io::split(client);

    let (client_in_tx, client_in_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (client_out_tx, client_out_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (persona_in_tx, persona_in_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (persona_out_tx, persona_out_rx) = mpsc::channel(QUEUE_CAPACITY);

    let router = Router::spawn(client_in_rx, client_out_tx, persona_in_rx, persona_out_tx);

    let mut client_reader = tokio::spawn(link::pump_reader_to_queue(
        LinkSide::Client,
        client_read,
        client_in_tx,
    ));
    let mut client_writer = tokio::spawn(link::pump_queue_to_writer(
        LinkSide::Client,
        client_write,
        client_out_rx,
    ));
    let mut persona_reader = tokio::spawn(link::pump_reader_to_queue(
        LinkSide::Persona,
        persona_stdout,
        persona_in_tx,
    ));
    let mut persona_writer = tokio::spawn(link::pump_queue_to_writer(
        LinkSide::Persona,
        persona_stdin,
        persona_out_rx,
    ));

    let result = tokio::select! {
        res = &mut client_reader => map_pump_result(res, Error::ClientRead, Error::ClientReadPanicked),
        res = &mut client_writer => map_pump_result(res, Error::ClientWrite, Error::ClientWritePanicked),
        res = &mut persona_reader => map_pump_result(res, Error::PersonaRead, Error::PersonaReadPanicked),
        res = &mut persona_writer => map_pump_result(res, Error::PersonaWrite, Error::PersonaWritePanicked),
    };

    router.abort();
    client_reader.abort();
    client_writer.abort();
    persona_reader.abort();
    persona_writer.abort();
    let _ = child.kill().await;

    info!(outcome = ?result.as_ref().err(), "session ended");
    result
}

fn map_pump_result(
    res: Result<Result<(), link::PumpError>, tokio::task::JoinError>,
    wrap: impl Fn(link::PumpError) -> Error,
    wrap_panic: impl Fn(tokio::task::JoinError) -> Error,
) -> Result<(), Error> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(pump_err)) => Err(wrap(pump_err)),
        Err(join_err) => {
            error!(error = %join_err, "pump task panicked");
            Err(wrap_panic(join_err))
        }
    }
}
