//! Link pumps: copy length-prefixed frames between an endpoint stream and
//! an in-process queue, in either direction.
//!
//! Each pump runs until the underlying stream errors or reaches EOF, at
//! which point it reports which named side failed so the caller can decide
//! how to shut down (see [`crate::process`]).

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::framing::{Frame, FrameReader, FrameWriter};

/// Names a link endpoint for diagnostics, mirroring the original pump's
/// `InputName`/`OutputName` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    Client,
    Persona,
}

impl std::fmt::Display for LinkSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSide::Client => write!(f, "client"),
            LinkSide::Persona => write!(f, "persona"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("link pump failure on {side}: {source}")]
pub struct PumpError {
    pub side: LinkSide,
    #[source]
    pub source: crate::framing::Error,
}

/// Reads frames from `reader` and forwards them onto `output` until the
/// stream errors or the channel receiver is dropped.
pub async fn pump_reader_to_queue<R: AsyncRead + Unpin>(
    side: LinkSide,
    reader: R,
    output: mpsc::Sender<Frame>,
) -> Result<(), PumpError> {
    let mut reader = FrameReader::new(reader);

    loop {
        let frame = reader
            .read_frame()
            .await
            .map_err(|source| PumpError { side, source })?;

        if tracing::event_enabled!(tracing::Level::TRACE) {
            trace!(%side, bytes = frame.len(), data = hex::encode(&frame), "read frame from link");
        }

        if output.send(frame).await.is_err() {
            debug!(%side, "reader pump stopping, queue receiver dropped");
            return Ok(());
        }
    }
}

/// Consumes frames from `input` and writes them to `writer` until the
/// stream errors or the channel sender side is closed.
pub async fn pump_queue_to_writer<W: AsyncWrite + Unpin>(
    side: LinkSide,
    writer: W,
    mut input: mpsc::Receiver<Frame>,
) -> Result<(), PumpError> {
    let mut writer = FrameWriter::new(writer);

    while let Some(frame) = input.recv().await {
        if tracing::event_enabled!(tracing::Level::TRACE) {
            trace!(%side, bytes = frame.len(), data = hex::encode(&frame), "writing frame to link");
        }

        writer
            .write_frame(&frame)
            .await
            .map_err(|source| PumpError { side, source })?;
    }

    debug!(%side, "writer pump stopping, queue sender dropped");
    Ok(())
}
