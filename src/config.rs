//! Command-line configuration, parsed with `clap` the way the rest of the
//! pack's binaries do.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Configuration for the `persona-router` binary.
///
/// By default the binary expects an already-accepted client socket handed
/// off on file descriptor 3 (the front tier's launch contract). Passing
/// `--listen` switches to a standalone mode useful for local testing: the
/// binary binds and accepts connections itself instead.
#[derive(Debug, Parser)]
#[command(
    name = "persona-router",
    about = "Multiplexes a Persona sub-process link into TCP, UDP, and timer subsystem proxies"
)]
pub struct Config {
    /// Bind and accept connections on this address instead of using the
    /// fd-3 handoff. Intended for standalone testing.
    #[arg(long, env = "PERSONA_ROUTER_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Path to the Persona executable spawned for each session.
    #[arg(long, env = "PERSONA_ROUTER_PERSONA_PATH")]
    pub persona_path: PathBuf,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "PERSONA_ROUTER_LOG_PATH")]
    pub log_path: Option<PathBuf>,
}
