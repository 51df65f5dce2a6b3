use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::sync::Mutex;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use persona_router::config::Config;
use persona_router::process;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    install_tracing(&config);

    let exit_code = match config.listen {
        Some(addr) => run_standalone(addr, &config).await,
        None => run_handoff(&config).await,
    };

    std::process::exit(exit_code);
}

fn install_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("failed to open log file");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Standalone mode: bind and accept connections directly, spawning one
/// session per connection. Useful for local testing without a front tier.
async fn run_standalone(addr: SocketAddr, config: &Config) -> i32 {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind listen address");
            return 10;
        }
    };

    info!(%addr, "listening for standalone test connections");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, "failed to accept connection");
                return 11;
            }
        };

        info!(%peer, "accepted connection");
        let persona_path = config.persona_path.clone();
        tokio::spawn(async move {
            if let Err(err) = process::run_session(socket, &persona_path).await {
                error!(error = %err, "session ended with error");
            }
        });
    }
}

/// Handoff mode: the front tier has already accepted the client connection
/// and passed it down as file descriptor 3.
#[cfg(unix)]
async fn run_handoff(config: &Config) -> i32 {
    use std::os::unix::io::FromRawFd;
    use tokio::net::TcpStream;

    // SAFETY: fd 3 is the already-accepted client socket handed off by the
    // front tier under this binary's launch contract.
    let std_socket = unsafe { std::net::TcpStream::from_raw_fd(3) };

    if let Err(err) = std_socket.set_nonblocking(true) {
        error!(error = %err, "failed to prepare handed-off socket");
        return 11;
    }

    let socket = match TcpStream::from_std(std_socket) {
        Ok(socket) => socket,
        Err(err) => {
            error!(error = %err, "failed to adopt handed-off socket");
            return 11;
        }
    };

    match process::run_session(socket, &config.persona_path).await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "session ended with error");
            err.exit_code()
        }
    }
}

#[cfg(not(unix))]
async fn run_handoff(_config: &Config) -> i32 {
    error!("fd-3 handoff mode is only supported on unix targets; pass --listen instead");
    11
}
