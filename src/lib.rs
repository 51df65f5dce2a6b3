//! Frontend/Router core: multiplexes a length-prefixed Persona sub-process
//! link into TCP, UDP, and timer subsystem proxies, each addressed by flow
//! identity and demultiplexed by a one-byte subsystem tag.

pub mod config;
pub mod framing;
pub mod identity;
pub mod link;
pub mod process;
pub mod router;
pub mod tag;
pub mod tcp;
pub mod timer;
pub mod udp;
