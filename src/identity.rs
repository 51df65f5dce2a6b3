//! Flow identity: the 12-byte source/destination address+port tuple that
//! names one logical end-to-end flow.

use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

pub const IDENTITY_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("identity requires exactly {IDENTITY_LEN} bytes, got {0}")]
    WrongLength(usize),
}

/// A 12-byte fixed-width flow identity: source IPv4 (4), source port (2,
/// big-endian), destination IPv4 (4), destination port (2, big-endian).
///
/// The byte form is the sole source of truth; [`Identity::as_str`] caches
/// a canonical `a.b.c.d:p:w.x.y.z:q` rendering derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    bytes: [u8; IDENTITY_LEN],
    cached_string: String,
}

impl Identity {
    pub fn new(data: &[u8]) -> Result<Self, Error> {
        if data.len() != IDENTITY_LEN {
            return Err(Error::WrongLength(data.len()));
        }

        let mut bytes = [0u8; IDENTITY_LEN];
        bytes.copy_from_slice(data);

        let cached_string = render(&bytes);

        Ok(Self {
            bytes,
            cached_string,
        })
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.bytes
    }

    /// Canonical `a.b.c.d:p:w.x.y.z:q` map key, derivable from the byte form.
    pub fn as_str(&self) -> &str {
        &self.cached_string
    }

    pub fn source_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3])
    }

    pub fn source_port(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[4..6])
    }

    pub fn destination_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.bytes[6], self.bytes[7], self.bytes[8], self.bytes[9])
    }

    pub fn destination_port(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[10..12])
    }

    pub fn destination(&self) -> std::net::SocketAddrV4 {
        std::net::SocketAddrV4::new(self.destination_addr(), self.destination_port())
    }
}

fn render(bytes: &[u8; IDENTITY_LEN]) -> String {
    let source_addr = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let source_port = BigEndian::read_u16(&bytes[4..6]);
    let dest_addr = Ipv4Addr::new(bytes[6], bytes[7], bytes[8], bytes[9]);
    let dest_port = BigEndian::read_u16(&bytes[10..12]);

    format!("{source_addr}:{source_port}:{dest_addr}:{dest_port}")
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cached_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> [u8; IDENTITY_LEN] {
        [1, 2, 3, 4, 0, 100, 5, 6, 7, 8, 0, 200]
    }

    #[test]
    fn round_trips_byte_form() {
        let id = Identity::new(&sample_bytes()).unwrap();
        assert_eq!(id.as_bytes(), &sample_bytes());
    }

    #[test]
    fn renders_canonical_string() {
        let id = Identity::new(&sample_bytes()).unwrap();
        assert_eq!(id.as_str(), "1.2.3.4:100:5.6.7.8:200");
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(Identity::new(&[0u8; 11]), Err(Error::WrongLength(11)));
        assert_eq!(Identity::new(&[0u8; 13]), Err(Error::WrongLength(13)));
    }

    #[test]
    fn destination_socket_addr_matches_fields() {
        let id = Identity::new(&sample_bytes()).unwrap();
        assert_eq!(id.destination().ip(), &Ipv4Addr::new(5, 6, 7, 8));
        assert_eq!(id.destination().port(), 200);
    }

    #[test]
    fn equality_and_hash_are_over_all_12_bytes() {
        let a = Identity::new(&sample_bytes()).unwrap();
        let mut other = sample_bytes();
        other[11] ^= 1;
        let b = Identity::new(&other).unwrap();
        assert_ne!(a, b);
    }
}
