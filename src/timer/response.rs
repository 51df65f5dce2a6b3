use byteorder::{BigEndian, ByteOrder};

use crate::identity::Identity;

#[derive(Debug, Clone)]
pub struct Response {
    pub identity: Identity,
    pub lower_bound: u32,
}

impl Response {
    pub fn new(identity: Identity, lower_bound: u32) -> Self {
        Self {
            identity,
            lower_bound,
        }
    }

    /// Serializes as 12 identity bytes followed by the 4-byte big-endian
    /// lower bound; unlike the other subsystems there is no leading type
    /// byte, since a timer response has only one shape.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(self.identity.as_bytes());
        let mut bound = [0u8; 4];
        BigEndian::write_u32(&mut bound, self.lower_bound);
        out.extend_from_slice(&bound);
        out
    }
}
