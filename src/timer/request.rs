use byteorder::{BigEndian, ByteOrder};

use crate::identity::Identity;

#[derive(Debug, Clone)]
pub struct Request {
    pub identity: Identity,
    pub lower_bound: u32,
}

/// Parses a timer request: `bytes 0..12 = identity`, `bytes 12..16 = lower
/// bound, big-endian u32`.
pub fn parse(data: &[u8]) -> Option<Request> {
    if data.len() < 16 {
        return None;
    }

    let identity = Identity::new(&data[0..12]).ok()?;
    let lower_bound = BigEndian::read_u32(&data[12..16]);

    Some(Request {
        identity,
        lower_bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_bytes() -> [u8; 12] {
        [1, 2, 3, 4, 0, 10, 5, 6, 7, 8, 0, 20]
    }

    #[test]
    fn parses_identity_and_lower_bound() {
        let mut data = id_bytes().to_vec();
        data.extend_from_slice(&42u32.to_be_bytes());
        let req = parse(&data).unwrap();
        assert_eq!(req.lower_bound, 42);
    }

    #[test]
    fn rejects_short_input() {
        let mut data = id_bytes().to_vec();
        data.extend_from_slice(&[0, 0, 42]);
        assert!(parse(&data).is_none());
    }
}
