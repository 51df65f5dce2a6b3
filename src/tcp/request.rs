use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Open,
    Write,
    Close,
}

impl RequestType {
    const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Open),
            2 => Some(Self::Write),
            3 => Some(Self::Close),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestType,
    pub identity: Identity,
    pub payload: Option<Vec<u8>>,
}

/// Parses a TCP request from `byte0 = type, bytes 1..12 = identity, bytes
/// 13.. = payload`. Malformed input (short, unknown type, bad identity)
/// yields `None` — the router's policy is to log and drop.
pub fn parse(data: &[u8]) -> Option<Request> {
    if data.len() < 13 {
        return None;
    }

    let kind = RequestType::from_byte(data[0])?;
    let identity = Identity::new(&data[1..13]).ok()?;
    let payload = data[13..].to_vec();

    let payload = match kind {
        RequestType::Write => Some(payload),
        RequestType::Open | RequestType::Close => None,
    };

    Some(Request {
        kind,
        identity,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_bytes() -> [u8; 12] {
        [1, 2, 3, 4, 0, 10, 5, 6, 7, 8, 0, 20]
    }

    #[test]
    fn parses_open() {
        let mut data = vec![1];
        data.extend_from_slice(&id_bytes());
        let req = parse(&data).unwrap();
        assert_eq!(req.kind, RequestType::Open);
        assert!(req.payload.is_none());
    }

    #[test]
    fn parses_write_with_payload() {
        let mut data = vec![2];
        data.extend_from_slice(&id_bytes());
        data.extend_from_slice(b"hello");
        let req = parse(&data).unwrap();
        assert_eq!(req.kind, RequestType::Write);
        assert_eq!(req.payload.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn rejects_short_input() {
        assert!(parse(&[1, 2, 3]).is_none());
    }

    #[test]
    fn rejects_unknown_type() {
        let mut data = vec![99];
        data.extend_from_slice(&id_bytes());
        assert!(parse(&data).is_none());
    }
}
