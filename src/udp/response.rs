use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Data,
    Error,
}

impl ResponseType {
    const fn tag(self) -> u8 {
        match self {
            ResponseType::Data => 1,
            ResponseType::Error => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub kind: ResponseType,
    pub identity: Identity,
    pub payload: Option<Vec<u8>>,
    pub error_text: Option<String>,
}

impl Response {
    pub fn data(identity: Identity, payload: Vec<u8>) -> Self {
        Self {
            kind: ResponseType::Data,
            identity,
            payload: Some(payload),
            error_text: None,
        }
    }

    pub fn error(identity: Identity, text: impl Into<String>) -> Self {
        Self {
            kind: ResponseType::Error,
            identity,
            payload: None,
            error_text: Some(text.into()),
        }
    }

    /// Serializes as: type byte, 12 identity bytes, then the datagram (for
    /// `Data`) or the UTF-8 error text (for `Error`).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13);
        out.push(self.kind.tag());
        out.extend_from_slice(self.identity.as_bytes());

        match self.kind {
            ResponseType::Data => {
                if let Some(payload) = &self.payload {
                    out.extend_from_slice(payload);
                }
            }
            ResponseType::Error => {
                if let Some(text) = &self.error_text {
                    out.extend_from_slice(text.as_bytes());
                }
            }
        }

        out
    }

    /// Per the Router's forwarding policy: an `Error` with empty text is
    /// dropped silently rather than forwarded to Persona; every other
    /// response is forwarded.
    pub fn should_forward(&self) -> bool {
        match self.kind {
            ResponseType::Error => !self.error_text.as_deref().unwrap_or("").is_empty(),
            ResponseType::Data => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_identity() -> Identity {
        Identity::new(&[1, 2, 3, 4, 0, 10, 5, 6, 7, 8, 0, 20]).unwrap()
    }

    #[test]
    fn empty_error_text_is_not_forwarded() {
        let resp = Response::error(sample_identity(), "");
        assert!(!resp.should_forward());
    }

    #[test]
    fn non_empty_error_text_is_forwarded() {
        let resp = Response::error(sample_identity(), "no socket");
        assert!(resp.should_forward());
    }

    #[test]
    fn data_response_is_always_forwarded() {
        assert!(Response::data(sample_identity(), b"x".to_vec()).should_forward());
    }

    #[test]
    fn data_response_serializes_type_identity_and_payload() {
        let resp = Response::data(sample_identity(), b"abc".to_vec());
        let bytes = resp.serialize();
        assert_eq!(bytes[0], ResponseType::Data.tag());
        assert_eq!(&bytes[1..13], sample_identity().as_bytes());
        assert_eq!(&bytes[13..], b"abc");
    }

    #[test]
    fn error_response_serializes_text() {
        let resp = Response::error(sample_identity(), "no socket");
        let bytes = resp.serialize();
        assert_eq!(bytes[0], ResponseType::Error.tag());
        assert_eq!(&bytes[13..], b"no socket");
    }
}
