use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Data,
    Close,
    Error,
    ConnectSuccess,
    ConnectFailure,
}

impl ResponseType {
    const fn tag(self) -> u8 {
        match self {
            ResponseType::Data => 1,
            ResponseType::Close => 2,
            ResponseType::Error => 3,
            ResponseType::ConnectSuccess => 4,
            ResponseType::ConnectFailure => 5,
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

    pub fn close(identity: Identity) -> Self {
        Self {
            kind: ResponseType::Close,
            identity,
            payload: None,
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

    pub fn connect_success(identity: Identity) -> Self {
        Self {
            kind: ResponseType::ConnectSuccess,
            identity,
            payload: None,
            error_text: None,
        }
    }

    pub fn connect_failure(identity: Identity) -> Self {
        Self {
            kind: ResponseType::ConnectFailure,
            identity,
            payload: None,
            error_text: None,
        }
    }

    /// Serializes as: type byte, 12 identity bytes, then the payload (for
    /// `Data`) or the UTF-8 error text (for `Error`); nothing for the rest.
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
            ResponseType::Close | ResponseType::ConnectSuccess | ResponseType::ConnectFailure => {}
        }

        out
    }

    /// Per the Router's forwarding policy: an `Error` with empty text is
    /// dropped silently rather than forwarded to Persona; every other
    /// response is forwarded.
    pub fn should_forward(&self) -> bool {
        match self.kind {
            ResponseType::Error => !self.error_text.as_deref().unwrap_or("").is_empty(),
            _ => true,
        }
    }
}
