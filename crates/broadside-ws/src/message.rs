//! WebSocket message types.
//!
//! A [`Message`] is the immutable payload handed to a connection or a
//! broadcast. Before it enters an outbound queue it is converted once into a
//! protocol frame whose payload is reference counted, so fanning one message
//! out to thousands of connections does not copy the payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::error::{CloseCode, WsError, WsResult};

/// A WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message.
    Binary(Bytes),
    /// A ping frame with optional payload.
    Ping(Bytes),
    /// A pong frame with optional payload.
    Pong(Bytes),
    /// A close frame with optional code and reason.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a new text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a new binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Create a close message with a code and reason.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseFrame::new(code, reason)))
    }

    /// Check if this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Check if this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Check if this is a close message.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Check if this is a data message (text or binary).
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text(_) | Self::Binary(_))
    }

    /// Check if this is a control message (ping, pong, or close).
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping(_) | Self::Pong(_) | Self::Close(_))
    }

    /// Get the message payload as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the message payload as bytes. Returns `None` for close messages.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(s) => Some(s.as_bytes()),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => Some(b),
            Self::Close(_) => None,
        }
    }

    /// Try to parse the text message as JSON.
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> WsResult<T> {
        let text = self
            .as_text()
            .ok_or_else(|| WsError::DecodeFailed("not a text message".to_string()))?;
        serde_json::from_str(text).map_err(|e| WsError::DecodeFailed(e.to_string()))
    }

    /// Create a text message from a JSON-serializable value.
    pub fn from_json<T: Serialize>(value: &T) -> WsResult<Self> {
        let text =
            serde_json::to_string(value).map_err(|e| WsError::EncodeFailed(e.to_string()))?;
        Ok(Self::Text(text))
    }

    /// Get the length of the message payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b.len(),
            Self::Close(Some(frame)) => 2 + frame.reason.len(),
            Self::Close(None) => 0,
        }
    }

    /// Check if the message payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Close(_) => "close",
        }
    }

    /// Convert into the frame type carried by outbound queues.
    pub(crate) fn into_frame(self) -> tungstenite::Message {
        tungstenite::Message::from(self)
    }

    /// Convert a text or binary message into an outbound frame.
    ///
    /// Control frames belong to the connection's own protocol handling, so
    /// ping, pong and close messages fail with [`WsError::InvalidMessage`].
    pub(crate) fn into_data_frame(self) -> WsResult<tungstenite::Message> {
        if !self.is_data() {
            return Err(WsError::InvalidMessage { kind: self.kind() });
        }
        Ok(self.into_frame())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b.into())
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl From<&[u8]> for Message {
    fn from(b: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(b))
    }
}

impl From<tungstenite::Message> for Message {
    fn from(msg: tungstenite::Message) -> Self {
        match msg {
            tungstenite::Message::Text(s) => Self::Text(s.as_str().to_owned()),
            tungstenite::Message::Binary(b) => Self::Binary(b),
            tungstenite::Message::Ping(b) => Self::Ping(b),
            tungstenite::Message::Pong(b) => Self::Pong(b),
            tungstenite::Message::Close(frame) => Self::Close(frame.map(CloseFrame::from)),
            tungstenite::Message::Frame(_) => Self::Binary(Bytes::new()),
        }
    }
}

impl From<Message> for tungstenite::Message {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(s) => Self::Text(s.into()),
            Message::Binary(b) => Self::Binary(b),
            Message::Ping(b) => Self::Ping(b),
            Message::Pong(b) => Self::Pong(b),
            Message::Close(frame) => {
                Self::Close(frame.map(tungstenite::protocol::CloseFrame::from))
            }
        }
    }
}

/// A WebSocket close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close code.
    pub code: u16,
    /// The close reason.
    pub reason: Cow<'static, str>,
}

impl CloseFrame {
    /// Create a new close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            reason: Cow::Owned(reason.into()),
        }
    }

    /// Get the close code enum value if it's a known code.
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }
}

impl From<tungstenite::protocol::CloseFrame> for CloseFrame {
    fn from(frame: tungstenite::protocol::CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: Cow::Owned(frame.reason.as_str().to_owned()),
        }
    }
}

impl From<CloseFrame> for tungstenite::protocol::CloseFrame {
    fn from(frame: CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: frame.reason.into_owned().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text() {
        let msg = Message::text("ping");
        assert!(msg.is_text());
        assert!(msg.is_data());
        assert_eq!(msg.as_text(), Some("ping"));
        assert_eq!(msg.len(), 4);
        assert_eq!(msg.kind(), "text");
    }

    #[test]
    fn test_message_binary() {
        let msg = Message::binary(vec![1, 2, 3, 4]);
        assert!(msg.is_binary());
        assert_eq!(msg.as_bytes(), Some(&[1, 2, 3, 4][..]));
        assert_eq!(msg.len(), 4);
    }

    #[test]
    fn test_message_close() {
        let msg = Message::close(CloseCode::GoingAway, "server stopping");
        assert!(msg.is_close());
        assert!(msg.is_control());
        match &msg {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.close_code(), Some(CloseCode::GoingAway));
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn test_only_data_becomes_outbound_frame() {
        let frame = Message::text("tick").into_data_frame().unwrap();
        assert_eq!(frame.to_text().unwrap(), "tick");
        assert!(Message::binary(vec![7]).into_data_frame().is_ok());

        let refused = [
            Message::close(CloseCode::Normal, "bye"),
            Message::Ping(Bytes::from_static(b"p")),
            Message::Pong(Bytes::new()),
        ];
        for message in refused {
            let kind = message.kind();
            match message.into_data_frame() {
                Err(WsError::InvalidMessage { kind: refused }) => assert_eq!(refused, kind),
                other => panic!("expected invalid message, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_message_json() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Tick {
            seq: u32,
        }

        let msg = Message::from_json(&Tick { seq: 7 }).unwrap();
        assert_eq!(msg.as_text(), Some(r#"{"seq":7}"#));
        assert_eq!(msg.json::<Tick>().unwrap(), Tick { seq: 7 });
        assert!(Message::binary(vec![1]).json::<Tick>().is_err());
    }

    #[test]
    fn test_frame_conversion_preserves_payload() {
        let frame = Message::text("héllo").into_frame();
        assert_eq!(frame.to_text().unwrap(), "héllo");

        let frame = Message::binary(vec![0xde, 0xad]).into_frame();
        assert_eq!(&frame.into_data()[..], &[0xde, 0xad][..]);
    }

    #[test]
    fn test_close_frame_conversion() {
        let frame = Message::close(CloseCode::PolicyViolation, "slow consumer").into_frame();
        let back = Message::from(frame);
        match back {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1008);
                assert_eq!(frame.reason, "slow consumer");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
