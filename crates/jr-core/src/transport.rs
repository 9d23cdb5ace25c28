//! Duplex WebSocket abstraction
//!
//! Accepted connections (axum) and dialed connections (tokio-tungstenite)
//! are both reduced to a boxed [`FrameSink`] and [`FrameStream`] pair so the
//! streaming session and the relay never depend on which side of a hop they
//! sit on. Ping and pong frames are handled by the WebSocket layer and are
//! filtered out here.

use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;

use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungsteniteCloseFrame;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::WebSocketStream;

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket};

use crate::error::TransportError;

/// Normal closure status code
pub const CLOSE_NORMAL: u16 = 1000;

/// Status code reported when a peer vanished without a close handshake
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Largest close reason a control frame can carry
pub const MAX_CLOSE_REASON: usize = 123;

/// Close frame contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    /// Normal closure with a reason, truncated to fit a control frame
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: truncate_reason(reason.into()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "close {}", self.code)
        } else {
            write!(f, "close {}: {}", self.code, self.reason)
        }
    }
}

/// One WebSocket data or close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<CloseReason>),
}

impl Frame {
    /// Close frame with code 1000 and the given reason
    pub fn close_normal(reason: impl Into<String>) -> Self {
        Frame::Close(Some(CloseReason::normal(reason)))
    }

    /// Payload bytes of a data frame
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(text) => Some(text.as_bytes()),
            Frame::Binary(bytes) => Some(bytes),
            Frame::Close(_) => None,
        }
    }

    fn into_axum(self) -> AxumMessage {
        match self {
            Frame::Text(text) => AxumMessage::Text(text),
            Frame::Binary(bytes) => AxumMessage::Binary(bytes),
            Frame::Close(reason) => AxumMessage::Close(reason.map(|r| AxumCloseFrame {
                code: r.code,
                reason: Cow::Owned(r.reason),
            })),
        }
    }

    fn from_axum(message: AxumMessage) -> Option<Self> {
        match message {
            AxumMessage::Text(text) => Some(Frame::Text(text)),
            AxumMessage::Binary(bytes) => Some(Frame::Binary(bytes)),
            AxumMessage::Close(frame) => Some(Frame::Close(frame.map(|f| CloseReason {
                code: f.code,
                reason: f.reason.into_owned(),
            }))),
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => None,
        }
    }

    fn into_tungstenite(self) -> TungsteniteMessage {
        match self {
            Frame::Text(text) => TungsteniteMessage::Text(text),
            Frame::Binary(bytes) => TungsteniteMessage::Binary(bytes),
            Frame::Close(reason) => {
                TungsteniteMessage::Close(reason.map(|r| TungsteniteCloseFrame {
                    code: CloseCode::from(r.code),
                    reason: Cow::Owned(r.reason),
                }))
            }
        }
    }

    fn from_tungstenite(message: TungsteniteMessage) -> Option<Self> {
        match message {
            TungsteniteMessage::Text(text) => Some(Frame::Text(text)),
            TungsteniteMessage::Binary(bytes) => Some(Frame::Binary(bytes)),
            TungsteniteMessage::Close(frame) => Some(Frame::Close(frame.map(|f| CloseReason {
                code: u16::from(f.code),
                reason: f.reason.into_owned(),
            }))),
            TungsteniteMessage::Ping(_)
            | TungsteniteMessage::Pong(_)
            | TungsteniteMessage::Frame(_) => None,
        }
    }
}

/// Outbound half of a connection
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Split an accepted axum WebSocket
pub fn from_axum(socket: WebSocket) -> (FrameSink, FrameStream) {
    let (tx, rx) = socket.split();

    let sink = tx
        .sink_map_err(|e| TransportError::WebSocket(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame.into_axum())));

    let stream = rx.filter_map(|item| {
        future::ready(match item {
            Ok(message) => Frame::from_axum(message).map(Ok),
            Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
        })
    });

    (Box::pin(sink), Box::pin(stream))
}

/// Split a dialed tokio-tungstenite WebSocket
pub fn from_tungstenite<S>(socket: WebSocketStream<S>) -> (FrameSink, FrameStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = socket.split();

    let sink = tx
        .sink_map_err(|e| TransportError::WebSocket(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame.into_tungstenite())));

    let stream = rx.filter_map(|item| {
        future::ready(match item {
            Ok(message) => Frame::from_tungstenite(message).map(Ok),
            Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
        })
    });

    (Box::pin(sink), Box::pin(stream))
}

/// One end of an in-process duplex connection
pub struct MemoryEnd {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Create two connected in-process ends.
///
/// Frames sent on one end arrive on the other. Dropping an end's sink ends
/// the peer's stream without a close frame.
pub fn memory_pair() -> (MemoryEnd, MemoryEnd) {
    let (a_tx, a_rx) = futures::channel::mpsc::unbounded::<Frame>();
    let (b_tx, b_rx) = futures::channel::mpsc::unbounded::<Frame>();

    let end = |tx: futures::channel::mpsc::UnboundedSender<Frame>,
               rx: futures::channel::mpsc::UnboundedReceiver<Frame>| {
        let sink: FrameSink = Box::pin(tx.sink_map_err(|_| TransportError::Closed));
        let stream: FrameStream = Box::pin(rx.map(Ok));
        MemoryEnd { sink, stream }
    };

    (end(a_tx, b_rx), end(b_tx, a_rx))
}

/// Outcome of one read from a [`FrameStream`], classified for error reporting
#[derive(Debug)]
pub enum Inbound {
    /// A data frame
    Data(Frame),
    /// The peer completed a close handshake
    Closed(Option<CloseReason>),
    /// The stream ended without a close frame
    Abnormal,
    /// The transport failed
    Failed(TransportError),
}

/// Read the next frame and classify it
pub async fn next_inbound(stream: &mut FrameStream) -> Inbound {
    match stream.next().await {
        Some(Ok(Frame::Close(reason))) => Inbound::Closed(reason),
        Some(Ok(frame)) => Inbound::Data(frame),
        Some(Err(e)) => Inbound::Failed(e),
        None => Inbound::Abnormal,
    }
}

/// Cut a close reason down to the control frame limit on a char boundary
pub fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}
