//! axum WebSocket adapter for the pumps.

use super::{Frame, SignalSink, SignalStream};
use crate::errors::SignalingError;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(Bytes::from(data)),
            Message::Ping(data) => Frame::Ping(Bytes::from(data)),
            Message::Pong(data) => Frame::Pong(Bytes::from(data)),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data.to_vec()),
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close => Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: Cow::Borrowed(""),
            })),
        }
    }
}

#[async_trait]
impl SignalStream for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Option<Result<Frame, SignalingError>> {
        let message = self.next().await?;
        Some(
            message
                .map(Frame::from)
                .map_err(|e| SignalingError::Transport(format!("socket read failed: {e}"))),
        )
    }
}

#[async_trait]
impl SignalSink for SplitSink<WebSocket, Message> {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), SignalingError> {
        self.send(Message::from(frame))
            .await
            .map_err(|e| SignalingError::Transport(format!("socket write failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frames_convert_both_ways() {
        let frame = Frame::from(Message::Text("{\"type\":\"ping\"}".to_string()));
        assert_eq!(frame, Frame::Text("{\"type\":\"ping\"}".to_string()));
        assert!(matches!(Message::from(frame), Message::Text(_)));
    }

    #[test]
    fn test_close_frame_is_normal_closure() {
        assert!(matches!(
            Message::from(Frame::Close),
            Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                ..
            }))
        ));
        assert_eq!(Frame::from(Message::Close(None)), Frame::Close);
    }
}
