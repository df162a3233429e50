//! DAP transport abstraction layer.
//!
//! A transport delivers one framed JSON object per message. The canonical
//! encoding is Content-Length prefixed framing over a byte stream (stdio or
//! TCP); tests and embedders can also exchange already-parsed messages over
//! in-process channels via [`RawClient::pair`].

use crate::proto::ProtocolMessage;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("DAP connection closed")]
    Closed,
    #[error("malformed DAP frame: {0}")]
    Malformed(String),
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Receiving half of a message-framed full-duplex connection.
#[async_trait(?Send)]
pub trait MessageRecv {
    async fn recv(&mut self) -> Result<ProtocolMessage, TransportError>;
}

/// Sending half of a message-framed full-duplex connection.
#[async_trait(?Send)]
pub trait MessageSend {
    async fn send(&mut self, message: ProtocolMessage) -> Result<(), TransportError>;
}

/// A connected adapter transport, as returned by `Adapter::connect`.
pub struct RawClient {
    pub recv: Box<dyn MessageRecv>,
    pub send: Box<dyn MessageSend>,
}

impl RawClient {
    /// Content-Length framed transport over a byte stream pair.
    pub fn framed<R, W>(read: R, write: W) -> RawClient
    where
        R: AsyncRead + Unpin + 'static,
        W: AsyncWrite + Unpin + 'static,
    {
        RawClient {
            recv: Box::new(FramedReader {
                reader: BufReader::new(read),
            }),
            send: Box::new(FramedWriter { writer: write }),
        }
    }

    /// Two cross-connected in-memory transports. No framing involved; used by
    /// tests and in-process adapters.
    pub fn pair() -> (RawClient, RawClient) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let left = RawClient {
            recv: Box::new(ChannelRecv(a_rx)),
            send: Box::new(ChannelSend(b_tx)),
        };
        let right = RawClient {
            recv: Box::new(ChannelRecv(b_rx)),
            send: Box::new(ChannelSend(a_tx)),
        };
        (left, right)
    }
}

struct FramedReader<R> {
    reader: BufReader<R>,
}

#[async_trait(?Send)]
impl<R: AsyncRead + Unpin> MessageRecv for FramedReader<R> {
    async fn recv(&mut self) -> Result<ProtocolMessage, TransportError> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line).await?;
            if read_n == 0 {
                return Err(TransportError::Closed);
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(
                    v.trim()
                        .parse()
                        .map_err(|_| TransportError::Malformed(format!("bad header `{line}`")))?,
                );
            }
        }

        let len = content_length
            .ok_or_else(|| TransportError::Malformed("missing Content-Length header".to_string()))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        serde_json::from_slice(&buf)
            .map_err(|err| TransportError::Malformed(format!("undecodable message: {err}")))
    }
}

struct FramedWriter<W> {
    writer: W,
}

#[async_trait(?Send)]
impl<W: AsyncWrite + Unpin> MessageSend for FramedWriter<W> {
    async fn send(&mut self, message: ProtocolMessage) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(&message)
            .map_err(|err| TransportError::Malformed(err.to_string()))?;
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

struct ChannelRecv(mpsc::UnboundedReceiver<ProtocolMessage>);

#[async_trait(?Send)]
impl MessageRecv for ChannelRecv {
    async fn recv(&mut self) -> Result<ProtocolMessage, TransportError> {
        self.0.recv().await.ok_or(TransportError::Closed)
    }
}

struct ChannelSend(mpsc::UnboundedSender<ProtocolMessage>);

#[async_trait(?Send)]
impl MessageSend for ChannelSend {
    async fn send(&mut self, message: ProtocolMessage) -> Result<(), TransportError> {
        self.0.send(message).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_framed_round_trip() {
        let (client_side, adapter_side) = tokio::io::duplex(4096);
        let (read, _write) = tokio::io::split(client_side);
        let (_read, write) = tokio::io::split(adapter_side);

        let mut writer = FramedWriter { writer: write };
        let mut reader = FramedReader {
            reader: BufReader::new(read),
        };

        writer
            .send(ProtocolMessage::request(1, "initialize", json!({"adapterID": "node"})))
            .await
            .unwrap();

        let msg = reader.recv().await.unwrap();
        match msg {
            ProtocolMessage::Request(req) => {
                assert_eq!(req.seq, 1);
                assert_eq!(req.command, "initialize");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_framed_detects_missing_header() {
        let (client_side, adapter_side) = tokio::io::duplex(4096);
        let (read, _w) = tokio::io::split(client_side);
        let (_r, mut write) = tokio::io::split(adapter_side);

        write.write_all(b"\r\n").await.unwrap();

        let mut reader = FramedReader {
            reader: BufReader::new(read),
        };
        let err = reader.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_pair_is_cross_connected() {
        let (mut left, mut right) = RawClient::pair();
        left.send
            .send(ProtocolMessage::event(1, "initialized", serde_json::Value::Null))
            .await
            .unwrap();
        let msg = right.recv.recv().await.unwrap();
        assert!(matches!(msg, ProtocolMessage::Event(_)));
    }

    #[tokio::test]
    async fn test_closed_pair_errors() {
        let (mut left, right) = RawClient::pair();
        drop(right);
        let err = left
            .send
            .send(ProtocolMessage::event(1, "output", serde_json::Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
