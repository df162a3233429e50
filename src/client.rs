//! Protocol client: request/response correlation and event dispatch.
//!
//! The client owns the transport tasks. Inbound responses are matched to
//! pending requests by sequence number (responses may arrive out of order);
//! inbound events and reverse requests are handed to the session through
//! ordered channels. A transport failure rejects every pending request and
//! closes both channels, which the session observes as a fatal error.

use crate::error::{Error, Result};
use crate::proto::events::Event;
use crate::proto::requests::Request;
use crate::proto::ProtocolMessage;
use crate::transport::{RawClient, TransportError};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type PendingSender = oneshot::Sender<Result<Option<Value>>>;

#[derive(Clone)]
pub struct Client {
    inner: Rc<ClientInner>,
}

struct ClientInner {
    next_seq: Cell<i64>,
    pending: RefCell<HashMap<i64, PendingSender>>,
    outbound: RefCell<Option<mpsc::UnboundedSender<ProtocolMessage>>>,
    closing: Cell<bool>,
    reader: RefCell<Option<JoinHandle<()>>>,
    writer: RefCell<Option<JoinHandle<()>>>,
}

/// Inbound traffic the session consumes: adapter events in reception order
/// and reverse requests awaiting a response.
pub struct ClientChannels {
    pub events: mpsc::UnboundedReceiver<Event>,
    pub reverse_requests: mpsc::UnboundedReceiver<ReverseRequest>,
}

/// A server-to-client request; the handler must produce a response.
pub struct ReverseRequest {
    pub command: String,
    pub arguments: Value,
    responder: Responder,
}

impl ReverseRequest {
    pub fn respond(self, result: std::result::Result<Option<Value>, String>) {
        self.responder.respond(result);
    }
}

struct Responder {
    request_seq: i64,
    command: String,
    client: Rc<ClientInner>,
}

impl Responder {
    fn respond(self, result: std::result::Result<Option<Value>, String>) {
        let seq = self.client.alloc_seq();
        let message = ProtocolMessage::response(seq, self.request_seq, self.command, result);
        self.client.send_message(message);
    }
}

impl Client {
    /// Take ownership of a connected transport and spawn its io tasks.
    ///
    /// Must be called within a `LocalSet`; the tasks are `!Send`.
    pub fn start(raw: RawClient) -> (Client, ClientChannels) {
        let RawClient {
            mut recv,
            mut send,
        } = raw;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ProtocolMessage>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reverse_tx, reverse_rx) = mpsc::unbounded_channel();

        let inner = Rc::new(ClientInner {
            next_seq: Cell::new(1),
            pending: RefCell::new(HashMap::new()),
            outbound: RefCell::new(Some(outbound_tx)),
            closing: Cell::new(false),
            reader: RefCell::new(None),
            writer: RefCell::new(None),
        });

        let writer_inner = inner.clone();
        let writer = tokio::task::spawn_local(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Ok(line) = serde_json::to_string(&message) {
                    log::trace!(target: "dap", "-> {line}");
                }
                if let Err(err) = send.send(message).await {
                    log::warn!(target: "dap", "transport write failed: {err:#}");
                    writer_inner.shutdown();
                    break;
                }
            }
        });

        let reader_inner = inner.clone();
        let reader = tokio::task::spawn_local(async move {
            loop {
                let message = match recv.recv().await {
                    Ok(message) => message,
                    Err(TransportError::Closed) => {
                        log::info!(target: "dap", "adapter connection closed");
                        break;
                    }
                    Err(err) => {
                        log::error!(target: "dap", "transport terminated: {err:#}");
                        break;
                    }
                };
                if let Ok(line) = serde_json::to_string(&message) {
                    log::trace!(target: "dap", "<- {line}");
                }
                match message {
                    ProtocolMessage::Response(resp) => {
                        let sender = reader_inner.pending.borrow_mut().remove(&resp.request_seq);
                        match sender {
                            Some(sender) => {
                                let result = if resp.success {
                                    Ok(resp.body)
                                } else {
                                    Err(Error::Adapter {
                                        command: resp.command,
                                        message: resp
                                            .message
                                            .unwrap_or_else(|| "request failed".to_string()),
                                    })
                                };
                                let _ = sender.send(result);
                            }
                            None => {
                                log::warn!(
                                    target: "dap",
                                    "dropping unmatched response for seq {} ({})",
                                    resp.request_seq,
                                    resp.command
                                );
                            }
                        }
                    }
                    ProtocolMessage::Event(envelope) => match Event::parse(envelope) {
                        Ok(event) => {
                            if events_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            log::warn!(target: "dap", "dropping undecodable event: {err:#}")
                        }
                    },
                    ProtocolMessage::Request(req) => {
                        let reverse = ReverseRequest {
                            command: req.command.clone(),
                            arguments: req.arguments,
                            responder: Responder {
                                request_seq: req.seq,
                                command: req.command,
                                client: reader_inner.clone(),
                            },
                        };
                        if reverse_tx.send(reverse).is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping events_tx/reverse_tx here closes the session's inbound
            // channels; the session treats that as a fatal transport loss.
            reader_inner.shutdown();
        });

        *inner.reader.borrow_mut() = Some(reader);
        *inner.writer.borrow_mut() = Some(writer);

        (
            Client { inner },
            ClientChannels {
                events: events_rx,
                reverse_requests: reverse_rx,
            },
        )
    }

    /// Issue a typed request and decode the response body.
    pub async fn request<R: Request>(&self, arguments: R::Arguments) -> Result<R::Response> {
        let body = self
            .request_raw(R::COMMAND, serde_json::to_value(arguments)?)
            .await?;
        Ok(serde_json::from_value(body.unwrap_or(Value::Null))?)
    }

    /// Issue a raw request; resolves with the response body on success and
    /// rejects with the adapter's error message on `success=false`.
    pub async fn request_raw(&self, command: &str, arguments: Value) -> Result<Option<Value>> {
        if self.inner.closing.get() {
            return Err(Error::TransportClosed);
        }
        let seq = self.inner.alloc_seq();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.borrow_mut().insert(seq, tx);

        let message = ProtocolMessage::request(seq, command, arguments);
        if !self.inner.try_send(message) {
            self.inner.pending.borrow_mut().remove(&seq);
            return Err(Error::TransportClosed);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::TransportClosed),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.get()
    }

    /// Graceful shutdown: rejects pending requests and stops the io tasks.
    pub fn close(&self) {
        self.inner.shutdown();
        if let Some(reader) = self.inner.reader.borrow_mut().take() {
            reader.abort();
        }
        if let Some(writer) = self.inner.writer.borrow_mut().take() {
            writer.abort();
        }
    }
}

impl ClientInner {
    fn alloc_seq(&self) -> i64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    fn try_send(&self, message: ProtocolMessage) -> bool {
        match &*self.outbound.borrow() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn send_message(&self, message: ProtocolMessage) {
        if !self.try_send(message) {
            log::warn!(target: "dap", "dropping outbound message, transport is closed");
        }
    }

    fn shutdown(&self) {
        if self.closing.replace(true) {
            return;
        }
        self.outbound.borrow_mut().take();
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for (_, sender) in pending {
            let _ = sender.send(Err(Error::TransportClosed));
        }
    }
}
