use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::bind::BindRequest;
use crate::codec;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::ldap::{Message, MessageParams, MsgBindResponse, MAX_MESSAGE_ID};
use crate::tokiou;

type Pending = HashMap<u32, oneshot::Sender<Message>>;

// `None` once the reader has stopped
struct Contexts {
    contexts: Mutex<Option<Pending>>,
}

impl Contexts {
    fn new() -> Self {
        Self {
            contexts: Mutex::new(Some(HashMap::new())),
        }
    }
    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner())
    }
    fn add(&self, id: u32, notif: oneshot::Sender<Message>) -> Result<()> {
        match self.lock().as_mut() {
            Some(pending) => {
                pending.insert(id, notif);
                Ok(())
            }
            None => Err(Error::ConnectionClosed),
        }
    }
    fn remove(&self, id: u32) -> Option<oneshot::Sender<Message>> {
        self.lock().as_mut().and_then(|pending| pending.remove(&id))
    }
    fn close(&self) {
        self.lock().take();
    }
}

pub struct ClientConnection {
    req_writer: mpsc::Sender<Vec<u8>>,
    contexts: Arc<Contexts>,
    last_id: AtomicU32,
    request_timeout: Duration,
}

impl ClientConnection {
    /// Runs the connection over an already established transport.
    pub fn from_io<R, W>(mut reader: R, mut writer: W, config: &ClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        // a zero capacity would make mpsc::channel panic
        let capacity = config.channel_capacity.max(1);
        let (transmit_tx, mut transmit_rx) = mpsc::channel::<Vec<u8>>(capacity);
        tokio::spawn(async move {
            while let Some(d) = transmit_rx.recv().await {
                if let Err(e) = writer.write_all(&d).await {
                    debug!(error = %e, "writer stopped");
                    break;
                }
            }
        });

        let contexts = Arc::new(Contexts::new());
        let contexts_clone = contexts.clone();
        let max_frame_size = config.max_frame_size;
        tokio::spawn(async move {
            let mut decode_context = tokiou::DecodeContext::new(max_frame_size);
            loop {
                let msg = match decode_context.get_message(&mut reader).await {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(error = %e, "reader stopped");
                        break;
                    }
                };
                trace!(id = msg.id, "response received");
                match contexts_clone.remove(msg.id) {
                    Some(notif) => {
                        // the requester may already have timed out
                        let _ = notif.send(msg);
                    }
                    None => warn!(id = msg.id, "response for unknown message id"),
                }
            }
            // dropping the senders fails every pending request
            contexts_clone.close();
        });

        Self {
            req_writer: transmit_tx,
            contexts,
            last_id: AtomicU32::new(1),
            request_timeout: config.request_timeout,
        }
    }

    // 0 is reserved for unsolicited notifications
    fn next_id(&self) -> u32 {
        loop {
            let id = self.last_id.fetch_add(1, Ordering::Relaxed) & MAX_MESSAGE_ID;
            if id != 0 {
                return id;
            }
        }
    }

    async fn send_request(&self, mut msg: Message) -> Result<()> {
        let tosend = codec::encode_message(&mut msg)?;
        trace!(id = msg.id, bytes = tosend.len(), "sending request");
        self.req_writer
            .send(tosend)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Sends `msg` and waits for the response carrying the same message id.
    pub async fn send_request_w(&self, msg: Message) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        let id = msg.id;
        self.contexts.add(id, tx)?;
        if let Err(e) = self.send_request(msg).await {
            self.contexts.remove(id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(m)) => Ok(m),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.contexts.remove(id);
                debug!(id, timeout = ?self.request_timeout, "request timed out");
                Err(Error::Timeout)
            }
        }
    }

    pub async fn bind(&self, req: BindRequest) -> Result<MsgBindResponse> {
        let msg = Message {
            id: self.next_id(),
            params: MessageParams::Bind(req),
        };
        let res = self.send_request_w(msg).await?;
        match res.params {
            MessageParams::BindResponse(r) => {
                debug!(id = res.id, result = ?r.result, "bind completed");
                Ok(r)
            }
            other => Err(Error::malformed(format!(
                "expected bind response, got {:?}",
                other
            ))),
        }
    }

    pub async fn bind_simple(&self, name: &str, password: &str) -> Result<MsgBindResponse> {
        self.bind(BindRequest::simple(name, password)).await
    }

    pub async fn bind_sasl(
        &self,
        name: &str,
        mechanism: &str,
        credentials: Option<Vec<u8>>,
    ) -> Result<MsgBindResponse> {
        self.bind(BindRequest::sasl(name, mechanism, credentials)).await
    }

    /// Sends an UnbindRequest. No response is expected.
    pub async fn unbind(&self) -> Result<()> {
        let msg = Message {
            id: self.next_id(),
            params: MessageParams::Unbind,
        };
        self.send_request(msg).await
    }
}

pub async fn connect(config: ClientConfig) -> Result<ClientConnection> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.address))
        .await
        .map_err(|_| Error::Timeout)??;
    debug!(address = %config.address, "connected");
    let (reader, writer) = stream.into_split();
    Ok(ClientConnection::from_io(reader, writer, &config))
}
