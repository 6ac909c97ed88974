use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::ldap::{Message, MessageParams, MsgBindResponse, ResultCode};
use crate::tokiou;

/// Handles one decoded request. `Ok(None)` sends nothing back.
pub trait Service: Send + Sync + 'static {
    fn call(&self, req: Message) -> BoxFuture<'static, Result<Option<Message>>>;
}

fn failed_bind(id: u32, e: &Error) -> Message {
    Message {
        id,
        params: MessageParams::BindResponse(
            MsgBindResponse::new(ResultCode::Other).with_diagnostic(e.to_string()),
        ),
    }
}

pub struct LdapServer {
    config: ServerConfig,
}

impl LdapServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Serves a single connection until Unbind, EOF or a protocol error.
    pub async fn serve_connection<R, W, S>(
        &self,
        mut socket: R,
        mut writer: W,
        svc: Arc<S>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Service,
    {
        let mut dec = tokiou::DecodeContext::new(self.config.max_frame_size);

        let capacity = self.config.channel_capacity.max(1);
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(capacity);
        let writer_task = tokio::spawn(async move {
            while let Some(i) = writer_rx.recv().await {
                writer.write_all(&i).await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let res = loop {
            let parsed = match dec.get_message(&mut socket).await {
                Ok(m) => m,
                Err(Error::ConnectionClosed) => break Ok(()),
                Err(e) => break Err(e),
            };
            if parsed.params == MessageParams::Unbind {
                debug!(id = parsed.id, "unbind received");
                break Ok(());
            }
            let id = parsed.id;
            let is_bind = matches!(parsed.params, MessageParams::Bind(_));
            let f = svc.call(parsed);
            let wtx = writer_tx.clone();
            tokio::spawn(async move {
                let mut resp = match f.await {
                    Ok(Some(resp)) => resp,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(id, error = %e, "service failed");
                        if !is_bind {
                            return;
                        }
                        // the client is still waiting on this id
                        failed_bind(id, &e)
                    }
                };
                match codec::encode_message(&mut resp) {
                    Ok(bytes) => {
                        let _ = wtx.send(bytes).await;
                    }
                    Err(e) => warn!(id, error = %e, "cannot encode response"),
                }
            });
        };

        // pending responses still hold senders and get flushed first
        drop(writer_tx);
        writer_task
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        res
    }

    pub async fn start_server<S: Service>(self: &Arc<Self>, svc: Arc<S>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_address).await?;
        info!(address = %self.config.listen_address, "ldap listening");
        self.run(listener, svc).await
    }

    /// Accept loop over an already bound listener.
    pub async fn run<S: Service>(
        self: &Arc<Self>,
        listener: TcpListener,
        svc: Arc<S>,
    ) -> Result<()> {
        loop {
            let (socket, remote_addr) = listener.accept().await?;
            let s = self.clone();
            let svc1 = svc.clone();
            tokio::spawn(async move {
                debug!(%remote_addr, "incoming connection");
                let (r, w) = socket.into_split();
                let res = s.serve_connection(r, w, svc1).await;
                debug!(%remote_addr, ?res, "connection done");
            });
        }
    }
}
