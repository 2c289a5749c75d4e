//! Firmware side of the protocol.
//!
//! A firmware process serves exactly one mission: it waits for a single
//! request, runs its handler, replies and is done.

use crate::error::{ProtocolError, Result};
use crate::protocol::{write_frame, Envelope, Message, ReplyFrame, RequestFrame};
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

/// Well-known port firmware servers listen on.
pub const DEFAULT_PORT: u16 = 5556;

/// Accepts one `M` request and answers it with an `R`.
pub struct FirmwareServer<M, R> {
    listener: TcpListener,
    _marker: PhantomData<fn(M) -> R>,
}

impl<M: Message, R: Message> FirmwareServer<M, R> {
    /// Bind the listening socket.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, message = M::TYPE, "Firmware server listening");
        Ok(Self {
            listener,
            _marker: PhantomData,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Bind on `addr` and serve a single request.
    pub async fn listen<F, Fut, E>(addr: impl ToSocketAddrs, handler: F) -> Result<()>
    where
        F: FnOnce(M) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Display,
    {
        Self::bind(addr).await?.serve_once(handler).await
    }

    /// Serve a single request.
    ///
    /// Connections that close without sending a frame (port scans, proxies
    /// checking the backend) are skipped. The first frame received is
    /// answered and ends the server:
    ///
    /// - a frame of another type gets a `Rejected` reply and this returns
    ///   [`ProtocolError::MessageTypeMismatch`]; the handler is not called
    /// - a frame that cannot be decoded gets a `Failure` reply
    /// - otherwise the handler result is sent back as `Success` or, if it
    ///   failed, as `Failure` carrying the error's display text
    pub async fn serve_once<F, Fut, E>(self, handler: F) -> Result<()>
    where
        F: FnOnce(M) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Display,
    {
        let (stream, peer, line) = self.next_request().await?;
        let (_, mut writer) = stream.into_split();
        tracing::debug!(peer = %peer, "Received request");

        let decoded = serde_json::from_str::<RequestFrame>(line.trim())
            .map_err(ProtocolError::from)
            .and_then(RequestFrame::into_message::<M>);

        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Rejecting request");
                let reply = match &e {
                    ProtocolError::MessageTypeMismatch { expected, actual } => {
                        ReplyFrame::rejected(expected.as_str(), actual.as_str())
                    }
                    _ => Envelope::<R>::Failure(e.to_string()).to_frame()?,
                };
                write_frame(&mut writer, &reply).await?;
                return Err(e);
            }
        };

        let start = Instant::now();
        let envelope: Envelope<R> = handler(message).await.into();
        match &envelope {
            Envelope::Success(_) => tracing::info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Handler completed"
            ),
            Envelope::Failure(reason) => tracing::warn!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                reason = %reason,
                "Handler failed"
            ),
        }

        write_frame(&mut writer, &envelope.to_frame()?).await?;
        tracing::debug!(peer = %peer, "Reply sent");
        Ok(())
    }

    async fn next_request(&self) -> Result<(TcpStream, SocketAddr, String)> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::trace!(peer = %peer, "Accepted connection");

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) if line.trim().is_empty() => continue,
                    Ok(_) => return Ok((reader.into_inner(), peer, line)),
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "Connection dropped before a request");
                        break;
                    }
                }
            }
            tracing::trace!(peer = %peer, "Connection closed without a request");
        }
    }
}
