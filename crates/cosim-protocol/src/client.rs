//! Harness side of the protocol.
//!
//! The client sends one request to a firmware unit and waits for the reply
//! while repeatedly asking the unit's [`Liveness`] whether it is still
//! running, so a crashed firmware surfaces as [`ProtocolError::UnitExited`]
//! instead of a hang.

use crate::error::{ProtocolError, Result};
use crate::protocol::{Envelope, Message, RequestFrame};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;

/// Interval between connection attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between liveness checks while waiting for a reply.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(50);

/// Total time allowed for connecting, sending and receiving the reply.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(900);

/// Whether the remote end of an exchange is still running.
#[async_trait]
pub trait Liveness: Send + Sync {
    /// `true` once the remote has reached a terminal state.
    async fn has_exited(&self) -> Result<bool>;
}

/// Liveness for peers that are not supervised, such as a local server.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAlive;

#[async_trait]
impl Liveness for AlwaysAlive {
    async fn has_exited(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Timing knobs for [`FirmwareClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub retry_interval: Duration,
    pub liveness_interval: Duration,
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_interval: RETRY_INTERVAL,
            liveness_interval: LIVENESS_INTERVAL,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }
}

/// Sends `M` requests and expects `R` replies.
pub struct FirmwareClient<M, R> {
    addr: SocketAddr,
    config: ClientConfig,
    _marker: PhantomData<fn(M) -> R>,
}

impl<M, R> std::fmt::Debug for FirmwareClient<M, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareClient")
            .field("addr", &self.addr)
            .field("config", &self.config)
            .finish()
    }
}

enum Exchange {
    Reply(String),
    /// The connection closed before a reply; the request may be retried.
    Dropped,
}

impl<M: Message, R: Message> FirmwareClient<M, R> {
    /// Client for a firmware published on `localhost:<host_port>`.
    pub fn new(host_port: u16) -> Self {
        Self::with_addr(SocketAddr::from((Ipv4Addr::LOCALHOST, host_port)))
    }

    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            addr,
            config: ClientConfig::default(),
            _marker: PhantomData,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send `message` and wait for the reply.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnitExited`] if `liveness` reports an exit before a reply arrived
    /// - [`ProtocolError::Timeout`] if no reply arrived within the response timeout
    /// - [`ProtocolError::Firmware`] if the remote handler failed
    /// - [`ProtocolError::MessageTypeMismatch`] if the server does not serve `M`
    /// - [`ProtocolError::ResponseTypeMismatch`] / [`ProtocolError::ResponseShape`] for bad replies
    pub async fn send<L>(&self, message: &M, liveness: &L) -> Result<R>
    where
        L: Liveness + ?Sized,
    {
        let mut line = serde_json::to_string(&RequestFrame::new(message)?)?;
        line.push('\n');

        let start = Instant::now();
        tracing::debug!(addr = %self.addr, message = M::TYPE, "Sending request");

        let mut attempts = 0u32;
        let reply = loop {
            attempts += 1;
            let stream = self.connect(liveness, start).await?;
            match self.exchange(stream, &line, liveness, start).await? {
                Exchange::Reply(reply) => break reply,
                Exchange::Dropped => {
                    self.check_deadline(start)?;
                    tracing::debug!(addr = %self.addr, attempts, "Connection closed before reply, retrying");
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        };

        tracing::debug!(
            addr = %self.addr,
            attempts,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Reply received"
        );
        tracing::trace!(reply = %reply.trim(), "Reply frame");

        Envelope::<R>::decode(&reply)?.into_result()
    }

    /// Connect, retrying while the unit is alive.
    ///
    /// A published port may accept connections before the unit listens on it.
    async fn connect<L: Liveness + ?Sized>(&self, liveness: &L, start: Instant) -> Result<TcpStream> {
        loop {
            if liveness.has_exited().await? {
                tracing::warn!(addr = %self.addr, "Unit exited before accepting a connection");
                return Err(ProtocolError::UnitExited);
            }
            match TcpStream::connect(self.addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    self.check_deadline(start)?;
                    tracing::trace!(addr = %self.addr, error = %e, "Connection attempt failed, retrying...");
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }

    async fn exchange<L: Liveness + ?Sized>(
        &self,
        stream: TcpStream,
        request: &str,
        liveness: &L,
        start: Instant,
    ) -> Result<Exchange> {
        let (read_half, mut write_half) = stream.into_split();

        let written = async {
            write_half.write_all(request.as_bytes()).await?;
            write_half.flush().await
        }
        .await;
        match written {
            Ok(()) => {}
            Err(e) if is_disconnect(&e) => return Ok(Exchange::Dropped),
            Err(e) => return Err(e.into()),
        }

        let mut reader = BufReader::new(read_half);
        let read = async move {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            Ok::<_, std::io::Error>((n, line))
        };
        tokio::pin!(read);

        let mut ticker = tokio::time::interval(self.config.liveness_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                result = &mut read => {
                    return match result {
                        Ok((0, _)) => Ok(Exchange::Dropped),
                        Ok((_, line)) => Ok(Exchange::Reply(line)),
                        Err(e) if is_disconnect(&e) => Ok(Exchange::Dropped),
                        Err(e) => Err(e.into()),
                    };
                }
                _ = ticker.tick() => {
                    if liveness.has_exited().await? {
                        tracing::warn!(addr = %self.addr, "Unit exited before replying");
                        return Err(ProtocolError::UnitExited);
                    }
                    self.check_deadline(start)?;
                }
            }
        }
    }

    fn check_deadline(&self, start: Instant) -> Result<()> {
        if start.elapsed() >= self.config.response_timeout {
            tracing::warn!(
                addr = %self.addr,
                timeout_secs = self.config.response_timeout.as_secs(),
                "Firmware response timeout"
            );
            return Err(ProtocolError::Timeout(self.config.response_timeout));
        }
        Ok(())
    }
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
