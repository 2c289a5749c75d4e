//! # cosim-protocol
//!
//! Typed request/reply protocol between a test harness and a firmware
//! running in a sandbox.
//!
//! One firmware process serves one mission: the harness connects, sends a
//! single typed message, and receives a single [`Envelope`] holding either
//! the typed result or the reason the firmware handler failed.
//!
//! ```no_run
//! use cosim_protocol::{AlwaysAlive, FirmwareClient, FirmwareServer, Message};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping(u32);
//! impl Message for Ping {
//!     const TYPE: &'static str = "example.Ping";
//! }
//!
//! # async fn example() -> cosim_protocol::Result<()> {
//! let server = FirmwareServer::<Ping, Ping>::bind("127.0.0.1:0").await?;
//! let addr = server.local_addr()?;
//! tokio::spawn(server.serve_once(|Ping(n)| async move { Ok::<_, String>(Ping(n + 1)) }));
//!
//! let client = FirmwareClient::<Ping, Ping>::with_addr(addr);
//! let Ping(reply) = client.send(&Ping(41), &AlwaysAlive).await?;
//! assert_eq!(reply, 42);
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod protocol;
mod server;

pub use client::{AlwaysAlive, ClientConfig, FirmwareClient, Liveness};
pub use error::{ProtocolError, Result};
pub use protocol::{Envelope, Message};
pub use server::{FirmwareServer, DEFAULT_PORT};
