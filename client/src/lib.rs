//! # Bridge Client
//!
//! Client side of the bridge gateway: a [`Supervisor`] that keeps one logical
//! WebSocket connection to the gateway, and an optional [`Reconnector`] that
//! retries on a fixed schedule when that connection drops.
//!
//! ```no_run
//! use bridge_client::{EventKind, Supervisor};
//!
//! # async fn demo() {
//! let supervisor = Supervisor::new("ws://localhost:4000");
//! supervisor.on(EventKind::Server, |envelope| println!("{envelope:?}"));
//! supervisor.send_command("AUCTIONS_LIST").await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod reconnect;
pub mod state;
pub mod supervisor;

pub use config::ClientConfig;
pub use error::ClientError;
pub use reconnect::{LinkHealth, ReconnectPolicy, Reconnector};
pub use state::{Callback, EventKind};
pub use supervisor::Supervisor;
