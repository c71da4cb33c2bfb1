//! Connection Module
//!
//! Client connections to the RESP façade. The listener in `main.rs` accepts
//! sockets and spawns one [`ConnectionHandler`] task per client; all of them
//! share one [`CommandHandler`](crate::commands::CommandHandler) store and one
//! [`ConnectionStats`].
//!
//! ```text
//! ┌──────────────┐  accept  ┌────────────────────┐  execute  ┌────────────┐
//! │ TcpListener  │─────────>│ ConnectionHandler  │──────────>│ KvService  │
//! │  (main.rs)   │  spawn   │  (task per client) │           │            │
//! └──────────────┘          └────────────────────┘           └────────────┘
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
