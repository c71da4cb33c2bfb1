//! Command Module
//!
//! The commands the façade understands:
//!
//! - `PING [message]`
//! - `GET key`
//! - `SET key value EX seconds` / `SET key value EXAT unix-seconds`
//! - `DEL key [key ...]`
//! - `TTL key`
//! - `DBSIZE`
//! - `QUIT`

pub mod handler;

pub use handler::{error_reply, CommandHandler};
