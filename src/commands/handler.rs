//! Command Handler
//!
//! Maps parsed [`Request`]s onto [`KvService`] calls and store results onto
//! [`Reply`]s.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  execute()  │───>│  dispatch() │───>│   cmd_*()   │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                          KvService          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Store errors become `-ERR` when retrying cannot help and `-TRYAGAIN`
//! when it can.

use crate::error::{ErrorKind, StoreError};
use crate::protocol::{Reply, Request};
use crate::service::KvService;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Executes client commands against a shared store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Arc<KvService>,
}

impl CommandHandler {
    pub fn new(store: Arc<KvService>) -> Self {
        Self { store }
    }

    /// Executes one request and returns the reply to send.
    pub async fn execute(&self, request: &Request) -> Reply {
        if request.is_empty() {
            return Reply::error("ERR empty command");
        }

        let cmd = request.command();
        let reply = self.dispatch(&cmd, request.args()).await;
        if let Reply::Error(msg) = &reply {
            debug!(command = %cmd, error = %msg, "Command failed");
        }
        reply
    }

    async fn dispatch(&self, cmd: &str, args: &[Bytes]) -> Reply {
        match cmd {
            "PING" => self.cmd_ping(args),
            "GET" => self.cmd_get(args).await,
            "SET" => self.cmd_set(args).await,
            "DEL" => self.cmd_del(args).await,
            "TTL" => self.cmd_ttl(args).await,
            "DBSIZE" => self.cmd_dbsize(args),
            "QUIT" => Reply::ok(),
            _ => Reply::error(format!("ERR unknown command '{}'", cmd)),
        }
    }

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> Reply {
        match args {
            [] => Reply::pong(),
            [msg] => Reply::Bulk(msg.clone()),
            _ => wrong_arity("PING"),
        }
    }

    /// GET key
    async fn cmd_get(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("GET");
        };
        let key = match key_arg(key) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        match self.store.read(key).await {
            Ok(Some(record)) => Reply::Bulk(record.value),
            Ok(None) => Reply::Nil,
            Err(e) => error_reply(&e),
        }
    }

    /// SET key value EX seconds | SET key value EXAT unix-seconds
    async fn cmd_set(&self, args: &[Bytes]) -> Reply {
        let [key, value, rest @ ..] = args else {
            return wrong_arity("SET");
        };
        let key = match key_arg(key) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        let [option, amount] = rest else {
            return Reply::error("ERR syntax error: SET requires EX seconds or EXAT unix-seconds");
        };
        let amount = match int_arg(amount) {
            Some(n) if n > 0 => n,
            _ => return Reply::error("ERR invalid expire time in 'SET' command"),
        };
        let expires_at = match String::from_utf8_lossy(option).to_ascii_uppercase().as_str() {
            "EX" => match self.store.now().checked_add(amount) {
                Some(at) => at,
                None => return Reply::error("ERR invalid expire time in 'SET' command"),
            },
            "EXAT" => amount,
            _ => return Reply::error("ERR syntax error"),
        };

        match self.store.write(key, value.clone(), expires_at).await {
            Ok(()) => Reply::ok(),
            Err(e) => error_reply(&e),
        }
    }

    /// DEL key [key ...]
    async fn cmd_del(&self, args: &[Bytes]) -> Reply {
        if args.is_empty() {
            return wrong_arity("DEL");
        }

        // a key that is not UTF-8 can never have been stored
        for key in args.iter().filter_map(|raw| key_arg(raw).ok()) {
            if let Err(e) = self.store.remove(key).await {
                return error_reply(&e);
            }
        }
        Reply::ok()
    }

    /// TTL key
    async fn cmd_ttl(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("TTL");
        };
        let key = match key_arg(key) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        match self.store.read(key).await {
            Ok(Some(record)) => Reply::Integer((record.expires_at - self.store.now()).max(0)),
            Ok(None) => Reply::Integer(-2),
            Err(e) => error_reply(&e),
        }
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[Bytes]) -> Reply {
        if !args.is_empty() {
            return wrong_arity("DBSIZE");
        }
        Reply::Integer(self.store.stats().rows as i64)
    }
}

/// Maps a store error onto the reply a client sees.
pub fn error_reply(err: &StoreError) -> Reply {
    match err.kind() {
        ErrorKind::Constraint => Reply::error(format!("ERR {}", err)),
        ErrorKind::Transient => Reply::error(format!("TRYAGAIN {}", err)),
    }
}

fn wrong_arity(cmd: &str) -> Reply {
    Reply::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd
    ))
}

fn key_arg(raw: &Bytes) -> std::result::Result<String, Reply> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| error_reply(&StoreError::InvalidKey("key is not valid UTF-8".into())))
}

fn int_arg(raw: &Bytes) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{PoolWait, StoreConfig};
    use crate::storage::MemoryBackend;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn create_handler() -> (CommandHandler, ManualClock, Arc<KvService>) {
        let clock = ManualClock::new(T0);
        let store = Arc::new(KvService::with_parts(
            StoreConfig::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(clock.clone()),
        ));
        (CommandHandler::new(Arc::clone(&store)), clock, store)
    }

    fn cmd(args: &[&str]) -> Request {
        Request::new(args.iter().map(|s| Bytes::from(s.to_string())).collect())
    }

    #[tokio::test]
    async fn test_ping() {
        let (handler, _, _) = create_handler();

        assert_eq!(handler.execute(&cmd(&["PING"])).await, Reply::pong());
        assert_eq!(
            handler.execute(&cmd(&["ping", "hello"])).await,
            Reply::Bulk(Bytes::from("hello"))
        );
    }

    #[tokio::test]
    async fn test_set_get_ttl() {
        let (handler, clock, _) = create_handler();

        let reply = handler.execute(&cmd(&["SET", "name", "Ariz", "EX", "60"])).await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(
            handler.execute(&cmd(&["GET", "name"])).await,
            Reply::Bulk(Bytes::from("Ariz"))
        );
        assert_eq!(handler.execute(&cmd(&["TTL", "name"])).await, Reply::Integer(60));

        clock.advance(60);
        assert_eq!(handler.execute(&cmd(&["GET", "name"])).await, Reply::Nil);
        assert_eq!(handler.execute(&cmd(&["TTL", "name"])).await, Reply::Integer(-2));
    }

    #[tokio::test]
    async fn test_set_exat() {
        let (handler, _, store) = create_handler();

        let at = (T0 + 500).to_string();
        let reply = handler.execute(&cmd(&["set", "k", "v", "exat", &at])).await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(store.read("k").await.unwrap().unwrap().expires_at, T0 + 500);
    }

    #[tokio::test]
    async fn test_set_requires_expiry() {
        let (handler, _, store) = create_handler();

        assert!(handler.execute(&cmd(&["SET", "k", "v"])).await.is_error());
        assert!(handler.execute(&cmd(&["SET", "k", "v", "EX"])).await.is_error());
        assert!(handler.execute(&cmd(&["SET", "k", "v", "EX", "0"])).await.is_error());
        assert!(handler.execute(&cmd(&["SET", "k", "v", "EX", "ten"])).await.is_error());
        assert!(handler.execute(&cmd(&["SET", "k", "v", "PX", "10"])).await.is_error());
        assert!(handler.execute(&cmd(&["SET", "k"])).await.is_error());
        assert_eq!(store.read("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_del() {
        let (handler, _, _) = create_handler();

        handler.execute(&cmd(&["SET", "a", "1", "EX", "60"])).await;
        handler.execute(&cmd(&["SET", "b", "2", "EX", "60"])).await;

        assert_eq!(handler.execute(&cmd(&["DEL", "a", "b", "c"])).await, Reply::ok());
        assert_eq!(handler.execute(&cmd(&["GET", "a"])).await, Reply::Nil);
        assert_eq!(handler.execute(&cmd(&["GET", "b"])).await, Reply::Nil);
        assert!(handler.execute(&cmd(&["DEL"])).await.is_error());
    }

    #[tokio::test]
    async fn test_del_skips_non_utf8_keys() {
        let (handler, _, store) = create_handler();

        handler.execute(&cmd(&["SET", "a", "1", "EX", "60"])).await;
        handler.execute(&cmd(&["SET", "b", "2", "EX", "60"])).await;

        let del = Request::new(vec![
            Bytes::from("DEL"),
            Bytes::from("a"),
            Bytes::from_static(&[0xff]),
            Bytes::from("b"),
        ]);
        assert_eq!(handler.execute(&del).await, Reply::ok());
        assert_eq!(store.read("a").await.unwrap(), None);
        assert_eq!(store.read("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dbsize_counts_tombstones() {
        let (handler, _, _) = create_handler();

        handler.execute(&cmd(&["SET", "a", "1", "EX", "60"])).await;
        handler.execute(&cmd(&["SET", "b", "2", "EX", "60"])).await;
        handler.execute(&cmd(&["DEL", "a"])).await;

        assert_eq!(handler.execute(&cmd(&["DBSIZE"])).await, Reply::Integer(2));
    }

    #[tokio::test]
    async fn test_invalid_key_is_err() {
        let (handler, _, _) = create_handler();
        let long = "k".repeat(300);

        match handler.execute(&cmd(&["GET", &long])).await {
            Reply::Error(msg) => assert!(msg.starts_with("ERR "), "{}", msg),
            other => panic!("expected error, got {:?}", other),
        }

        let binary = Request::new(vec![Bytes::from("GET"), Bytes::from_static(&[0xff, 0xfe])]);
        match handler.execute(&binary).await {
            Reply::Error(msg) => assert!(msg.starts_with("ERR "), "{}", msg),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_error_is_tryagain() {
        let store = Arc::new(KvService::with_parts(
            StoreConfig::default().with_pool_wait(PoolWait::Bounded(Duration::from_millis(10))),
            Arc::new(MemoryBackend::new()),
            Arc::new(ManualClock::new(T0)),
        ));
        let handler = CommandHandler::new(Arc::clone(&store));
        store.shutdown().await;

        match handler.execute(&cmd(&["GET", "k"])).await {
            Reply::Error(msg) => assert!(msg.starts_with("TRYAGAIN "), "{}", msg),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_and_empty() {
        let (handler, _, _) = create_handler();

        assert!(handler.execute(&cmd(&["FLUSHALL"])).await.is_error());
        assert!(handler.execute(&Request::new(Vec::new())).await.is_error());
        assert_eq!(handler.execute(&cmd(&["QUIT"])).await, Reply::ok());
    }

    #[test]
    fn test_error_reply_mapping() {
        assert_eq!(
            error_reply(&StoreError::InvalidValue("too big".into())),
            Reply::error(format!("ERR {}", StoreError::InvalidValue("too big".into())))
        );
        assert_eq!(
            error_reply(&StoreError::PoolClosed),
            Reply::error(format!("TRYAGAIN {}", StoreError::PoolClosed))
        );
    }
}
