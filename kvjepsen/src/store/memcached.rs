//! Memcached text-protocol backend.
//!
//! Couchbase and plain memcached both speak this protocol. Each pool slot
//! owns one buffered TCP connection; slots are handed out round-robin and a
//! connection that hit an I/O error is dropped and reopened on next use.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::store::{CasOutcome, CasToken, Durability, KvStore};

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;

/// One open connection.
#[derive(Debug)]
struct Connection {
    stream: BufStream<TcpStream>,
}

impl Connection {
    async fn open(address: &str) -> StoreResult<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: BufStream::new(stream),
        })
    }

    async fn send(&mut self, command: &str, payload: Option<&[u8]>) -> StoreResult<()> {
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        if let Some(payload) = payload {
            self.stream.write_all(payload).await?;
            self.stream.write_all(b"\r\n").await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> StoreResult<String> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await?;
        if read == 0 {
            return Err(StoreError::Io("connection closed by server".to_string()));
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        check_error(&line)?;
        Ok(line)
    }

    /// Read a `get`/`gets` response holding at most one value.
    async fn read_value(&mut self) -> StoreResult<Option<(Vec<u8>, Option<u64>)>> {
        let line = self.read_line().await?;
        let Some(header) = parse_value_header(&line)? else {
            return Ok(None);
        };

        let mut data = vec![0u8; header.len + 2];
        self.stream.read_exact(&mut data).await?;
        if !data.ends_with(b"\r\n") {
            return Err(StoreError::Protocol("value not terminated by CRLF".to_string()));
        }
        data.truncate(header.len);

        let end = self.read_line().await?;
        if end != "END" {
            return Err(StoreError::Protocol(format!("expected END, got '{end}'")));
        }
        Ok(Some((data, header.cas)))
    }
}

/// Header line of a `VALUE` response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ValueHeader {
    len: usize,
    cas: Option<u64>,
}

/// Parse `VALUE <key> <flags> <bytes> [<cas>]`, or `END` for a miss.
fn parse_value_header(line: &str) -> StoreResult<Option<ValueHeader>> {
    if line == "END" {
        return Ok(None);
    }
    let malformed = || StoreError::Protocol(format!("malformed value header '{line}'"));
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();
    if fields.first() != Some(&"VALUE") || !(4..=5).contains(&fields.len()) {
        return Err(malformed());
    }
    let len = fields[3].parse::<usize>().map_err(|_| malformed())?;
    let cas = match fields.get(4) {
        Some(cas) => Some(cas.parse::<u64>().map_err(|_| malformed())?),
        None => None,
    };
    Ok(Some(ValueHeader { len, cas }))
}

/// Map protocol error lines to [`StoreError`].
fn check_error(line: &str) -> StoreResult<()> {
    if line == "ERROR" {
        return Err(StoreError::Server("unknown command".to_string()));
    }
    if let Some(message) = line.strip_prefix("CLIENT_ERROR") {
        return Err(StoreError::Protocol(message.trim().to_string()));
    }
    if let Some(message) = line.strip_prefix("SERVER_ERROR") {
        return Err(StoreError::Server(message.trim().to_string()));
    }
    Ok(())
}

fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StoreError::Protocol(format!(
            "key length must be 1..={MAX_KEY_LEN}"
        )));
    }
    if key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(StoreError::Protocol(format!(
            "key '{key}' contains whitespace or control characters"
        )));
    }
    Ok(())
}

/// Pooled memcached client bound to one bucket (key prefix).
#[derive(Debug)]
pub struct MemcachedStore {
    address: String,
    prefix: String,
    slots: Vec<Mutex<Option<Connection>>>,
    next_slot: AtomicUsize,
}

impl MemcachedStore {
    /// Open `pool_size` connections to `address`.
    ///
    /// Fails if the first connection cannot be established.
    pub async fn connect(address: &str, bucket: &str, pool_size: usize) -> StoreResult<Self> {
        let pool_size = pool_size.max(1);
        let mut slots = Vec::with_capacity(pool_size);
        slots.push(Mutex::new(Some(Connection::open(address).await?)));
        for _ in 1..pool_size {
            let connection = match Connection::open(address).await {
                Ok(connection) => Some(connection),
                Err(error) => {
                    tracing::warn!(address, %error, "pool connection failed, will retry lazily");
                    None
                }
            };
            slots.push(Mutex::new(connection));
        }
        tracing::debug!(address, bucket, pool_size, "memcached pool open");

        Ok(Self {
            address: address.to_string(),
            prefix: if bucket.is_empty() {
                String::new()
            } else {
                format!("{bucket}:")
            },
            slots,
            next_slot: AtomicUsize::new(0),
        })
    }

    /// Server address.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn qualify(&self, key: &str) -> StoreResult<String> {
        let full = format!("{}{}", self.prefix, key);
        validate_key(&full)?;
        Ok(full)
    }

    /// Run `op` on the next pooled connection, reconnecting if needed.
    async fn with_connection<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(
                &'c mut Connection,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = StoreResult<T>> + Send + 'c>,
            > + Send,
    {
        let index = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[index].lock().await;
        if slot.is_none() {
            *slot = Some(Connection::open(&self.address).await?);
        }
        let Some(connection) = slot.as_mut() else {
            return Err(StoreError::Unavailable);
        };

        let result = op(connection).await;
        if matches!(result, Err(StoreError::Io(_)) | Err(StoreError::Protocol(_))) {
            // The stream may be mid-response; never reuse it.
            *slot = None;
        }
        result
    }

    async fn store_command(
        &self,
        verb: &'static str,
        key: &str,
        value: Vec<u8>,
        cas: Option<u64>,
    ) -> StoreResult<String> {
        let key = self.qualify(key)?;
        self.with_connection(move |connection| {
            Box::pin(async move {
                let command = match cas {
                    Some(cas) => format!("{verb} {key} 0 0 {} {cas}", value.len()),
                    None => format!("{verb} {key} 0 0 {}", value.len()),
                };
                connection.send(&command, Some(&value)).await?;
                connection.read_line().await
            })
        })
        .await
    }
}

#[async_trait]
impl KvStore for MemcachedStore {
    fn name(&self) -> &'static str {
        "memcached"
    }

    fn supports_durability(&self) -> bool {
        false
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = self.qualify(key)?;
        let value = self
            .with_connection(move |connection| {
                Box::pin(async move {
                    connection.send(&format!("get {key}"), None).await?;
                    connection.read_value().await
                })
            })
            .await?;
        Ok(value.map(|(data, _)| data))
    }

    async fn gets(&self, key: &str) -> StoreResult<Option<(Vec<u8>, CasToken)>> {
        let key = self.qualify(key)?;
        let value = self
            .with_connection(move |connection| {
                Box::pin(async move {
                    connection.send(&format!("gets {key}"), None).await?;
                    connection.read_value().await
                })
            })
            .await?;
        match value {
            Some((data, Some(cas))) => Ok(Some((data, CasToken(cas)))),
            Some((_, None)) => Err(StoreError::Protocol("gets reply without CAS".to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, _durability: Durability) -> StoreResult<()> {
        match self.store_command("set", key, value, None).await?.as_str() {
            "STORED" => Ok(()),
            other => Err(StoreError::Server(other.to_string())),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<CasToken>,
        _durability: Durability,
    ) -> StoreResult<CasOutcome> {
        let reply = match expected {
            Some(CasToken(cas)) => self.store_command("cas", key, value, Some(cas)).await?,
            None => self.store_command("add", key, value, None).await?,
        };
        match reply.as_str() {
            "STORED" => Ok(CasOutcome::Swapped),
            "EXISTS" | "NOT_FOUND" | "NOT_STORED" => Ok(CasOutcome::Conflict),
            other => Err(StoreError::Server(other.to_string())),
        }
    }

    async fn increment(&self, key: &str, delta: u64, _durability: Durability) -> StoreResult<u64> {
        let key = self.qualify(key)?;
        let missing = key.clone();
        let reply = self
            .with_connection(move |connection| {
                Box::pin(async move {
                    connection.send(&format!("incr {key} {delta}"), None).await?;
                    connection.read_line().await
                })
            })
            .await?;
        if reply == "NOT_FOUND" {
            return Err(StoreError::NotFound(missing));
        }
        reply
            .trim()
            .parse::<u64>()
            .map_err(|_| StoreError::Protocol(format!("bad incr reply '{reply}'")))
    }
}
