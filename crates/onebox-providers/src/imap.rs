//! IMAP mailbox client.
//!
//! A minimal async IMAP client (raw TCP or rustls TLS) speaking only the
//! commands the sync engine needs: LOGIN, SELECT, UID SEARCH, UID FETCH,
//! IDLE/DONE and LOGOUT.
//!
//! The watch is an `IDLE` command. While idling the server may only be sent
//! `DONE`, so every other command first ends the idle, and the next `watch()`
//! re-enters it. Untagged `EXISTS` lines seen outside the idle are remembered
//! and reported by the next `watch()` so no arrival is lost between commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use onebox_core::config::AccountConfig;
use onebox_core::error::TransportError;
use onebox_core::types::{MailboxInfo, MessageRef, RawMessage};
use onebox_sync::traits::{MailboxConnector, MailboxSession, WatchEvent};

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Upper bound on TCP connect + TLS handshake + LOGIN.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest literal accepted from the server. Anything bigger is a protocol error.
pub const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

// ─────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────

/// Opens authenticated IMAP sessions.
#[derive(Clone, Debug)]
pub struct ImapConnector {
    connect_timeout: Duration,
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ImapConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailboxSession>, TransportError> {
        let login = async {
            let mut session = ImapSession::connect(&account.host, account.port, account.use_tls).await?;
            session.login(&account.username, &account.password).await?;
            Ok::<_, TransportError>(session)
        };
        let session = tokio::time::timeout(self.connect_timeout, login)
            .await
            .map_err(|_| TransportError::Timeout)??;

        info!(account = %account.id(), host = %account.host, port = account.port, "IMAP login ok");
        Ok(Box::new(session))
    }
}

// ─────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────

/// Async read+write stream marker.
trait ImapStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> ImapStream for T {}

/// Where the connection is in the IDLE exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
enum IdleState {
    Off,
    /// `IDLE` sent, continuation not seen yet.
    Requested(String),
    Active(String),
}

/// Lines of one completed command.
struct Completion {
    untagged: Vec<String>,
    status: String,
    ok: bool,
}

/// One authenticated IMAP connection.
pub struct ImapSession {
    reader: BufReader<ReadHalf<Box<dyn ImapStream>>>,
    writer: WriteHalf<Box<dyn ImapStream>>,
    tag_counter: u32,
    /// Partial line kept across cancelled reads.
    line: Vec<u8>,
    idle: IdleState,
    /// An `EXISTS` arrived while no watch was running.
    pending_activity: bool,
}

impl ImapSession {
    /// Connect to an IMAP server (plain or IMAPS/TLS) and read the greeting.
    async fn connect(host: &str, port: u16, use_tls: bool) -> Result<Self, TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            host: host.to_string(),
            port,
            reason,
        };

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        let stream: Box<dyn ImapStream> = if use_tls {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                .map_err(|e| connect_error(format!("invalid server name: {}", e)))?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| connect_error(format!("TLS handshake failed: {}", e)))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        Self::handshake(stream).await
    }

    async fn handshake(stream: Box<dyn ImapStream>) -> Result<Self, TransportError> {
        let (read, write) = tokio::io::split(stream);
        let mut session = Self {
            reader: BufReader::new(read),
            writer: write,
            tag_counter: 0,
            line: Vec::new(),
            idle: IdleState::Off,
            pending_activity: false,
        };

        let greeting = session.read_line().await?;
        let upper = greeting.to_ascii_uppercase();
        if !upper.starts_with("* OK") && !upper.starts_with("* PREAUTH") {
            return Err(TransportError::Protocol(format!(
                "unexpected IMAP greeting: {}",
                greeting
            )));
        }
        debug!(greeting = %greeting, "IMAP connected");
        Ok(session)
    }

    // ── Wire ──

    /// Read a single CRLF-terminated line.
    ///
    /// Cancel-safe: bytes read before a cancellation stay in `self.line`.
    async fn read_line(&mut self) -> Result<String, TransportError> {
        let n = self.reader.read_until(b'\n', &mut self.line).await?;
        if n == 0 {
            self.line.clear();
            return Err(TransportError::Closed);
        }
        let raw = std::mem::take(&mut self.line);
        let text = String::from_utf8_lossy(&raw);
        Ok(text
            .trim_end_matches("\r\n")
            .trim_end_matches('\n')
            .to_string())
    }

    /// Read exactly `n` bytes (a literal), refusing sizes above `MAX_LITERAL_BYTES`.
    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        if n > MAX_LITERAL_BYTES {
            return Err(TransportError::Protocol(format!(
                "literal of {} bytes exceeds the {} byte limit",
                n, MAX_LITERAL_BYTES
            )));
        }
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a tagged command. Returns the tag.
    async fn send_command(&mut self, command: &str) -> Result<String, TransportError> {
        self.tag_counter += 1;
        let tag = format!("A{:04}", self.tag_counter);
        self.write_line(&format!("{} {}", tag, command)).await?;
        Ok(tag)
    }

    /// Send a command and read until its tagged status line.
    async fn execute(&mut self, command: &str) -> Result<Completion, TransportError> {
        let tag = self.send_command(command).await?;
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line().await?;
            if is_tagged(&line, &tag) {
                let ok = is_ok(&line, &tag);
                return Ok(Completion {
                    untagged,
                    status: line,
                    ok,
                });
            }
            if parse_exists(&line).is_some() {
                self.pending_activity = true;
            }
            untagged.push(line);
        }
    }

    // ── Commands ──

    async fn login(&mut self, user: &str, pass: &str) -> Result<(), TransportError> {
        let done = self
            .execute(&format!("LOGIN {} {}", quote(user), quote(pass)))
            .await?;
        if !done.ok {
            return Err(TransportError::Auth(done.status));
        }
        Ok(())
    }

    async fn uid_search(&mut self, criteria: &str) -> Result<Vec<MessageRef>, TransportError> {
        self.end_idle().await?;
        let done = self.execute(&format!("UID SEARCH {}", criteria)).await?;
        if !done.ok {
            return Err(TransportError::Protocol(format!("SEARCH failed: {}", done.status)));
        }
        let mut uids = parse_search(&done.untagged);
        uids.sort_unstable();
        uids.dedup();
        Ok(uids.into_iter().map(MessageRef).collect())
    }

    /// Enter IDLE, or finish entering it after a cancelled attempt.
    async fn ensure_idle(&mut self) -> Result<(), TransportError> {
        let tag = match &self.idle {
            IdleState::Active(_) => return Ok(()),
            IdleState::Requested(tag) => tag.clone(),
            IdleState::Off => {
                let tag = self.send_command("IDLE").await?;
                self.idle = IdleState::Requested(tag.clone());
                tag
            }
        };

        loop {
            let line = self.read_line().await?;
            if line.starts_with('+') {
                break;
            }
            if is_tagged(&line, &tag) {
                self.idle = IdleState::Off;
                return Err(TransportError::Protocol(format!("IDLE rejected: {}", line)));
            }
            if parse_exists(&line).is_some() {
                self.pending_activity = true;
            }
        }
        self.idle = IdleState::Active(tag);
        Ok(())
    }

    /// Leave IDLE if it is running. No-op otherwise.
    async fn end_idle(&mut self) -> Result<(), TransportError> {
        let tag = match std::mem::replace(&mut self.idle, IdleState::Off) {
            IdleState::Off => return Ok(()),
            IdleState::Requested(tag) | IdleState::Active(tag) => tag,
        };

        self.write_line("DONE").await?;
        loop {
            let line = self.read_line().await?;
            if is_tagged(&line, &tag) {
                return Ok(());
            }
            if parse_exists(&line).is_some() {
                self.pending_activity = true;
            }
        }
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn open_mailbox(&mut self, name: &str) -> Result<MailboxInfo, TransportError> {
        self.end_idle().await?;
        let done = self.execute(&format!("SELECT {}", quote(name))).await?;
        if !done.ok {
            return Err(TransportError::Mailbox {
                mailbox: name.to_string(),
                reason: done.status,
            });
        }
        // EXISTS in the SELECT reply is the current size, not an arrival.
        self.pending_activity = false;

        let info = parse_select(&done.untagged);
        debug!(mailbox = %name, exists = info.exists, uid_validity = ?info.uid_validity, "mailbox selected");
        Ok(info)
    }

    async fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<MessageRef>, TransportError> {
        self.uid_search(&format!("SINCE {}", imap_date(since))).await
    }

    async fn search_all(&mut self) -> Result<Vec<MessageRef>, TransportError> {
        self.uid_search("ALL").await
    }

    async fn fetch(&mut self, refs: &[MessageRef]) -> Result<Vec<RawMessage>, TransportError> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        self.end_idle().await?;

        let tag = self
            .send_command(&format!("UID FETCH {} (UID BODY.PEEK[])", uid_set(refs)))
            .await?;

        let mut messages = Vec::with_capacity(refs.len());
        loop {
            let line = self.read_line().await?;

            if is_tagged(&line, &tag) {
                if !is_ok(&line, &tag) {
                    return Err(TransportError::Protocol(format!("FETCH failed: {}", line)));
                }
                break;
            }

            if parse_exists(&line).is_some() {
                self.pending_activity = true;
                continue;
            }

            // * N FETCH (UID nnn BODY[] {size}
            if !line.starts_with("* ") || !line.to_ascii_uppercase().contains(" FETCH") {
                continue;
            }
            let Some(size) = literal_size(&line) else {
                continue;
            };

            let mut uid = find_uid(&line);
            let bytes = self.read_exact(size).await?;
            // Closing line after the literal; some servers put the UID here.
            let closing = self.read_line().await?;
            if uid.is_none() {
                uid = find_uid(&closing);
            }

            match uid {
                Some(uid) => messages.push(RawMessage::new(uid, bytes)),
                None => warn!(line = %line, "FETCH response without UID, skipping"),
            }
        }

        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    async fn watch(&mut self) -> Result<WatchEvent, TransportError> {
        self.ensure_idle().await?;
        if std::mem::take(&mut self.pending_activity) {
            return Ok(WatchEvent::Activity);
        }

        loop {
            let line = self.read_line().await?;

            if parse_exists(&line).is_some() {
                return Ok(WatchEvent::Activity);
            }
            if line.to_ascii_uppercase().starts_with("* BYE") {
                self.idle = IdleState::Off;
                return Err(TransportError::Closed);
            }
            let ended = matches!(&self.idle, IdleState::Active(tag) if is_tagged(&line, tag));
            if ended {
                self.idle = IdleState::Off;
                return Err(TransportError::Protocol(format!("IDLE ended by server: {}", line)));
            }
            debug!(line = %line, "IMAP idle update");
        }
    }

    async fn renew_watch(&mut self) -> Result<(), TransportError> {
        self.end_idle().await?;
        self.ensure_idle().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.end_idle().await {
            debug!(error = %e, "IDLE not terminated cleanly before LOGOUT");
        }
        let tag = self.send_command("LOGOUT").await?;
        // Server sends * BYE before the tagged OK, and may hang up right after.
        loop {
            match self.read_line().await {
                Ok(line) if is_tagged(&line, &tag) => return Ok(()),
                Ok(_) => continue,
                Err(TransportError::Closed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

// ─────────────────────────────────────────────
// Response parsing
// ─────────────────────────────────────────────

/// Quote a string argument, escaping `\` and `"`.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn is_tagged(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .is_some_and(|rest| rest.starts_with(' '))
}

fn is_ok(status: &str, tag: &str) -> bool {
    status
        .get(tag.len()..)
        .map(str::trim_start)
        .and_then(|rest| rest.as_bytes().get(..2))
        .is_some_and(|word| word.eq_ignore_ascii_case(b"OK"))
}

/// `* 23 EXISTS` → 23.
fn parse_exists(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "*" {
        return None;
    }
    let n = parts.next()?.parse().ok()?;
    parts.next()?.eq_ignore_ascii_case("EXISTS").then_some(n)
}

/// Numeric value of a response code such as `[UIDVALIDITY 3857529045]`.
fn bracket_value(line: &str, key: &str) -> Option<u32> {
    let upper = line.to_ascii_uppercase();
    let start = upper.find(&format!("[{} ", key))? + key.len() + 2;
    let rest = line.get(start..)?;
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

fn parse_select(lines: &[String]) -> MailboxInfo {
    let mut info = MailboxInfo::default();
    for line in lines {
        if let Some(n) = parse_exists(line) {
            info.exists = n;
        }
        if let Some(v) = bracket_value(line, "UIDVALIDITY") {
            info.uid_validity = Some(v);
        }
    }
    info
}

fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter(|line| line.to_ascii_uppercase().starts_with("* SEARCH"))
        .flat_map(|line| {
            line.split_whitespace()
                .skip(2) // skip "* SEARCH"
                .filter_map(|s| s.parse().ok())
        })
        .collect()
}

/// `UID 42` anywhere in a FETCH line.
fn find_uid(line: &str) -> Option<u32> {
    let upper = line.to_ascii_uppercase();
    let pos = upper.find("UID ")?;
    let rest = line.get(pos + 4..)?;
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Trailing literal marker `{N}`.
fn literal_size(line: &str) -> Option<usize> {
    let body = line.trim_end().strip_suffix('}')?;
    let start = body.rfind('{')?;
    body[start + 1..].parse().ok()
}

fn uid_set(refs: &[MessageRef]) -> String {
    refs.iter()
        .map(|r| r.uid().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// IMAP date (`01-Jan-2024`), as used by `SEARCH SINCE`.
fn imap_date(at: DateTime<Utc>) -> String {
    at.format("%d-%b-%Y").to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
