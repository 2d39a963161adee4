//! IMAP mail source: raw IMAP over rustls, parsed with mail-parser.
//!
//! Every trait call opens its own short session on a blocking thread
//! (`spawn_blocking`), so concurrent body fetches never share a socket.
//! Listing and body fetches use `BODY.PEEK`, which leaves `\Seen` alone;
//! only [`MailSource::mark_read`] changes read state.

use std::io::{Read, Write as IoWrite};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::SourceError;
use crate::pipeline::types::Message;
use crate::source::MailSource;
use crate::source::clean::{snippet, strip_html};

/// Bytes fetched per message when listing (enough for headers and a preview).
const LIST_PEEK_BYTES: usize = 16_384;

/// Snippet length shown to subject triage.
const SNIPPET_CHARS: usize = 200;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// IMAP connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
}

impl ImapConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let mailbox = std::env::var("EMAIL_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        Some(Self {
            host,
            port,
            username,
            password,
            mailbox,
        })
    }
}

// ── Adapter ─────────────────────────────────────────────────────────

/// [`MailSource`] over IMAP. Message ids are IMAP UIDs.
pub struct ImapMailSource {
    config: ImapConfig,
}

impl ImapMailSource {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, ImapError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, ImapError> + Send + 'static,
    {
        let cfg = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::open(&cfg)?;
            let result = op(&mut session);
            session.logout();
            result
        })
        .await
        .map_err(|e| -> ImapError { format!("IMAP task panicked: {e}").into() })?
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    fn name(&self) -> &str {
        "imap"
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<Message>, SourceError> {
        let messages = self
            .with_session(move |session| {
                let uids = session.search_unseen()?;
                // Newest `limit` messages, oldest of those first.
                let start = uids.len().saturating_sub(limit);
                let mut messages = Vec::with_capacity(uids.len() - start);
                for uid in &uids[start..] {
                    let item = format!("BODY.PEEK[]<0.{LIST_PEEK_BYTES}>");
                    let Some(raw) = session.fetch(uid, &item)? else {
                        continue;
                    };
                    if let Some(message) = parse_listing(uid, &raw) {
                        messages.push(message);
                    }
                }
                Ok(messages)
            })
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        info!(count = messages.len(), limit, "Listed unread messages");
        Ok(messages)
    }

    async fn fetch_body(&self, message_id: &str) -> Result<String, SourceError> {
        let uid = message_id.to_string();
        let raw = self
            .with_session(move |session| session.fetch(&uid, "BODY.PEEK[]"))
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?
            .ok_or_else(|| SourceError::NotFound {
                id: message_id.to_string(),
            })?;

        let parsed = MessageParser::default()
            .parse(&raw)
            .ok_or_else(|| SourceError::Protocol(format!("unparseable message {message_id}")))?;
        Ok(extract_text(&parsed))
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), SourceError> {
        let uid = message_id.to_string();
        self.with_session(move |session| session.store_seen(&uid))
            .await
            .map_err(|e| SourceError::MarkRead {
                id: message_id.to_string(),
                reason: e.to_string(),
            })?;
        debug!(id = %message_id, "Marked read");
        Ok(())
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────

fn parse_listing(uid: &str, raw: &[u8]) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;
    let subject = parsed.subject().unwrap_or("(no subject)").to_string();
    let body = extract_text(&parsed);
    let mut message = Message::new(uid, subject, extract_sender(&parsed), snippet(&body, SNIPPET_CHARS));
    if let Some(date) = parsed.date() {
        message = message.with_date(date.to_rfc3339());
    }
    Some(message)
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return "unknown".into();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".into(),
    }
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            let name = MimeHeaders::attachment_name(part).unwrap_or("file");
            return format!("[Attachment: {name}]\n{text}");
        }
    }
    String::new()
}

/// Quote a string for an IMAP command argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parse the byte count of a trailing `{N}` literal marker.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches("\r\n");
    let open = trimmed.rfind('{')?;
    trimmed.strip_suffix('}')?[open + 1..].parse().ok()
}

// ── IMAP session ────────────────────────────────────────────────────

/// Error type for blocking IMAP operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Untagged lines and literal payloads of one command.
#[derive(Debug, Default)]
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

struct ImapSession {
    tls: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    /// Connect, log in, and select the configured mailbox.
    fn open(config: &ImapConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((&*config.host, config.port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };
        let _greeting = session.read_line()?;

        session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        session.command(&format!("SELECT {}", quote(&config.mailbox)))?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a tagged command and collect its response. Fails unless the
    /// tagged completion is `OK`.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ImapError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.tls.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.tls.flush()?;

        let mut response = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                let verb = cmd.split_whitespace().next().unwrap_or(cmd);
                return Err(format!("IMAP {verb} failed: {}", status.trim()).into());
            }
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.tls.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            response.lines.push(line);
        }
    }

    fn search_unseen(&mut self) -> Result<Vec<String>, ImapError> {
        let response = self.command("UID SEARCH UNSEEN")?;
        let mut uids = Vec::new();
        for line in &response.lines {
            if let Some(rest) = line.strip_prefix("* SEARCH") {
                uids.extend(rest.split_whitespace().map(str::to_string));
            }
        }
        uids.sort_by_key(|u| u.parse::<u64>().unwrap_or(u64::MAX));
        Ok(uids)
    }

    /// Fetch one data item for a UID. `None` when the UID does not exist.
    fn fetch(&mut self, uid: &str, item: &str) -> Result<Option<Vec<u8>>, ImapError> {
        let response = self.command(&format!("UID FETCH {uid} ({item})"))?;
        Ok(response.literals.into_iter().next())
    }

    fn store_seen(&mut self, uid: &str) -> Result<(), ImapError> {
        self.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
        Ok(())
    }

    fn logout(&mut self) {
        let _ = self.command("LOGOUT");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_len_parses_trailing_marker() {
        assert_eq!(literal_len("* 1 FETCH (UID 5 BODY[] {1234}\r\n"), Some(1234));
        assert_eq!(literal_len("* 1 FETCH (UID 5 FLAGS (\\Seen))\r\n"), None);
        assert_eq!(literal_len("{abc}\r\n"), None);
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn parse_listing_reads_headers_and_snippet() {
        let raw = b"From: Prof Smith <smith@uni.edu>\r\n\
Subject: Quiz Friday\r\n\
Date: Mon, 12 Jan 2026 10:00:00 +0000\r\n\
Content-Type: text/plain\r\n\
\r\n\
Quiz on chapters 3 and 4,\r\nroom 101.\r\n";
        let message = parse_listing("42", raw).unwrap();
        assert_eq!(message.id, "42");
        assert_eq!(message.subject, "Quiz Friday");
        assert_eq!(message.sender, "Prof Smith <smith@uni.edu>");
        assert_eq!(message.snippet, "Quiz on chapters 3 and 4, room 101.");
        assert!(message.date.is_some());
        assert!(message.body.is_none());
    }

    #[test]
    fn parse_listing_defaults_missing_subject() {
        let raw = b"From: a@b.com\r\n\r\nhello\r\n";
        let message = parse_listing("7", raw).unwrap();
        assert_eq!(message.subject, "(no subject)");
        assert_eq!(message.sender, "a@b.com");
    }

    #[test]
    fn config_from_env_returns_none_when_no_host() {
        // SAFETY: no other test reads EMAIL_IMAP_HOST concurrently.
        unsafe { std::env::remove_var("EMAIL_IMAP_HOST") };
        assert!(ImapConfig::from_env().is_none());
    }
}
