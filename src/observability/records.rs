//! Access and error record types and their line formats.
//!
//! Text access lines follow the virtual-host common log format, extended
//! with duration and request ID:
//!
//! ```text
//! www.example.com:443 203.0.113.7 - - [16/Oct/2026:09:14:03 +0000] "GET /index.html HTTP/1.1" 200 5120 3 6f1c...
//! ```
//!
//! Text error lines follow the Apache error log layout:
//!
//! ```text
//! [Fri Oct 16 09:14:03.120554 2026] [handshake:error] [client 203.0.113.7:51234] TLS handshake on port 443: no virtual host for server name unknown.example.com
//! ```

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::schema::RecordFormat;

/// Something a log stream can write as one line.
pub trait LogLine {
    fn render(&self, format: RecordFormat) -> String;
}

/// One completed HTTP request.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub client_addr: SocketAddr,
    /// Virtual host label (`name` or `_default_`), `-` when unrouted.
    pub server_name: String,
    pub port: u16,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: u16,
    pub bytes_sent: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl LogLine for LogRecord {
    fn render(&self, format: RecordFormat) -> String {
        match format {
            RecordFormat::Json => json_line(self),
            RecordFormat::Text => {
                let bytes = if self.bytes_sent == 0 {
                    "-".to_string()
                } else {
                    self.bytes_sent.to_string()
                };
                format!(
                    "{}:{} {} - - [{}] \"{} {} {}\" {} {} {} {}",
                    self.server_name,
                    self.port,
                    self.client_addr.ip(),
                    self.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
                    self.method,
                    self.path,
                    self.protocol,
                    self.status,
                    bytes,
                    self.duration_ms,
                    self.request_id.as_deref().unwrap_or("-"),
                )
            }
        }
    }
}

/// Category of a logged failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Config,
    Certificate,
    Handshake,
    Routing,
    Io,
    Upstream,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Certificate => "certificate",
            ErrorKind::Handshake => "handshake",
            ErrorKind::Routing => "routing",
            ErrorKind::Io => "io",
            ErrorKind::Upstream => "upstream",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure worth an error-log line.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_addr: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// What was being attempted.
    pub context: String,
    /// Why it failed.
    pub cause: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, context: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            client_addr: None,
            server_name: None,
            context: context.into(),
            cause: cause.to_string(),
        }
    }

    pub fn with_client(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn with_server(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

impl LogLine for ErrorRecord {
    fn render(&self, format: RecordFormat) -> String {
        match format {
            RecordFormat::Json => json_line(self),
            RecordFormat::Text => {
                let mut line = format!(
                    "[{}] [{}:error]",
                    self.timestamp.format("%a %b %d %H:%M:%S%.6f %Y"),
                    self.kind
                );
                if let Some(addr) = self.client_addr {
                    line.push_str(&format!(" [client {}]", addr));
                }
                if let Some(server) = &self.server_name {
                    line.push_str(&format!(" [vhost {}]", server));
                }
                line.push_str(&format!(" {}: {}", self.context, self.cause));
                line
            }
        }
    }
}

fn json_line<T: Serialize>(record: &T) -> String {
    serde_json::to_string(record)
        .unwrap_or_else(|e| format!("{{\"error\":\"unserializable record: {}\"}}", e))
}
