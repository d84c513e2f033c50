//! Access and error log streams.
//!
//! # Responsibilities
//! - Accept records from any task without blocking request handling
//! - Write each stream in arrival order from exactly one writer task
//! - Count (never propagate) records lost to overflow
//! - Flush both streams on close
//!
//! # Design Decisions
//! - One bounded `LogQueue` per stream; the writer drains it in batches
//! - Destinations are opened before the gateway accepts traffic
//! - A failing destination is reported through tracing and never stops the writer

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;

use crate::config::schema::{LogStreamConfig, LoggingConfig, RecordFormat};
use crate::observability::metrics;
use crate::observability::queue::{LogQueue, LogSinkError};
use crate::observability::records::{ErrorRecord, LogLine, LogRecord};

const WRITE_BATCH: usize = 256;

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

async fn open_sink(destination: &str) -> Result<Sink, LogSinkError> {
    match destination {
        "stdout" | "-" => Ok(Box::new(tokio::io::stdout())),
        "stderr" => Ok(Box::new(tokio::io::stderr())),
        path => {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|source| LogSinkError::Open {
                    destination: path.to_string(),
                    source,
                })?;
            Ok(Box::new(file))
        }
    }
}

async fn run_writer<T: LogLine>(
    stream: &'static str,
    queue: Arc<LogQueue<T>>,
    sink: Sink,
    format: RecordFormat,
) {
    let mut out = BufWriter::new(sink);
    while let Some(batch) = queue.pop_batch(WRITE_BATCH).await {
        let mut buffer = String::new();
        for record in &batch {
            buffer.push_str(&record.render(format));
            buffer.push('\n');
        }
        let written = async {
            out.write_all(buffer.as_bytes()).await?;
            out.flush().await
        };
        if let Err(e) = written.await {
            tracing::error!(stream = stream, error = %e, records = batch.len(), "Log write failed");
        }
    }
    if let Err(e) = out.shutdown().await {
        tracing::warn!(stream = stream, error = %e, "Log stream close failed");
    }
    tracing::debug!(stream = stream, "Log writer stopped");
}

struct LoggerInner {
    access: Arc<LogQueue<LogRecord>>,
    error: Arc<LogQueue<ErrorRecord>>,
    writers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the access and error streams. Cheap to clone.
#[derive(Clone)]
pub struct AccessLogger {
    inner: Arc<LoggerInner>,
}

impl std::fmt::Debug for AccessLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLogger")
            .field("access_pending", &self.inner.access.len())
            .field("error_pending", &self.inner.error.len())
            .finish()
    }
}

fn queue_for<T>(config: &LogStreamConfig) -> Arc<LogQueue<T>> {
    Arc::new(LogQueue::new(
        config.capacity,
        config.overflow,
        Duration::from_millis(config.backpressure_timeout_ms),
    ))
}

impl AccessLogger {
    /// Open both destinations and start their writers.
    pub async fn open(config: &LoggingConfig) -> Result<Self, LogSinkError> {
        let access_sink = open_sink(&config.access.destination).await?;
        let error_sink = open_sink(&config.error.destination).await?;

        let access = queue_for::<LogRecord>(&config.access);
        let error = queue_for::<ErrorRecord>(&config.error);

        let writers = vec![
            tokio::spawn(run_writer("access", Arc::clone(&access), access_sink, config.access.format)),
            tokio::spawn(run_writer("error", Arc::clone(&error), error_sink, config.error.format)),
        ];

        tracing::info!(
            access = %config.access.destination,
            error = %config.error.destination,
            "Log streams opened"
        );

        Ok(Self {
            inner: Arc::new(LoggerInner {
                access,
                error,
                writers: Mutex::new(writers),
            }),
        })
    }

    /// Append an access record.
    pub async fn record(&self, record: LogRecord) {
        if let Err(e) = self.inner.access.push(record).await {
            Self::report("access", e);
        }
    }

    /// Append an error record.
    pub async fn record_error(&self, record: ErrorRecord) {
        if let Err(e) = self.inner.error.push(record).await {
            Self::report("error", e);
        }
    }

    fn report(stream: &'static str, err: LogSinkError) {
        match err {
            LogSinkError::Dropped => metrics::record_log_drop(stream),
            other => tracing::debug!(stream = stream, error = %other, "Log record discarded"),
        }
    }

    /// Records lost to overflow as (access, error).
    pub fn dropped(&self) -> (u64, u64) {
        (self.inner.access.dropped(), self.inner.error.dropped())
    }

    /// Stop accepting records, flush everything queued and wait for both writers.
    pub async fn close(&self) {
        self.inner.access.close();
        self.inner.error.close();

        let writers: Vec<JoinHandle<()>> = self.inner.writers.lock().drain(..).collect();
        for writer in writers {
            if let Err(e) = writer.await {
                tracing::error!(error = %e, "Log writer task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::OverflowPolicy;
    use crate::observability::records::ErrorKind;
    use chrono::Utc;

    fn file_config(dir: &std::path::Path, format: RecordFormat) -> LoggingConfig {
        let stream = |name: &str| LogStreamConfig {
            destination: dir.join(name).display().to_string(),
            format,
            capacity: 64,
            overflow: OverflowPolicy::Backpressure,
            backpressure_timeout_ms: 1000,
        };
        LoggingConfig {
            access: stream("access.log"),
            error: stream("error.log"),
            ..LoggingConfig::default()
        }
    }

    fn request(path: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            client_addr: "127.0.0.1:40000".parse().unwrap(),
            server_name: "www.example.com".into(),
            port: 80,
            method: "GET".into(),
            path: path.into(),
            protocol: "HTTP/1.1".into(),
            status: 200,
            bytes_sent: 10,
            duration_ms: 1,
            request_id: None,
        }
    }

    #[tokio::test]
    async fn writes_records_in_order_and_flushes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AccessLogger::open(&file_config(dir.path(), RecordFormat::Text)).await.unwrap();

        for i in 0..100 {
            logger.record(request(&format!("/page/{}", i))).await;
        }
        logger
            .record_error(ErrorRecord::new(ErrorKind::Routing, "request for nothing.example.com", "no virtual host"))
            .await;
        logger.close().await;

        let access = std::fs::read_to_string(dir.path().join("access.log")).unwrap();
        let lines: Vec<&str> = access.lines().collect();
        assert_eq!(lines.len(), 100);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.contains(&format!("\"GET /page/{} HTTP/1.1\"", i)), "{}", line);
        }

        let errors = std::fs::read_to_string(dir.path().join("error.log")).unwrap();
        assert_eq!(errors.lines().count(), 1);
        assert!(errors.contains("[routing:error]"));
        assert_eq!(logger.dropped(), (0, 0));
    }

    #[tokio::test]
    async fn appends_to_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("access.log"), "existing line\n").unwrap();

        let logger = AccessLogger::open(&file_config(dir.path(), RecordFormat::Json)).await.unwrap();
        logger.record(request("/")).await;
        logger.close().await;

        let access = std::fs::read_to_string(dir.path().join("access.log")).unwrap();
        let lines: Vec<&str> = access.lines().collect();
        assert_eq!(lines[0], "existing line");
        let value: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(value["path"], "/");
    }

    #[tokio::test]
    async fn unopenable_destination_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = file_config(dir.path(), RecordFormat::Text);
        config.access.destination = dir.path().join("missing/dir/access.log").display().to_string();
        assert!(matches!(
            AccessLogger::open(&config).await,
            Err(LogSinkError::Open { .. })
        ));
    }
}
