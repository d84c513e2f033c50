//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use vhost_gateway::config::schema::{
    GatewayConfig, LogStreamConfig, LoggingConfig, OverflowPolicy, RecordFormat,
};
use vhost_gateway::Gateway;

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Test CA plus the certificates it issued, written under one directory.
pub struct TestPki {
    dir: PathBuf,
    ca_cert: Certificate,
    ca_key: KeyPair,
    pub ca_file: PathBuf,
}

/// Paths of an issued certificate and its key.
pub struct Issued {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestPki {
    pub fn new(dir: &Path) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "vhost-gateway test CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = params.self_signed(&ca_key).unwrap();

        let ca_file = dir.join("ca.pem");
        std::fs::write(&ca_file, ca_cert.pem()).unwrap();

        Self {
            dir: dir.to_path_buf(),
            ca_cert,
            ca_key,
            ca_file,
        }
    }

    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    /// Server certificate for `name`, signed by the CA.
    pub fn server(&self, name: &str) -> Issued {
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        self.issue(name, params)
    }

    /// Client certificate for `name`, signed by the CA.
    pub fn client(&self, name: &str) -> Issued {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        self.issue(&format!("client-{}", name), params)
    }

    fn issue(&self, file_stem: &str, params: CertificateParams) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();

        let cert_file = self.dir.join(format!("{}.crt", file_stem));
        let key_file = self.dir.join(format!("{}.key", file_stem));
        std::fs::write(&cert_file, cert.pem()).unwrap();
        std::fs::write(&key_file, key.serialize_pem()).unwrap();

        Issued {
            cert_file,
            key_file,
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }
}

/// Create `dir/name` with the given files (`relative path`, contents).
pub fn site(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let root = dir.join(name);
    for (path, contents) in files {
        let file = root.join(path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, contents).unwrap();
    }
    std::fs::create_dir_all(&root).unwrap();
    root
}

/// Config bound to loopback with JSON access/error logs under `dir`.
pub fn base_config(dir: &Path) -> GatewayConfig {
    let stream = |name: &str| LogStreamConfig {
        destination: dir.join(name).display().to_string(),
        format: RecordFormat::Json,
        capacity: 1024,
        overflow: OverflowPolicy::Backpressure,
        backpressure_timeout_ms: 1000,
    };

    let mut config = GatewayConfig {
        logging: LoggingConfig {
            access: stream("access.log"),
            error: stream("error.log"),
            ..LoggingConfig::default()
        },
        ..GatewayConfig::default()
    };
    config.listener.bind_host = "127.0.0.1".to_string();
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// A running gateway plus the directory holding its sites and logs.
pub struct TestGateway {
    pub gateway: Gateway,
    pub dir: TempDir,
}

impl TestGateway {
    pub async fn start(dir: TempDir, config: GatewayConfig) -> Self {
        let gateway = Gateway::start(config, None).await.unwrap();
        Self { gateway, dir }
    }

    pub async fn start_from_file(dir: TempDir, config_file: PathBuf, config: GatewayConfig) -> Self {
        let gateway = Gateway::start(config, Some(config_file)).await.unwrap();
        Self { gateway, dir }
    }

    pub async fn addr(&self, port: u16) -> SocketAddr {
        self.gateway.local_addr(port).await.unwrap()
    }

    pub fn access_log(&self) -> PathBuf {
        self.dir.path().join("access.log")
    }

    pub fn error_log(&self) -> PathBuf {
        self.dir.path().join("error.log")
    }

    /// Wait for at least `count` access records.
    pub async fn access_records(&self, count: usize) -> Vec<Value> {
        wait_for_lines(&self.access_log(), count).await
    }

    /// Wait for at least `count` error records.
    pub async fn error_records(&self, count: usize) -> Vec<Value> {
        wait_for_lines(&self.error_log(), count).await
    }

    /// Shut down, flushing both log streams.
    pub async fn stop(self) -> TempDir {
        self.gateway.shutdown().await;
        self.dir
    }
}

/// Parse the JSON lines of `path` (empty when the file does not exist).
pub fn read_lines(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

pub async fn wait_for_lines(path: &Path, count: usize) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let lines = read_lines(path);
        if lines.len() >= count || tokio::time::Instant::now() >= deadline {
            return lines;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Send raw bytes over plain TCP and return the full response text.
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Status code from the first line of a raw HTTP response.
pub fn status_of(response: &str) -> u16 {
    response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

/// Start a mock upstream that echoes the request line and forwarding headers as its body.
pub async fn start_mock_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buffer = vec![0u8; 8192];
                let mut read = 0;
                loop {
                    match socket.read(&mut buffer[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if buffer[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buffer.len() {
                        break;
                    }
                }

                let head = String::from_utf8_lossy(&buffer[..read]).to_string();
                let mut body = String::new();
                for line in head.lines() {
                    let lower = line.to_ascii_lowercase();
                    if line.starts_with("GET ")
                        || line.starts_with("HEAD ")
                        || line.starts_with("POST ")
                        || lower.starts_with("x-forwarded-")
                        || lower.starts_with("host:")
                    {
                        body.push_str(line);
                        body.push('\n');
                    }
                }

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}
