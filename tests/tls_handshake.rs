//! TLS termination: SNI routing, protocol policy, client certificates.

use std::net::SocketAddr;

use reqwest::tls::Version;
use vhost_gateway::config::schema::{TlsProtocol, VirtualHostConfig};

mod common;

use common::{base_config, free_port, site, TestGateway, TestPki};

fn client_builder(pki: &TestPki, name: &str, addr: SocketAddr) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(reqwest::Certificate::from_pem(pki.ca_pem().as_bytes()).unwrap())
        .resolve(name, addr)
}

fn client(pki: &TestPki, name: &str, addr: SocketAddr) -> reqwest::Client {
    client_builder(pki, name, addr).build().unwrap()
}

struct TlsSetup {
    gateway: TestGateway,
    pki: TestPki,
    port: u16,
    addr: SocketAddr,
}

/// `modern.test` (TLS 1.3 only) and `legacy.test` (TLS 1.2 only) on one port,
/// optionally with a default host.
async fn tls_sites(with_default: bool) -> TlsSetup {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let pki = TestPki::new(dir.path());

    let modern = pki.server("modern.test");
    let legacy = pki.server("legacy.test");
    let fallback = pki.server("fallback.test");

    let mut config = base_config(dir.path());
    config.virtual_hosts = vec![
        VirtualHostConfig::new(
            port,
            Some("modern.test"),
            site(dir.path(), "modern", &[("index.html", "modern site")]),
        )
        .with_tls(&modern.cert_file, &modern.key_file, &[TlsProtocol::Tls13]),
        VirtualHostConfig::new(
            port,
            Some("legacy.test"),
            site(dir.path(), "legacy", &[("index.html", "legacy site")]),
        )
        .with_tls(&legacy.cert_file, &legacy.key_file, &[TlsProtocol::Tls12]),
    ];
    if with_default {
        config.virtual_hosts.push(
            VirtualHostConfig::new(
                port,
                None,
                site(dir.path(), "fallback", &[("index.html", "fallback site")]),
            )
            .with_tls(&fallback.cert_file, &fallback.key_file, &[TlsProtocol::Tls12, TlsProtocol::Tls13]),
        );
    }

    let gateway = TestGateway::start(dir, config).await;
    let addr = gateway.addr(port).await;
    TlsSetup { gateway, pki, port, addr }
}

#[tokio::test]
async fn serves_each_host_with_its_own_certificate() {
    let setup = tls_sites(false).await;

    let response = client(&setup.pki, "modern.test", setup.addr)
        .get(format!("https://modern.test:{}/", setup.port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "modern site");

    let response = client(&setup.pki, "legacy.test", setup.addr)
        .get(format!("https://legacy.test:{}/", setup.port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "legacy site");

    let dir = setup.gateway.stop().await;
    let records = common::read_lines(&dir.path().join("access.log"));
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r["server_name"] == "modern.test" && r["status"] == 200));
    assert!(records.iter().any(|r| r["server_name"] == "legacy.test" && r["status"] == 200));
}

#[tokio::test]
async fn enforces_each_hosts_protocol_allow_list() {
    let setup = tls_sites(false).await;

    let tls12_only = client_builder(&setup.pki, "modern.test", setup.addr)
        .max_tls_version(Version::TLS_1_2)
        .build()
        .unwrap();
    let result = tls12_only
        .get(format!("https://modern.test:{}/", setup.port))
        .send()
        .await;
    assert!(result.is_err(), "TLS 1.2 must not reach a TLS 1.3-only host");

    let tls13_only = client_builder(&setup.pki, "legacy.test", setup.addr)
        .min_tls_version(Version::TLS_1_3)
        .build()
        .unwrap();
    let result = tls13_only
        .get(format!("https://legacy.test:{}/", setup.port))
        .send()
        .await;
    assert!(result.is_err(), "TLS 1.3 must not reach a TLS 1.2-only host");

    let tls12 = client_builder(&setup.pki, "legacy.test", setup.addr)
        .max_tls_version(Version::TLS_1_2)
        .build()
        .unwrap();
    let response = tls12
        .get(format!("https://legacy.test:{}/", setup.port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let errors = setup.gateway.error_records(2).await;
    assert!(errors.len() >= 2);
    assert!(errors.iter().all(|e| e["kind"] == "handshake"));
    let modern = format!("modern.test:{}", setup.port);
    let legacy = format!("legacy.test:{}", setup.port);
    assert!(errors.iter().any(|e| e["server_name"] == modern.as_str()));
    assert!(errors.iter().any(|e| e["server_name"] == legacy.as_str()));

    setup.gateway.stop().await;
}

#[tokio::test]
async fn unknown_server_name_without_default_is_refused_once() {
    let setup = tls_sites(false).await;

    let result = client(&setup.pki, "stranger.test", setup.addr)
        .get(format!("https://stranger.test:{}/", setup.port))
        .send()
        .await;
    assert!(result.is_err());

    let dir = setup.gateway.stop().await;
    let errors = common::read_lines(&dir.path().join("error.log"));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["kind"], "routing");
    assert_eq!(errors[0]["server_name"], "stranger.test");
    assert!(common::read_lines(&dir.path().join("access.log")).is_empty());
}

#[tokio::test]
async fn unknown_server_name_falls_back_to_default_host() {
    let setup = tls_sites(true).await;

    // The default host presents fallback.test, so the client must ask for that name.
    let response = client(&setup.pki, "fallback.test", setup.addr)
        .get(format!("https://fallback.test:{}/", setup.port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "fallback site");

    let records = setup.gateway.access_records(1).await;
    assert_eq!(records[0]["server_name"], "_default_");

    setup.gateway.stop().await;
}

#[tokio::test]
async fn host_header_for_another_host_is_misdirected() {
    let setup = tls_sites(false).await;

    let response = client(&setup.pki, "modern.test", setup.addr)
        .get(format!("https://modern.test:{}/", setup.port))
        .header(reqwest::header::HOST, "legacy.test")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 421);

    let dir = setup.gateway.stop().await;
    let errors = common::read_lines(&dir.path().join("error.log"));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["kind"], "routing");
}

#[tokio::test]
async fn client_certificates_are_required_and_verified() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let pki = TestPki::new(dir.path());
    let server = pki.server("private.test");
    let user = pki.client("alice");

    let mut config = base_config(dir.path());
    config.virtual_hosts = vec![VirtualHostConfig::new(
        port,
        Some("private.test"),
        site(dir.path(), "private", &[("index.html", "members only")]),
    )
    .with_tls(&server.cert_file, &server.key_file, &[TlsProtocol::Tls13])
    .with_client_auth(&pki.ca_file)];

    let gateway = TestGateway::start(dir, config).await;
    let addr = gateway.addr(port).await;
    let url = format!("https://private.test:{}/", port);

    let anonymous = client(&pki, "private.test", addr);
    // TLS 1.3 reports the missing certificate after the client's handshake completes,
    // so the refusal can surface on the request or on the response body.
    let refused = match anonymous.get(&url).send().await {
        Err(_) => true,
        Ok(response) => response.text().await.is_err(),
    };
    assert!(refused);

    let identity = reqwest::Identity::from_pem(format!("{}{}", user.key_pem, user.cert_pem).as_bytes()).unwrap();
    let authenticated = client_builder(&pki, "private.test", addr)
        .identity(identity)
        .build()
        .unwrap();
    let response = authenticated.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "members only");

    gateway.stop().await;
}
