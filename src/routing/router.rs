//! Virtual host lookup.
//!
//! # Responsibilities
//! - Store compiled virtual hosts
//! - Resolve (port, SNI or Host header) to a host, the port's default, or NoMatch
//! - Report which ports must be bound and whether they speak TLS
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) lookup via HashMap keyed by (port, normalized name)
//! - Explicit NoMatch rather than silent default

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::config::loader::ConfigError;
use crate::config::schema::{GatewayConfig, VirtualHostConfig};
use crate::config::validation::validate_config;
use crate::routing::matcher::{normalize_host, HostKey};

/// A compiled virtual host.
#[derive(Debug)]
pub struct VirtualHost {
    key: HostKey,
    names: Vec<String>,
    config: VirtualHostConfig,
}

impl VirtualHost {
    fn compile(config: &VirtualHostConfig) -> Self {
        let key = HostKey::new(config.port, config.server_name.as_deref());
        let names = config
            .server_name
            .iter()
            .chain(config.server_aliases.iter())
            .filter_map(|name| normalize_host(name))
            .collect();
        Self {
            key,
            names,
            config: config.clone(),
        }
    }

    pub fn key(&self) -> &HostKey {
        &self.key
    }

    /// Primary name, `None` for a default host.
    pub fn server_name(&self) -> Option<&str> {
        self.key.server_name.as_deref()
    }

    /// Primary name and aliases, normalized.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn port(&self) -> u16 {
        self.key.port
    }

    pub fn config(&self) -> &VirtualHostConfig {
        &self.config
    }

    pub fn document_root(&self) -> Option<&Path> {
        self.config.document_root.as_deref()
    }

    pub fn upstream(&self) -> Option<&str> {
        self.config.upstream.as_deref()
    }

    pub fn index_files(&self) -> &[String] {
        &self.config.index_files
    }

    pub fn is_tls(&self) -> bool {
        self.config.tls_enabled
    }

    pub fn requires_client_cert(&self) -> bool {
        self.config.require_client_cert
    }
}

/// Outcome of a virtual host lookup.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The name matched a server name or alias on the port.
    Exact(Arc<VirtualHost>),
    /// No name matched; the port's catch-all host applies.
    Default(Arc<VirtualHost>),
    /// No name matched and the port has no default.
    NoMatch,
}

impl Resolution {
    pub fn host(&self) -> Option<&Arc<VirtualHost>> {
        match self {
            Resolution::Exact(host) | Resolution::Default(host) => Some(host),
            Resolution::NoMatch => None,
        }
    }

    pub fn into_host(self) -> Option<Arc<VirtualHost>> {
        match self {
            Resolution::Exact(host) | Resolution::Default(host) => Some(host),
            Resolution::NoMatch => None,
        }
    }
}

/// Immutable routing table for one configuration snapshot.
#[derive(Debug)]
pub struct VirtualHostRouter {
    named: HashMap<(u16, String), Arc<VirtualHost>>,
    defaults: HashMap<u16, Arc<VirtualHost>>,
    hosts: Vec<Arc<VirtualHost>>,
    /// port -> terminates TLS
    ports: BTreeMap<u16, bool>,
}

impl VirtualHostRouter {
    /// Compile a validated routing table from configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let mut named = HashMap::new();
        let mut defaults = HashMap::new();
        let mut hosts = Vec::with_capacity(config.virtual_hosts.len());
        let mut ports = BTreeMap::new();

        for host_config in &config.virtual_hosts {
            let host = Arc::new(VirtualHost::compile(host_config));
            ports.insert(host.port(), host.is_tls());

            if host.key().is_default() {
                defaults.insert(host.port(), Arc::clone(&host));
            }
            for name in host.names() {
                named.insert((host.port(), name.clone()), Arc::clone(&host));
            }

            tracing::debug!(
                host = %host.key(),
                aliases = host.names().len().saturating_sub(1),
                tls = host.is_tls(),
                "Virtual host compiled"
            );
            hosts.push(host);
        }

        Ok(Self {
            named,
            defaults,
            hosts,
            ports,
        })
    }

    /// Resolve a virtual host for a connection or request arriving on `port`.
    ///
    /// `name` is the SNI value or `Host` header as received; it is normalized here.
    pub fn resolve(&self, port: u16, name: Option<&str>) -> Resolution {
        if let Some(name) = name.and_then(normalize_host) {
            if let Some(host) = self.named.get(&(port, name)) {
                return Resolution::Exact(Arc::clone(host));
            }
        }
        match self.defaults.get(&port) {
            Some(host) => Resolution::Default(Arc::clone(host)),
            None => Resolution::NoMatch,
        }
    }

    /// Look up a host by its identity.
    pub fn get(&self, key: &HostKey) -> Option<&Arc<VirtualHost>> {
        match &key.server_name {
            Some(name) => self.named.get(&(key.port, name.clone())),
            None => self.defaults.get(&key.port),
        }
    }

    /// All hosts in configuration order.
    pub fn hosts(&self) -> &[Arc<VirtualHost>] {
        &self.hosts
    }

    /// TLS-terminating hosts.
    pub fn tls_hosts(&self) -> impl Iterator<Item = &Arc<VirtualHost>> {
        self.hosts.iter().filter(|host| host.is_tls())
    }

    /// Distinct ports with their TLS mode, in ascending order.
    pub fn ports(&self) -> impl Iterator<Item = (u16, bool)> + '_ {
        self.ports.iter().map(|(port, tls)| (*port, *tls))
    }

    pub fn is_tls_port(&self, port: u16) -> bool {
        self.ports.get(&port).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsProtocol;

    fn router(hosts: Vec<VirtualHostConfig>) -> VirtualHostRouter {
        let config = GatewayConfig {
            virtual_hosts: hosts,
            ..GatewayConfig::default()
        };
        VirtualHostRouter::from_config(&config).unwrap()
    }

    fn served_from(resolution: &Resolution) -> Option<&Path> {
        resolution.host().and_then(|host| host.document_root())
    }

    #[test]
    fn exact_match_wins_over_default() {
        let router = router(vec![
            VirtualHostConfig::new(80, None, "/srv/default"),
            VirtualHostConfig::new(80, Some("www.example.com"), "/srv/www"),
            VirtualHostConfig::new(80, Some("api.example.com"), "/srv/api"),
        ]);

        let resolved = router.resolve(80, Some("www.example.com"));
        assert!(matches!(resolved, Resolution::Exact(_)));
        assert_eq!(served_from(&resolved), Some(Path::new("/srv/www")));

        let resolved = router.resolve(80, Some("API.Example.com:80"));
        assert_eq!(served_from(&resolved), Some(Path::new("/srv/api")));
    }

    #[test]
    fn exact_names_never_resolve_to_another_host() {
        let names = ["a.example.com", "b.example.com", "c.example.com", "d.example.com"];
        let router = router(
            names
                .iter()
                .map(|name| VirtualHostConfig::new(80, Some(*name), format!("/srv/{}", name)))
                .collect(),
        );

        for name in names {
            let host = router.resolve(80, Some(name)).into_host().unwrap();
            assert_eq!(host.server_name(), Some(name));
        }
    }

    #[test]
    fn unmatched_names_fall_back_to_default() {
        let router = router(vec![
            VirtualHostConfig::new(80, None, "/srv/default"),
            VirtualHostConfig::new(80, Some("www.example.com"), "/srv/www"),
        ]);

        let resolved = router.resolve(80, Some("unknown.example.org"));
        assert!(matches!(resolved, Resolution::Default(_)));
        assert_eq!(served_from(&resolved), Some(Path::new("/srv/default")));

        let resolved = router.resolve(80, None);
        assert!(matches!(resolved, Resolution::Default(_)));
    }

    #[test]
    fn no_default_means_no_match() {
        let router = router(vec![VirtualHostConfig::new(80, Some("www.example.com"), "/srv/www")]);
        assert!(matches!(router.resolve(80, Some("other.example.com")), Resolution::NoMatch));
        assert!(matches!(router.resolve(80, None), Resolution::NoMatch));
        assert!(matches!(router.resolve(80, Some("not a host")), Resolution::NoMatch));
    }

    #[test]
    fn resolution_is_scoped_to_the_port() {
        let router = router(vec![
            VirtualHostConfig::new(80, Some("www.example.com"), "/srv/plain"),
            VirtualHostConfig::new(8080, None, "/srv/alt"),
        ]);

        assert!(matches!(router.resolve(8080, Some("www.example.com")), Resolution::Default(_)));
        assert!(matches!(router.resolve(9090, Some("www.example.com")), Resolution::NoMatch));
    }

    #[test]
    fn aliases_resolve_to_their_host() {
        let mut host = VirtualHostConfig::new(80, Some("www.example.com"), "/srv/www");
        host.server_aliases = vec!["example.com".into(), "WWW2.example.com".into()];
        let router = router(vec![host]);

        for name in ["example.com", "www2.example.com", "www.example.com."] {
            let host = router.resolve(80, Some(name)).into_host().unwrap();
            assert_eq!(host.server_name(), Some("www.example.com"));
        }
    }

    #[test]
    fn reports_ports_with_tls_mode() {
        let router = router(vec![
            VirtualHostConfig::new(80, None, "/srv/www"),
            VirtualHostConfig::new(443, Some("www.example.com"), "/srv/www").with_tls(
                "/etc/ssl/www.crt",
                "/etc/ssl/www.key",
                &[TlsProtocol::Tls13],
            ),
        ]);

        assert_eq!(router.ports().collect::<Vec<_>>(), vec![(80, false), (443, true)]);
        assert!(router.is_tls_port(443));
        assert!(!router.is_tls_port(80));
        assert_eq!(router.tls_hosts().count(), 1);
        assert!(router.get(&HostKey::new(443, Some("www.example.com"))).is_some());
        assert!(router.get(&HostKey::new(443, None)).is_none());
    }

    #[test]
    fn ambiguous_defaults_fail_to_compile() {
        let config = GatewayConfig {
            virtual_hosts: vec![
                VirtualHostConfig::new(80, None, "/srv/a"),
                VirtualHostConfig::new(80, None, "/srv/b"),
            ],
            ..GatewayConfig::default()
        };
        assert!(matches!(
            VirtualHostRouter::from_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }
}
