//! Backend target descriptors.
//!
//! # Responsibilities
//! - Normalize configured hosts into URLs (`localhost:8080` → `http://localhost:8080/`)
//! - Hold per-target probe path and request limit
//! - Build upstream URIs from a host and a request path
//!
//! Targets are pure data. Health state lives in `snapshot.rs`.

use std::fmt;
use std::sync::Arc;

use axum::http::Uri;
use url::Url;

use crate::config::TargetSpec;
use crate::error::ConfigError;

/// A single backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Position in the pool.
    pub index: usize,
    /// Normalized base URL.
    pub host: Url,
    /// Probe path overriding the checker's default.
    pub probe_path: Option<String>,
    /// Request limit between two health passes.
    pub max_requests: Option<u32>,
}

impl Target {
    /// Create a target from a raw host string with default settings.
    pub fn new(index: usize, host: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            index,
            host: parse_host(host)?,
            probe_path: None,
            max_requests: None,
        })
    }

    fn from_spec(index: usize, spec: &TargetSpec) -> Result<Self, ConfigError> {
        let mut target = Self::new(index, spec.host())?;
        if let TargetSpec::Detailed {
            probe_path,
            max_requests,
            ..
        } = spec
        {
            target.probe_path = probe_path.clone();
            target.max_requests = *max_requests;
        }
        Ok(target)
    }

    /// Host without the trailing slash, as used for display and lookups.
    pub fn key(&self) -> &str {
        self.host.as_str().trim_end_matches('/')
    }

    /// Absolute URI for `path` on this target.
    pub fn uri_for(&self, path: &str, query: Option<&str>) -> Result<Uri, ConfigError> {
        join_uri(&self.host, path, query)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Ordered, immutable set of targets.
#[derive(Debug, Clone)]
pub struct TargetPool {
    targets: Arc<[Arc<Target>]>,
    personalized: bool,
}

impl TargetPool {
    /// Build a pool from configured specs. Fails on an empty list or a bad host.
    pub fn from_specs(specs: &[TargetSpec]) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let targets = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| Target::from_spec(i, spec).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let personalized = specs.iter().any(|s| matches!(s, TargetSpec::Detailed { .. }));

        Ok(Self {
            targets: targets.into(),
            personalized,
        })
    }

    /// Build a pool from plain host strings.
    pub fn from_hosts<S: AsRef<str>>(hosts: &[S]) -> Result<Self, ConfigError> {
        let specs: Vec<TargetSpec> = hosts.iter().map(|h| TargetSpec::from(h.as_ref())).collect();
        Self::from_specs(&specs)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Target>> {
        self.targets.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.targets.iter()
    }

    /// True when any target was configured with its own settings.
    pub fn is_personalized(&self) -> bool {
        self.personalized
    }

    /// Look up a target by host, accepting the same forms as the config.
    pub fn find(&self, host: &str) -> Option<&Arc<Target>> {
        let url = parse_host(host).ok()?;
        self.targets.iter().find(|t| t.host == url)
    }
}

/// Normalize a host string into a base URL.
///
/// A missing scheme defaults to `http`. Only plain-text schemes are accepted;
/// `ws://` hosts are stored as `http://`.
pub fn parse_host(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let mut url = Url::parse(&candidate).map_err(|e| ConfigError::InvalidTarget {
        host: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" => {}
        // Stored as http; the WebSocket path switches the scheme back.
        "ws" => {
            let _ = url.set_scheme("http");
        }
        other => {
            return Err(ConfigError::InvalidTarget {
                host: raw.to_string(),
                reason: format!("unsupported scheme {other:?}"),
            })
        }
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidTarget {
            host: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

/// Join a base URL and a request path, optionally appending a query string.
///
/// `http://b` + `/x` + `a=1` → `http://b/x?a=1`. When the joined URL already
/// carries a query, the extra one is appended with `&`.
pub fn join_uri(base: &Url, path: &str, query: Option<&str>) -> Result<Uri, ConfigError> {
    let mut joined = base.as_str().trim_end_matches('/').to_string();
    if !path.starts_with('/') {
        joined.push('/');
    }
    joined.push_str(path);

    if let Some(query) = query.filter(|q| !q.is_empty()) {
        joined.push(if joined.contains('?') { '&' } else { '?' });
        joined.push_str(query);
    }

    joined.parse::<Uri>().map_err(|e| ConfigError::InvalidTarget {
        host: joined.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_hosts() {
        assert_eq!(parse_host("localhost:8080").unwrap().as_str(), "http://localhost:8080/");
        assert_eq!(parse_host("http://b").unwrap().as_str(), "http://b/");
        assert_eq!(parse_host("ws://b:9000").unwrap().as_str(), "http://b:9000/");
        assert!(parse_host("https://secure").is_err());
        assert!(parse_host("ftp://files").is_err());
    }

    #[test]
    fn joins_path_and_query() {
        let base = parse_host("http://b").unwrap();
        assert_eq!(join_uri(&base, "/x", Some("a=1")).unwrap().to_string(), "http://b/x?a=1");
        assert_eq!(join_uri(&base, "/x", None).unwrap().to_string(), "http://b/x");
        assert_eq!(join_uri(&base, "x", Some("")).unwrap().to_string(), "http://b/x");

        let prefixed = parse_host("http://b/api/").unwrap();
        assert_eq!(join_uri(&prefixed, "/v1?k=v", Some("a=1")).unwrap().to_string(), "http://b/api/v1?k=v&a=1");
    }

    #[test]
    fn pool_tracks_personalization() {
        let plain = TargetPool::from_hosts(&["a:1", "b:2"]).unwrap();
        assert!(!plain.is_personalized());
        assert_eq!(plain.get(1).unwrap().key(), "http://b:2");

        let detailed = TargetPool::from_specs(&[
            TargetSpec::from("a:1"),
            TargetSpec::Detailed {
                host: "b:2".into(),
                probe_path: Some("/health".into()),
                max_requests: Some(4),
            },
        ])
        .unwrap();
        assert!(detailed.is_personalized());
        assert_eq!(detailed.find("http://b:2").unwrap().max_requests, Some(4));
    }

    #[test]
    fn empty_pool_rejected() {
        let hosts: [&str; 0] = [];
        assert!(matches!(TargetPool::from_hosts(&hosts), Err(ConfigError::NoTargets)));
    }
}
