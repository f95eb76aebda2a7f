//! Manifest client over HTTPS.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{redirect, Proxy, Url};

use super::parse::{parse_manifest, ManifestResponse};
use super::request::ManifestRequest;
use crate::error::ProtocolError;

/// Default timeout for manifest requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum redirects followed, each checked against the allow-list.
const MAX_REDIRECTS: usize = 5;

/// Source of manifests.
///
/// # Implementors
///
/// - [`HttpManifestClient`]: HTTPS request to the update server
/// - test fakes returning canned manifests
pub trait ManifestSource: Send + Sync {
    /// Request the manifest for the given device state.
    fn fetch_manifest(&self, request: &ManifestRequest) -> Result<ManifestResponse, ProtocolError>;
}

/// Hosts the client is allowed to contact.
///
/// A host is permitted when it equals an entry or is a subdomain of one.
///
/// # Example
///
/// ```
/// use fleetup::manifest::HostAllowList;
///
/// let allow = HostAllowList::new(["example.org"]);
/// assert!(allow.permits("updates.example.org"));
/// assert!(!allow.permits("example.org.evil.net"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAllowList {
    hosts: Vec<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Whether `host` may be contacted.
    pub fn permits(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Check the host of a URL.
    pub fn check(&self, url: &Url) -> Result<(), ProtocolError> {
        match url.host_str() {
            Some(host) if self.permits(host) => Ok(()),
            Some(host) => Err(ProtocolError::HostNotAllowed(host.to_string())),
            None => Err(ProtocolError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            }),
        }
    }
}

/// Settings for [`HttpManifestClient`].
#[derive(Debug, Clone)]
pub struct ManifestClientConfig {
    /// Base URL the device id is appended to.
    pub url: String,
    /// Permitted hosts; empty means only the base URL's host.
    pub allowed_hosts: Vec<String>,
    /// Optional HTTP(S) proxy.
    pub proxy: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl ManifestClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            allowed_hosts: Vec::new(),
            proxy: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_allowed_hosts(mut self, hosts: Vec<String>) -> Self {
        self.allowed_hosts = hosts;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Blocking HTTPS manifest client.
///
/// Only HTTPS is used, and only hosts on the allow-list are contacted,
/// including redirect targets.
#[derive(Debug)]
pub struct HttpManifestClient {
    client: Client,
    base_url: Url,
    allow: HostAllowList,
}

impl HttpManifestClient {
    pub fn new(config: &ManifestClientConfig) -> Result<Self, ProtocolError> {
        let base_url = Url::parse(&config.url).map_err(|e| ProtocolError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        let allow = if config.allowed_hosts.is_empty() {
            HostAllowList::new(base_url.host_str())
        } else {
            HostAllowList::new(&config.allowed_hosts)
        };
        allow.check(&base_url)?;

        let redirect_allow = allow.clone();
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            let host = attempt.url().host_str().map(str::to_owned);
            match host.as_deref() {
                Some(host) if redirect_allow.permits(host) => attempt.follow(),
                Some(host) => attempt.error(format!("redirect to disallowed host '{}'", host)),
                None => attempt.error("redirect without host"),
            }
        });

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .https_only(true)
            .redirect(policy);
        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy).map_err(|e| ProtocolError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ProtocolError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            allow,
        })
    }

    /// Base URL requests are built from.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl ManifestSource for HttpManifestClient {
    fn fetch_manifest(&self, request: &ManifestRequest) -> Result<ManifestResponse, ProtocolError> {
        let url = request.to_url(&self.base_url)?;
        self.allow.check(&url)?;

        tracing::info!(
            host = url.host_str().unwrap_or_default(),
            device = %request.device_id,
            packages = request.packages.len(),
            "Requesting manifest"
        );

        let request_failed = |e: reqwest::Error| ProtocolError::Request {
            url: self.base_url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().map_err(request_failed)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Status {
                url: self.base_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().map_err(request_failed)?;
        parse_manifest(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_exact_and_subdomain() {
        let allow = HostAllowList::new(["Example.org", ".nexus.example.net", " "]);
        assert!(allow.permits("example.org"));
        assert!(allow.permits("EXAMPLE.ORG."));
        assert!(allow.permits("a.b.example.org"));
        assert!(allow.permits("nexus.example.net"));
        assert!(!allow.permits("badexample.org"));
        assert!(!allow.permits("example.net"));
    }

    #[test]
    fn test_empty_allow_list_permits_nothing() {
        let allow = HostAllowList::default();
        assert!(allow.is_empty());
        assert!(!allow.permits("example.org"));
    }

    #[test]
    fn test_check_rejects_other_host() {
        let allow = HostAllowList::new(["example.org"]);
        let url = Url::parse("https://example.com/get/").unwrap();
        assert!(matches!(
            allow.check(&url),
            Err(ProtocolError::HostNotAllowed(h)) if h == "example.com"
        ));
    }

    #[test]
    fn test_client_defaults_allow_list_to_base_host() {
        let client =
            HttpManifestClient::new(&ManifestClientConfig::new("https://updates.example.org/get/"))
                .unwrap();
        assert!(client.allow.permits("updates.example.org"));
        assert!(!client.allow.permits("example.org"));
    }

    #[test]
    fn test_client_rejects_base_url_outside_allow_list() {
        let config = ManifestClientConfig::new("https://updates.example.com/get/")
            .with_allowed_hosts(vec!["example.org".to_string()]);
        assert!(matches!(
            HttpManifestClient::new(&config),
            Err(ProtocolError::HostNotAllowed(_))
        ));
    }

    #[test]
    fn test_client_rejects_invalid_url() {
        assert!(matches!(
            HttpManifestClient::new(&ManifestClientConfig::new("not a url")),
            Err(ProtocolError::InvalidUrl { .. })
        ));
    }
}
