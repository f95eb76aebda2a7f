//! Manifest request construction.

use std::collections::BTreeMap;

use reqwest::Url;
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Version sent for a managed package that is not installed.
const NOT_INSTALLED: i64 = -1;

/// One manifest request: the device identity plus the installed version of
/// every managed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRequest {
    /// Device identifier, sent as the last path segment.
    pub device_id: String,

    /// Device group.
    pub group: String,

    /// Managed package name to installed version (`None` when not installed).
    pub packages: BTreeMap<String, Option<u32>>,
}

impl ManifestRequest {
    /// Create a request with no packages.
    pub fn new(device_id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            group: group.into(),
            packages: BTreeMap::new(),
        }
    }

    /// Add a managed package and its installed version.
    pub fn with_package(mut self, name: impl Into<String>, installed: Option<u32>) -> Self {
        self.packages.insert(name.into(), installed);
        self
    }

    /// The `packages` parameter: a JSON object of name to version or `-1`.
    pub fn packages_json(&self) -> String {
        let map: Map<String, Value> = self
            .packages
            .iter()
            .map(|(name, version)| {
                let version = version.map(i64::from).unwrap_or(NOT_INSTALLED);
                (name.clone(), Value::from(version))
            })
            .collect();
        Value::Object(map).to_string()
    }

    /// Build the request URL under `base`.
    ///
    /// The device id is appended as a path segment and the query parameters
    /// are percent-encoded.
    pub fn to_url(&self, base: &Url) -> Result<Url, ProtocolError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| ProtocolError::InvalidUrl {
                url: base.to_string(),
                reason: "cannot append a path segment".to_string(),
            })?
            .pop_if_empty()
            .push(&self.device_id);
        url.query_pairs_mut()
            .clear()
            .append_pair("packages", &self.packages_json())
            .append_pair("group", &self.group);
        Ok(url)
    }
}
