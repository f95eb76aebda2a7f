//! Manifest response parsing.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::ProtocolError;
use crate::package::{Action, InvalidRecord, PackageRef, UpdateRecord};

/// Prefix of the managed flag at the start of a response.
const MANAGED_PREFIX: &str = "managed=";

/// A validated manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestResponse {
    /// Whether the device is centrally managed.
    pub managed: bool,

    /// Valid package descriptors, in server order.
    pub packages: Vec<UpdateRecord>,

    /// Names of packages whose descriptors were skipped as invalid.
    pub rejected: Vec<String>,
}

impl ManifestResponse {
    /// Whether the manifest names a package, valid or not.
    pub fn mentions(&self, name: &str) -> bool {
        self.packages.iter().any(|p| p.is(name)) || self.rejected.iter().any(|r| r == name)
    }
}

/// Number or string, as loosely typed servers send them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn as_text(&self) -> String {
        match self {
            Self::Integer(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Float(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// One array element as sent by the server.
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    package: String,
    release: Scalar,
    name: String,
    ver: Scalar,
    url: String,
    action: String,
}

#[derive(Debug, Error)]
enum DescriptorError {
    #[error("{0}")]
    Fields(#[from] serde_json::Error),

    #[error("version '{0}' is not an integer")]
    Version(String),

    #[error("{0}")]
    Invalid(#[from] InvalidRecord),
}

impl RawDescriptor {
    fn into_record(self) -> Result<UpdateRecord, DescriptorError> {
        let version = self
            .ver
            .as_integer()
            .ok_or_else(|| DescriptorError::Version(self.ver.as_text()))?;
        let version = UpdateRecord::version_from_i64(version)?;

        let record = UpdateRecord::new(
            PackageRef::new(self.package, self.name),
            self.release.as_text(),
            version,
            self.url,
            Action::from_manifest(&self.action),
        )?;
        Ok(record)
    }
}

fn parse_descriptor(element: Value) -> Result<UpdateRecord, DescriptorError> {
    let raw: RawDescriptor = serde_json::from_value(element)?;
    raw.into_record()
}

/// Parse a `managed=<0|1>,<JSON array>` response.
///
/// Errors in the outer shape reject the whole manifest. Elements that are
/// missing fields or fail validation are logged and skipped; their package
/// names (when readable) are kept in [`ManifestResponse::rejected`].
///
/// # Example
///
/// ```
/// use fleetup::manifest::parse_manifest;
///
/// let body = r#"managed=1,[{"package":"org.example.app","release":"2.0",
///     "name":"Example","ver":2,"url":"https://u.example.org/a.pkg","action":"update"}]"#;
/// let manifest = parse_manifest(body).unwrap();
///
/// assert!(manifest.managed);
/// assert_eq!(manifest.packages[0].version, 2);
/// ```
pub fn parse_manifest(body: &str) -> Result<ManifestResponse, ProtocolError> {
    let body = body.trim();
    let (head, array) = body
        .split_once(',')
        .ok_or_else(|| ProtocolError::InvalidShape("missing ',' after managed flag".into()))?;

    let flag = head
        .trim()
        .strip_prefix(MANAGED_PREFIX)
        .ok_or_else(|| ProtocolError::InvalidShape(format!("expected '{}'", MANAGED_PREFIX)))?;
    let managed = match flag {
        "0" => false,
        "1" => true,
        other => return Err(ProtocolError::InvalidManagedFlag(other.to_string())),
    };

    let elements: Vec<Value> = serde_json::from_str(array.trim())?;

    let mut manifest = ManifestResponse {
        managed,
        ..Default::default()
    };
    for (index, element) in elements.into_iter().enumerate() {
        let name = element
            .get("package")
            .and_then(Value::as_str)
            .map(str::to_string);

        match parse_descriptor(element) {
            Ok(record) => manifest.packages.push(record),
            Err(e) => {
                tracing::warn!(
                    index,
                    package = name.as_deref().unwrap_or("<unknown>"),
                    error = %e,
                    "Skipping invalid manifest entry"
                );
                manifest.rejected.extend(name);
            }
        }
    }

    tracing::debug!(
        managed,
        packages = manifest.packages.len(),
        rejected = manifest.rejected.len(),
        "Parsed manifest"
    );
    Ok(manifest)
}
