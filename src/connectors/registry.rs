//! Vendor registry
//!
//! The closed set of supported SIS vendors and the factory that builds a
//! connector for one of them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VendorClientConfig;
use crate::connectors::SisConnector;
use crate::connectors::credentials::SisCredentials;
use crate::connectors::error::ConnectorError;
use crate::connectors::infinite_campus::InfiniteCampusConnector;
use crate::connectors::powerschool::PowerSchoolConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SisVendor {
    #[serde(rename = "powerschool")]
    PowerSchool,
    InfiniteCampus,
}

impl SisVendor {
    pub const ALL: [SisVendor; 2] = [SisVendor::PowerSchool, SisVendor::InfiniteCampus];

    /// Matches case-insensitively, ignoring `-`, `_` and spaces.
    pub fn parse(raw: &str) -> Result<Self, ConnectorError> {
        let key: String = raw
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "powerschool" => Ok(Self::PowerSchool),
            "infinitecampus" => Ok(Self::InfiniteCampus),
            _ => Err(ConnectorError::UnsupportedVendor(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PowerSchool => "powerschool",
            Self::InfiniteCampus => "infinite_campus",
        }
    }

    /// Documented vendor quota.
    pub fn requests_per_minute(&self) -> u32 {
        match self {
            Self::PowerSchool => 120,
            Self::InfiniteCampus => 90,
        }
    }

    /// Token endpoint relative to the base URL, used when credentials carry no `tokenUrl`.
    pub fn token_path(&self) -> &'static str {
        match self {
            Self::PowerSchool => "oauth/access_token",
            Self::InfiniteCampus => "oauth/token",
        }
    }

    pub fn api_key_header(&self) -> &'static str {
        match self {
            Self::PowerSchool => "x-api-key",
            Self::InfiniteCampus => "X-API-Key",
        }
    }
}

impl fmt::Display for SisVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SisVendor {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Builds connectors from stored credentials.
#[derive(Debug, Clone, Default)]
pub struct ConnectorFactory {
    config: VendorClientConfig,
}

impl ConnectorFactory {
    pub fn new(config: VendorClientConfig) -> Self {
        Self { config }
    }

    /// Resolves `credentials.vendor` and constructs its connector.
    ///
    /// An unknown vendor is [`ConnectorError::UnsupportedVendor`], which is
    /// never retried.
    pub fn build(&self, credentials: &SisCredentials) -> Result<Arc<dyn SisConnector>, ConnectorError> {
        let vendor = SisVendor::parse(&credentials.vendor)?;
        debug!(vendor = vendor.as_str(), auth_type = ?credentials.auth_type, "building SIS connector");
        let connector: Arc<dyn SisConnector> = match vendor {
            SisVendor::PowerSchool => {
                Arc::new(PowerSchoolConnector::new(credentials, &self.config)?)
            }
            SisVendor::InfiniteCampus => {
                Arc::new(InfiniteCampusConnector::new(credentials, &self.config)?)
            }
        };
        Ok(connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::credentials::AuthType;

    fn credentials(vendor: &str) -> SisCredentials {
        SisCredentials {
            vendor: vendor.into(),
            base_url: "https://sis.example.org".into(),
            auth_type: AuthType::OAuth2,
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            token_url: None,
            api_key_header: None,
        }
    }

    #[test]
    fn vendor_ids_are_matched_loosely() {
        assert_eq!(SisVendor::parse("PowerSchool").unwrap(), SisVendor::PowerSchool);
        assert_eq!(SisVendor::parse("power-school").unwrap(), SisVendor::PowerSchool);
        assert_eq!(SisVendor::parse("infinite_campus").unwrap(), SisVendor::InfiniteCampus);
        assert_eq!(SisVendor::parse("Infinite Campus").unwrap(), SisVendor::InfiniteCampus);
        assert_eq!(SisVendor::parse("INFINITE-CAMPUS").unwrap(), SisVendor::InfiniteCampus);
    }

    #[test]
    fn factory_builds_each_vendor() {
        let factory = ConnectorFactory::default();
        for vendor in SisVendor::ALL {
            let connector = factory.build(&credentials(vendor.as_str())).unwrap();
            assert_eq!(connector.vendor(), vendor);
        }
    }

    #[test]
    fn unsupported_vendor_is_fatal() {
        let err = ConnectorFactory::default()
            .build(&credentials("skyward"))
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::UnsupportedVendor(ref v) if v == "skyward"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn quotas_match_vendor_documentation() {
        assert_eq!(SisVendor::PowerSchool.requests_per_minute(), 120);
        assert_eq!(SisVendor::InfiniteCampus.requests_per_minute(), 90);
    }
}
