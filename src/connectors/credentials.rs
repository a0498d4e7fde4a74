//! SIS credentials as stored in district settings under `sisCredentials`.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::ConnectorError;

/// Authentication scheme used against the vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// OAuth2 client-credentials grant with a cached bearer token
    #[serde(rename = "oauth2", alias = "oauth")]
    OAuth2,
    /// Static key sent in a vendor-specific header
    #[serde(rename = "api_key", alias = "apiKey")]
    ApiKey,
    /// HTTP Basic with `clientId` as username and `clientSecret` as password
    #[serde(rename = "basic")]
    Basic,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SisCredentials {
    /// Vendor identifier, resolved by the connector factory
    pub vendor: String,
    pub base_url: String,
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Overrides the vendor's default token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// Overrides the vendor's default API key header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
}

impl SisCredentials {
    /// Parsed base URL with a trailing slash so relative joins keep any path prefix.
    pub fn base_url(&self) -> Result<Url, ConnectorError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|err| {
            ConnectorError::Configuration(format!("invalid SIS base URL '{}': {err}", self.base_url))
        })
    }

    /// Checks that the fields required by the chosen auth scheme are present.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        self.base_url()?;
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        let missing = match self.auth_type {
            AuthType::OAuth2 | AuthType::Basic if !present(&self.client_id) => Some("clientId"),
            AuthType::OAuth2 | AuthType::Basic | AuthType::ApiKey
                if !present(&self.client_secret) =>
            {
                Some("clientSecret")
            }
            _ => None,
        };
        match missing {
            Some(field) => Err(ConnectorError::Configuration(format!(
                "SIS credentials for {} are missing {field}",
                self.vendor
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SisCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SisCredentials")
            .field("vendor", &self.vendor)
            .field("base_url", &self.base_url)
            .field("auth_type", &self.auth_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_district_settings_shape() {
        let creds: SisCredentials = serde_json::from_value(json!({
            "vendor": "powerschool",
            "baseUrl": "https://ps.example.org",
            "authType": "oauth2",
            "clientId": "id",
            "clientSecret": "secret"
        }))
        .unwrap();
        assert_eq!(creds.auth_type, AuthType::OAuth2);
        assert!(creds.validate().is_ok());
        assert_eq!(creds.base_url().unwrap().as_str(), "https://ps.example.org/");
    }

    #[test]
    fn api_key_requires_secret_only() {
        let creds: SisCredentials = serde_json::from_value(json!({
            "vendor": "infinite_campus",
            "baseUrl": "https://ic.example.org/campus",
            "authType": "apiKey",
            "clientSecret": "key"
        }))
        .unwrap();
        assert!(creds.validate().is_ok());
        assert_eq!(
            creds.base_url().unwrap().join("api/v1/students/1").unwrap().as_str(),
            "https://ic.example.org/campus/api/v1/students/1"
        );
    }

    #[test]
    fn oauth_without_client_id_is_rejected() {
        let creds = SisCredentials {
            vendor: "powerschool".into(),
            base_url: "https://ps.example.org".into(),
            auth_type: AuthType::OAuth2,
            client_id: None,
            client_secret: Some("secret".into()),
            token_url: None,
            api_key_header: None,
        };
        let err = creds.validate().unwrap_err();
        assert!(err.to_string().contains("clientId"));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let creds = SisCredentials {
            vendor: "powerschool".into(),
            base_url: "https://ps.example.org".into(),
            auth_type: AuthType::Basic,
            client_id: Some("user".into()),
            client_secret: Some("hunter2".into()),
            token_url: None,
            api_key_header: None,
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
