use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;

use crate::{BlobError, BlobResult, StorageClient};

/// Local emulator endpoint used by `UseDevelopmentStorage=true`
pub const DEVELOPMENT_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// How the uploader authenticates against the storage account
#[derive(Clone, Serialize, Deserialize)]
pub enum ConnectionMethod {
    /// Account connection string
    ConnectionString(String),
    /// Account base URI plus a shared access signature
    SasToken { uri: String, sas_token: String },
    /// OAuth2 client-credential exchange
    OAuth2 {
        tenant_id: String,
        application_id: String,
        client_secret: String,
        storage_account_name: String,
    },
}

impl ConnectionMethod {
    pub fn connection_string<S: Into<String>>(value: S) -> Self {
        Self::ConnectionString(value.into())
    }

    pub fn sas_token<U: Into<String>, T: Into<String>>(uri: U, sas_token: T) -> Self {
        Self::SasToken {
            uri: uri.into(),
            sas_token: sas_token.into(),
        }
    }

    pub fn oauth2<T, A, C, S>(
        tenant_id: T,
        application_id: A,
        client_secret: C,
        storage_account_name: S,
    ) -> Self
    where
        T: Into<String>,
        A: Into<String>,
        C: Into<String>,
        S: Into<String>,
    {
        Self::OAuth2 {
            tenant_id: tenant_id.into(),
            application_id: application_id.into(),
            client_secret: client_secret.into(),
            storage_account_name: storage_account_name.into(),
        }
    }

    /// Load from the environment.
    ///
    /// `AZURE_STORAGE_CONNECTION_STRING` wins, then `AZURE_STORAGE_SAS_URI`
    /// with `AZURE_STORAGE_SAS_TOKEN`. Otherwise the OAuth2 triple
    /// `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET` plus
    /// `AZURE_STORAGE_ACCOUNT` is required.
    pub fn from_env() -> BlobResult<Self> {
        fn get_env(key: &str) -> BlobResult<String> {
            env::var(key)
                .map_err(|_| BlobError::config(format!("{} environment variable required", key)))
        }

        if let Ok(value) = env::var("AZURE_STORAGE_CONNECTION_STRING") {
            return Ok(Self::ConnectionString(value));
        }
        if let Ok(uri) = env::var("AZURE_STORAGE_SAS_URI") {
            return Ok(Self::SasToken {
                uri,
                sas_token: get_env("AZURE_STORAGE_SAS_TOKEN")?,
            });
        }

        Ok(Self::OAuth2 {
            tenant_id: get_env("AZURE_TENANT_ID")?,
            application_id: get_env("AZURE_CLIENT_ID")?,
            client_secret: get_env("AZURE_CLIENT_SECRET")?,
            storage_account_name: get_env("AZURE_STORAGE_ACCOUNT")?,
        })
    }

    /// Fail fast on absent or contradictory parameters
    pub fn validate(&self) -> BlobResult<()> {
        match self {
            Self::ConnectionString(value) => {
                if value.trim().is_empty() {
                    return Err(BlobError::config(
                        "Connection string can't be empty when the connection method is ConnectionString",
                    ));
                }
                self.blob_endpoint().map(|_| ())
            }
            Self::SasToken { uri, sas_token } => {
                if uri.trim().is_empty() || sas_token.trim().is_empty() {
                    return Err(BlobError::config(
                        "uri and sas_token can't be empty when the connection method is SasToken",
                    ));
                }
                let scheme_ok = uri.starts_with("https://") || uri.starts_with("http://");
                if !scheme_ok {
                    return Err(BlobError::config(format!(
                        "SAS uri '{}' must start with http:// or https://",
                        uri
                    )));
                }
                Ok(())
            }
            Self::OAuth2 {
                tenant_id,
                application_id,
                client_secret,
                storage_account_name,
            } => {
                let missing: Vec<&str> = [
                    ("storage_account_name", storage_account_name),
                    ("client_secret", client_secret),
                    ("application_id", application_id),
                    ("tenant_id", tenant_id),
                ]
                .into_iter()
                .filter(|(_, value)| value.trim().is_empty())
                .map(|(name, _)| name)
                .collect();

                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(BlobError::config(format!(
                        "{} can't be empty when the connection method is OAuth2",
                        missing.join(", ")
                    )))
                }
            }
        }
    }

    /// Base URL of the account's blob service, without a trailing slash
    pub fn blob_endpoint(&self) -> BlobResult<String> {
        match self {
            Self::ConnectionString(value) => parse_blob_endpoint(value),
            Self::SasToken { uri, .. } => Ok(uri.trim().trim_end_matches('/').to_string()),
            Self::OAuth2 {
                storage_account_name,
                ..
            } => Ok(format!("https://{}.blob.core.windows.net", storage_account_name)),
        }
    }
}

impl std::fmt::Debug for ConnectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionString(_) => f.write_str("ConnectionString(<redacted>)"),
            Self::SasToken { uri, .. } => f
                .debug_struct("SasToken")
                .field("uri", uri)
                .field("sas_token", &"<redacted>")
                .finish(),
            Self::OAuth2 {
                tenant_id,
                application_id,
                storage_account_name,
                ..
            } => f
                .debug_struct("OAuth2")
                .field("tenant_id", tenant_id)
                .field("application_id", application_id)
                .field("client_secret", &"<redacted>")
                .field("storage_account_name", storage_account_name)
                .finish(),
        }
    }
}

fn parse_blob_endpoint(connection_string: &str) -> BlobResult<String> {
    let mut account_name = None;
    let mut protocol = "https";
    let mut suffix = "core.windows.net";
    let mut blob_endpoint = None;
    let mut development = false;

    for part in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            BlobError::config(format!(
                "Malformed connection string segment '{}'",
                redact_segment(part)
            ))
        })?;
        match key.trim() {
            "AccountName" => account_name = Some(value.trim()),
            "DefaultEndpointsProtocol" => protocol = value.trim(),
            "EndpointSuffix" => suffix = value.trim(),
            "BlobEndpoint" => blob_endpoint = Some(value.trim()),
            "UseDevelopmentStorage" => development = value.trim().eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    if let Some(endpoint) = blob_endpoint {
        return Ok(endpoint.trim_end_matches('/').to_string());
    }
    if development {
        return Ok(DEVELOPMENT_BLOB_ENDPOINT.to_string());
    }
    match account_name {
        Some(account) if !account.is_empty() => {
            Ok(format!("{}://{}.blob.{}", protocol, account, suffix))
        }
        _ => Err(BlobError::config(
            "Connection string must contain AccountName, BlobEndpoint or UseDevelopmentStorage=true",
        )),
    }
}

fn redact_segment(segment: &str) -> &str {
    segment.split('=').next().unwrap_or_default()
}

/// Turns a connection method into an authenticated storage client.
///
/// Failures surface as configuration errors before any upload starts.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, method: &ConnectionMethod) -> BlobResult<Arc<dyn StorageClient>>;
}
