//! Backend token endpoint client.
//!
//! One GET to `<backend>/api/token` exchanges a backend origin for a
//! short-lived `{token, url}` pair. The call is idempotent and never retried
//! here — manual retry is a supported UX path, so failures come back as a
//! typed [`CredentialError`] the caller can branch on.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Short-lived token + transport URL pair minted by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCredential {
    pub token: String,
    #[serde(rename = "url")]
    pub transport_url: String,
}

/// Why a credential could not be obtained.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The backend exists but has no token endpoint (404).
    #[error("token endpoint not found")]
    NotFound,
    /// The backend is booting (502/503); retry shortly.
    #[error("backend is still warming up")]
    WarmingUp,
    /// Any other non-2xx status.
    #[error("token endpoint returned HTTP {0}")]
    ServerError(u16),
    /// 2xx but the body is not a usable `{token, url}` pair.
    #[error("token response is missing token or url")]
    InvalidResponse,
    /// The request never produced an HTTP response.
    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

/// Normalize a user-supplied backend origin: prepend `https://` when the
/// scheme is missing, strip any trailing slash.
pub fn normalize_base_url(input: &str) -> String {
    let mut url = input.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("https://{url}");
    }
    while url.ends_with('/') {
        url.pop();
    }
    url
}

/// Rewrite a hosted-space page URL to the space's serving subdomain:
/// `https://huggingface.co/spaces/<owner>/<name>` becomes
/// `https://<owner>-<name>.hf.space`. Pure string transform; URLs that do
/// not match the pattern pass through untouched.
pub fn rewrite_space_url(url: &str) -> String {
    let rest = url
        .strip_prefix("https://huggingface.co/spaces/")
        .or_else(|| url.strip_prefix("http://huggingface.co/spaces/"))
        .or_else(|| url.strip_prefix("https://www.huggingface.co/spaces/"));
    let Some(rest) = rest else {
        return url.to_string();
    };
    let mut parts = rest.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
            let name = name.trim_end_matches('/');
            // Deeper paths point inside the space, not at its root.
            if name.is_empty() || name.contains('/') {
                return url.to_string();
            }
            format!("https://{owner}-{name}.hf.space")
        }
        _ => url.to_string(),
    }
}

/// Normalize + space rewrite in one step: what `connect` actually feeds to
/// [`fetch_credential`].
pub fn resolve_backend_url(input: &str) -> String {
    rewrite_space_url(&normalize_base_url(input))
}

/// Exchange a backend origin for a session credential.
pub async fn fetch_credential(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<SessionCredential, CredentialError> {
    let endpoint = format!("{base_url}/api/token");
    debug!(endpoint = %endpoint, "Requesting session credential");

    let resp = client
        .get(&endpoint)
        .send()
        .await
        .map_err(|e| CredentialError::Unreachable(e.to_string()))?;

    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| CredentialError::Unreachable(e.to_string()))?;

    credential_from_response(status, &body)
}

/// Pure classification of the token endpoint's response.
pub fn credential_from_response(
    status: StatusCode,
    body: &[u8],
) -> Result<SessionCredential, CredentialError> {
    match status.as_u16() {
        200..=299 => {}
        404 => return Err(CredentialError::NotFound),
        502 | 503 => return Err(CredentialError::WarmingUp),
        code => return Err(CredentialError::ServerError(code)),
    }

    let cred: SessionCredential =
        serde_json::from_slice(body).map_err(|_| CredentialError::InvalidResponse)?;
    if cred.token.is_empty() || cred.transport_url.is_empty() {
        return Err(CredentialError::InvalidResponse);
    }
    Ok(cred)
}
