//! Plumbing shared by the HTTP backends.

use crate::error::{ProviderError, Res};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::trace;
use url::Url;

const USER_AGENT: &str = concat!("spendlens/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 500;

/// Reads the API key from the named environment variable.
pub(super) fn api_key(env_var: Option<&str>) -> Res<Option<String>> {
    let Some(name) = env_var else {
        return Ok(None);
    };
    let key = std::env::var(name)
        .with_context(|| format!("The environment variable {name} must hold the API key"))?;
    Ok(Some(key))
}

pub(super) fn client(timeout_secs: u64) -> Res<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Unable to build the HTTP client")
}

/// Joins `path` onto `base`, keeping any path the base already has, e.g. `/v1`.
pub(super) fn endpoint(base: &str, path: &str) -> Res<Url> {
    let mut base = Url::parse(base).with_context(|| format!("Invalid base URL '{base}'"))?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .with_context(|| format!("Unable to build the URL for '{path}'"))
}

/// POSTs `body` as JSON and decodes the JSON response.
pub(super) async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &Url,
    bearer: Option<&str>,
    body: &B,
) -> Result<R, ProviderError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    trace!("POST {url}");
    let mut request = client.post(url.clone()).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))
}
