//! Shared HTTP plumbing for all adapters

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use super::error::{ProviderError, Result};

/// Shared HTTP client for all adapter requests (connection pooling).
/// Redirects are disabled so bearer tokens never follow a redirect off-host.
static SHARED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("Failed to build shared HTTP client")
});

/// Clone of the shared pooled client.
#[must_use]
pub fn shared_client() -> Client {
    SHARED_CLIENT.clone()
}

/// Map an unexpected status to a `ProviderError`, reading a bounded slice
/// of the body for the message.
pub async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound);
    }
    let message = response
        .text()
        .await
        .map(|body| body.chars().take(512).collect::<String>())
        .unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Join a base URL and a path without doubling slashes.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(
            join_url("http://host:32400/", "/library/sections"),
            "http://host:32400/library/sections"
        );
        assert_eq!(
            join_url("http://host:32400", "library/sections"),
            "http://host:32400/library/sections"
        );
    }
}
