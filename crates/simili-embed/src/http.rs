//! Shared HTTP client construction for the embedding backends.

use std::time::Duration;

/// Create an HTTP client with the given per-request timeout.
///
/// Config: 5s connect timeout, `simili/{version}` user-agent, no redirects.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(request_timeout)
        .user_agent(concat!("simili/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .build()
}
