//! HTTP plumbing shared by the feed retriever and the discovery crawler.

use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::util::{validate_url, UrlValidationError};

/// Upper bound on connection establishment, independent of per-call budgets.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error)]
pub(crate) enum BodyError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Response too large")]
    TooLarge,
}

/// Why a redirect was refused.
#[derive(Debug, Error)]
pub(crate) enum RedirectError {
    #[error("Too many redirects (max {MAX_REDIRECTS})")]
    TooMany,
    #[error("Redirect loop detected")]
    Loop,
    #[error("Redirect target rejected: {0}")]
    Blocked(#[from] UrlValidationError),
}

/// Build a client with the given User-Agent and optional proxy.
///
/// Every redirect hop is held to the same URL rules as the first request,
/// so `allow_private` decides whether a redirect may land on a local address.
///
/// # Errors
///
/// Fails if the proxy URL cannot be parsed or the TLS backend fails to initialize.
pub fn build_client(
    user_agent: &str,
    proxy: Option<&str>,
    allow_private: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(redirect_policy(allow_private));

    if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    builder.build()
}

fn redirect_policy(allow_private: bool) -> Policy {
    Policy::custom(move |attempt| {
        match check_redirect(attempt.url(), attempt.previous(), allow_private) {
            Ok(()) => {
                tracing::debug!(
                    from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
                    to = %attempt.url(),
                    hop = attempt.previous().len(),
                    "Following redirect"
                );
                attempt.follow()
            }
            Err(e) => {
                tracing::debug!(to = %attempt.url(), error = %e, "Refusing redirect");
                attempt.error(e)
            }
        }
    })
}

/// Decide whether to follow a redirect to `next`.
///
/// `previous` holds the URLs already requested, starting with the original one.
pub(crate) fn check_redirect(
    next: &Url,
    previous: &[Url],
    allow_private: bool,
) -> Result<(), RedirectError> {
    if previous.len() > MAX_REDIRECTS {
        return Err(RedirectError::TooMany);
    }
    if previous.iter().any(|prev| prev == next) {
        return Err(RedirectError::Loop);
    }
    validate_url(next.as_str(), allow_private)?;
    Ok(())
}

/// Read a response body, refusing anything larger than `limit` bytes.
///
/// A declared Content-Length over the limit fails before any byte is read;
/// otherwise the stream is accumulated and cut off as soon as it crosses the limit.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(BodyError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
