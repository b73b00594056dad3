//! HTTP plumbing shared by the source adapters
//!
//! This module handles:
//! - Building HTTP clients with the configured user agent and timeout
//! - GET requests for listing and detail pages
//! - Mapping transport failures and status codes onto `PageError`

use crate::config::UserAgentConfig;
use crate::source::PageError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Builds an HTTP client for one source
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout for this source
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a page body as text
///
/// # Status Mapping
///
/// | Condition        | PageError                        |
/// |------------------|----------------------------------|
/// | HTTP 429         | RateLimit, with `Retry-After`    |
/// | HTTP 408 / 504   | Timeout                          |
/// | HTTP 5xx         | Connection                       |
/// | other non-2xx    | Parse                            |
/// | empty body       | Parse                            |
/// | transport error  | Timeout or Connection            |
pub async fn fetch_html(client: &Client, url: &str) -> Result<String, PageError> {
    let response = client.get(url).send().await.map_err(|e| map_transport_error(&e))?;
    let status = response.status();

    if !status.is_success() {
        return Err(map_status(status, response.headers()));
    }

    let body = response.text().await.map_err(|e| map_transport_error(&e))?;
    if body.trim().is_empty() {
        return Err(PageError::Parse {
            detail: format!("empty response from {}", url),
        });
    }

    Ok(body)
}

/// Classifies a reqwest error that occurred before a status was available
pub(crate) fn map_transport_error(error: &reqwest::Error) -> PageError {
    if error.is_timeout() {
        PageError::Timeout {
            detail: error.to_string(),
        }
    } else {
        PageError::Connection {
            detail: error.to_string(),
        }
    }
}

/// Classifies a non-success HTTP status
pub(crate) fn map_status(status: StatusCode, headers: &HeaderMap) -> PageError {
    let detail = format!("HTTP {}", status.as_u16());

    if status == StatusCode::TOO_MANY_REQUESTS {
        return PageError::RateLimit {
            retry_after: parse_retry_after(headers),
            detail,
        };
    }

    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return PageError::Timeout { detail };
    }

    if status.is_server_error() {
        return PageError::Connection { detail };
    }

    PageError::Parse {
        detail: format!("unexpected {}", detail),
    }
}

/// Reads `Retry-After` given in seconds; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
