use crate::core::error::FetchError;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Client shared by a provider for all of its requests. The timeout covers
/// the whole exchange, body included.
pub fn build_client(timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent("satfolio/1.0")
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Http(format!("Failed to build HTTP client: {e}")))
}

fn request_error(e: reqwest::Error, url: &str, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Http(format!("Request error: {e} for URL: {url}"))
    }
}

/// Single GET of a JSON document. No retries: the scheduler's next tick is
/// the retry.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<T, FetchError> {
    debug!("Requesting {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| request_error(e, url, timeout))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited(url.to_string()));
    }
    if !status.is_success() {
        return Err(FetchError::Http(format!("HTTP {status} from {url}")));
    }

    let text = response
        .text()
        .await
        .map_err(|e| request_error(e, url, timeout))?;
    if text.trim().is_empty() {
        return Err(FetchError::NoDataAvailable(format!("Empty body from {url}")));
    }

    serde_json::from_str(&text)
        .map_err(|e| FetchError::MalformedResponse(format!("Failed to parse {url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Body {
        value: u32,
    }

    async fn serve(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    async fn fetch(server: &MockServer, timeout: Duration) -> Result<Body, FetchError> {
        let client = build_client(timeout).unwrap();
        get_json(&client, &format!("{}/doc", server.uri()), timeout).await
    }

    #[tokio::test]
    async fn test_parses_json_body() {
        let server = serve(ResponseTemplate::new(200).set_body_string(r#"{"value": 7}"#)).await;
        let body = fetch(&server, Duration::from_secs(5)).await.unwrap();
        assert_eq!(body.value, 7);
    }

    #[tokio::test]
    async fn test_maps_status_codes() {
        let server = serve(ResponseTemplate::new(429)).await;
        assert!(matches!(
            fetch(&server, Duration::from_secs(5)).await,
            Err(FetchError::RateLimited(_))
        ));

        let server = serve(ResponseTemplate::new(503)).await;
        assert!(matches!(
            fetch(&server, Duration::from_secs(5)).await,
            Err(FetchError::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_maps_bad_bodies() {
        let server = serve(ResponseTemplate::new(200)).await;
        assert!(matches!(
            fetch(&server, Duration::from_secs(5)).await,
            Err(FetchError::NoDataAvailable(_))
        ));

        let server = serve(ResponseTemplate::new(200).set_body_string("<html>")).await;
        assert!(matches!(
            fetch(&server, Duration::from_secs(5)).await,
            Err(FetchError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = serve(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"value": 1}"#)
                .set_delay(Duration::from_millis(500)),
        )
        .await;
        let result = fetch(&server, Duration::from_millis(50)).await;
        assert_eq!(result.unwrap_err(), FetchError::Timeout(Duration::from_millis(50)));
    }
}
