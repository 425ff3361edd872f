use std::time::Duration;

use async_trait::async_trait;
use engine::{FetchError, FetchedDocument, Fetcher};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

/// Desktop browser user agent; some shops refuse unknown clients outright.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

const MAX_REDIRECTS: usize = 10;

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedDocument, FetchError> {
        let parsed = parse_url(url)?;

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "page request failed");
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| classify(e, timeout))?;

        debug!(url, %final_url, bytes = body.len(), "fetched page");
        Ok(FetchedDocument {
            final_url,
            content_type,
            body,
        })
    }
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else if let Some(status) = err.status() {
        FetchError::Status {
            status: status.as_u16(),
        }
    } else {
        FetchError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering the first request with `response`.
    async fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}/item")
    }

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn fetches_html_with_content_type() {
        let url = serve_once(http_response(
            "200 OK",
            "text/html; charset=utf-8",
            "<span class=\"price\">$5.00</span>",
        ))
        .await;

        let fetcher = HttpFetcher::new().unwrap();
        let document = fetcher.fetch(&url, Duration::from_secs(5)).await.unwrap();

        assert_eq!(document.final_url, url);
        assert_eq!(document.content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert!(document.body.contains("$5.00"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let url = serve_once(http_response("404 Not Found", "text/html", "gone")).await;

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher.fetch(&url, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, FetchError::Status { status: 404 });
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let fetcher = HttpFetcher::new().unwrap();
        let timeout = Duration::from_millis(200);
        let err = fetcher
            .fetch(&format!("http://{addr}/"), timeout)
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout(timeout));
    }

    #[tokio::test]
    async fn rejects_unusable_urls() {
        let fetcher = HttpFetcher::new().unwrap();

        let err = fetcher
            .fetch("not a url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));

        let err = fetcher
            .fetch("ftp://example.com/file", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme 'ftp'"));
    }
}
