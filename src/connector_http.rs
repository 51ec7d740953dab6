use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::time::Duration;

use crate::config::Config;
use crate::extract;
use crate::models::SourceItem;

/// Fetch each configured URL and turn the response into a source item.
///
/// Requests are paced by `delay_ms` between URLs and retried with
/// exponential backoff on 429, 5xx, and network errors. Pages that cannot
/// be fetched after all retries are counted in the skip total.
pub async fn scan_http(config: &Config) -> Result<(Vec<SourceItem>, u64)> {
    let http_config = config
        .connectors
        .http
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("HTTP connector not configured"))?;

    if http_config.urls.is_empty() {
        bail!("HTTP connector has no urls configured");
    }

    let client = reqwest::Client::builder()
        .user_agent(&http_config.user_agent)
        .timeout(Duration::from_secs(http_config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let mut items = Vec::new();
    let mut skipped: u64 = 0;

    for (i, url) in http_config.urls.iter().enumerate() {
        if i > 0 && http_config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(http_config.delay_ms)).await;
        }

        match fetch_with_retry(&client, url, http_config.max_retries).await {
            Ok(html) => items.push(page_to_source_item(url, &html)),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "fetch failed, skipping");
                skipped += 1;
            }
        }
    }

    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok((items, skipped))
}

async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    max_retries: u32,
) -> Result<String> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let result = client.get(url).send().await;
        match result {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return resp
                        .text()
                        .await
                        .with_context(|| format!("Failed to read response body from {}", url));
                }
                let retryable = status.as_u16() == 429 || status.is_server_error();
                if !retryable || attempt > max_retries {
                    bail!("GET {} returned {}", url, status);
                }
            }
            Err(e) => {
                if attempt > max_retries {
                    return Err(e).with_context(|| format!("GET {} failed", url));
                }
            }
        }
        let backoff_secs = 1u64 << (attempt - 1).min(5);
        tracing::debug!(url = %url, attempt, backoff_secs, "retrying fetch");
        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
    }
}

fn page_to_source_item(url: &str, html: &str) -> SourceItem {
    let now = Utc::now();
    let title = extract::html_title(html);
    let body = extract::strip_html(html);

    SourceItem {
        source: "http".to_string(),
        source_id: url.to_string(),
        source_url: Some(url.to_string()),
        title,
        author: None,
        created_at: now,
        updated_at: now,
        content_type: extract::MIME_HTML.to_string(),
        body,
        metadata_json: "{}".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serves one canned HTTP response per incoming connection, in order.
    async fn canned_server(responses: Vec<String>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for resp in responses {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(resp.as_bytes()).await;
            }
        });
        format!("http://{}", addr)
    }

    fn response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn fetch_retries_after_429_then_succeeds() {
        let url = canned_server(vec![
            response("429 Too Many Requests", ""),
            response("200 OK", "<html><title>Okay</title><body>hello</body></html>"),
        ])
        .await;

        let client = reqwest::Client::new();
        let html = fetch_with_retry(&client, &url, 3).await.unwrap();
        assert!(html.contains("hello"));
    }

    #[tokio::test]
    async fn fetch_does_not_retry_client_errors() {
        let url = canned_server(vec![response("404 Not Found", "")]).await;

        let client = reqwest::Client::new();
        let err = fetch_with_retry(&client, &url, 3).await.unwrap_err();
        assert!(err.to_string().contains("404"), "got: {}", err);
    }

    #[test]
    fn page_item_carries_title_and_stripped_body() {
        let item = page_to_source_item(
            "https://example.com/a",
            "<html><title>Page A</title><body><p>text here</p></body></html>",
        );
        assert_eq!(item.source, "http");
        assert_eq!(item.source_id, "https://example.com/a");
        assert_eq!(item.title.as_deref(), Some("Page A"));
        assert!(item.body.contains("text here"));
        assert!(!item.body.contains("<p>"));
    }
}
