use crate::error::ElogError;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::time::Duration;

/// Delimiter line separating attributes from the body in a downloaded
/// logbook message.
const BODY_DELIMITER: &str = "========================================";

/// Back-off before the single retry on a 5xx response.
const RETRY_BACKOFF_MS: u64 = 500;

/// Read-only HTTP client of an ELOG logbook
/// (`https://host/<subdir>/<logbook>/`).
///
/// The server has no JSON API: searches return an HTML listing page and
/// message downloads return a plain-text attribute block. This client
/// owns all of that scraping.
pub struct ElogClient {
    http: reqwest::Client,
    url:  String,
}

impl ElogClient {
    /// `url` is the full logbook location, e.g.
    /// "https://elog-gfa.psi.ch/SwissFEL+commissioning/". A missing
    /// trailing slash is added.
    pub fn new(url: impl Into<String>) -> Self {
        let mut url = url.into().trim().to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        Self {
            // Redirects are handled manually: the server signals auth
            // failures and moved logbooks through the Location header.
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .redirect(reqwest::redirect::Policy::none())
                .danger_accept_invalid_certs(true)
                .build()
                .unwrap_or_default(),
            url,
        }
    }

    /// Direct URL of one entry.
    pub fn message_url(&self, msg_id: u32) -> String {
        format!("{}{}", self.url, msg_id)
    }

    /// GET with a single retry after a short back-off when the server
    /// answers 5xx. Anything else fails straight away.
    async fn get_with_retry(&self, url: &str, params: &[(String, String)]) -> Result<reqwest::Response, ElogError> {
        for attempt in 0..2 {
            let result = self.http.get(url).query(params).send().await;
            match result {
                Ok(response) if response.status().is_server_error() && attempt == 0 => {
                    tracing::warn!(status = %response.status(), url, "logbook 5xx — retrying once");
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => return Err(ElogError::Timeout),
                Err(e) => return Err(ElogError::ServerProblem(e.to_string())),
            }
        }
        unreachable!("second attempt always returns")
    }

    /// Searches the logbook and returns message ids, newest first.
    ///
    /// `params` carries the filter attributes (Category, System, …) and
    /// free-text scopes (`subtext`). Empty values are removed before the
    /// request — the server redirects such queries with surprising
    /// results otherwise.
    pub async fn search(
        &self,
        filter: &HashMap<String, String>,
        n_results: usize,
    ) -> Result<Vec<u32>, ElogError> {
        // npp=0 crashes the server, also from the web UI.
        let n_results = n_results.max(1);

        let mut params: Vec<(String, String)> = vec![
            ("mode".to_string(), "full".to_string()),
            ("reverse".to_string(), "1".to_string()),
            ("npp".to_string(), n_results.to_string()),
        ];
        for (key, value) in filter {
            if !value.is_empty() {
                params.push((key.clone(), value.clone()));
            }
        }

        let response = self.get_with_retry(&self.url, &params).await?;
        let body = Self::validate(response).await?;
        Ok(Self::scrape_message_ids(&body))
    }

    /// Reads one message. Returns `(body, attributes, attachment_urls)`.
    pub async fn read(&self, msg_id: u32) -> Result<RawMessage, ElogError> {
        let url = format!("{}{}?cmd=download", self.url, msg_id);
        let response = self.get_with_retry(&url, &[]).await?;
        let text = Self::validate(response).await?;

        if text.contains(r#"class="errormsg""#) {
            return Err(ElogError::InvalidMessageId(msg_id));
        }

        let lines: Vec<&str> = text.lines().collect();
        let delimiter_idx = lines
            .iter()
            .position(|l| l.trim_end() == BODY_DELIMITER)
            .ok_or_else(|| ElogError::ServerProblem(format!("message {} has no attribute delimiter", msg_id)))?;

        let body = lines[delimiter_idx + 1..].join("\n");

        let mut attributes = HashMap::new();
        let mut attachments = Vec::new();
        for line in &lines[..delimiter_idx] {
            let Some((key, value)) = line.split_once(": ") else { continue };
            if key == "Attachment" {
                if !value.is_empty() {
                    // The line holds comma-separated file names; turn them
                    // into absolute URLs so they stay resolvable.
                    attachments = value
                        .split(',')
                        .map(|name| format!("{}{}", self.url, name.trim()))
                        .collect();
                }
            } else {
                attributes.insert(key.to_string(), value.to_string());
            }
        }

        Ok(RawMessage { msg_id, body, attributes, attachments })
    }

    /// Check the status line and sniff the error patterns the server
    /// hides inside 200 responses.
    async fn validate(response: reqwest::Response) -> Result<String, ElogError> {
        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(ElogError::ServerProblem(format!("status {}", status)));
        }

        if let Some(location) = response.headers().get("Location") {
            let location = location.to_str().unwrap_or_default();
            if location.contains("fail") {
                return Err(ElogError::Authentication);
            }
            if location.contains("has moved") {
                return Err(ElogError::ServerProblem("logbook has moved".to_string()));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| ElogError::ServerProblem(e.to_string()))?;

        if body.contains("type=password") || body.contains(r#"type="password""#) {
            return Err(ElogError::Authentication);
        }

        Ok(body)
    }

    /// Pull message ids out of the search listing page: every row links
    /// the entry from its first `list1`/`list2` cell.
    fn scrape_message_ids(page: &str) -> Vec<u32> {
        let document = Html::parse_document(page);
        let selector = Selector::parse("tr td.list1 a, tr td.list2 a")
            .expect("static selector is valid");

        let mut ids = Vec::new();
        for anchor in document.select(&selector) {
            let Some(href) = anchor.value().attr("href") else { continue };
            let Some(last) = href.rsplit('/').next() else { continue };
            if let Ok(id) = last.parse::<u32>() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }
}

/// One downloaded message, still unparsed.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub msg_id:      u32,
    pub body:        String,
    pub attributes:  HashMap<String, String>,
    pub attachments: Vec<String>,
}
