//! Mailbucket async client implementation.
//!
//! This module provides an async [`Client`] and [`ClientBuilder`] for the
//! Mailbucket REST backend.
//!
//! Typical flow:
//! 1) Build a client (`Client::new` or `Client::builder().build()`)
//! 2) Create an address via [`Client::create_address`]
//! 3) Poll the inbox via [`Client::list_emails`] using the address token
//! 4) Fetch full message content via [`Client::get_email`]
//! 5) Optionally remove a message via [`Client::delete_email`]

use crate::models::DomainList;
use crate::{Address, AddressCreate, EmailDetail, EmailList, Error, ListQuery, Result};
use log::debug;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Method, Response, Url};
use std::fmt;
use std::time::Duration;

/// Async client for the Mailbucket temporary email backend.
///
/// A `Client` is cheap to clone at the `reqwest` level (internally shared connection pool),
/// and this type is `Clone`. Create it once and clone as needed.
///
/// Every address-scoped call takes the bearer token of the [`Address`] it
/// operates on. The client itself holds no address state.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    api_root: Url,
    proxy: Option<String>,
    user_agent: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("http", &"<reqwest::Client>")
            .field("api_root", &self.api_root.as_str())
            .field("proxy", &self.proxy)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Client {
    /// Create a [`ClientBuilder`] for configuring a new client.
    ///
    /// # Examples
    /// ```no_run
    /// # use mailbucket_client::Client;
    /// # fn main() -> Result<(), mailbucket_client::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://mail.example.com")
    ///     .user_agent("my-app/1.0")
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client for the default backend (`http://127.0.0.1:8000`).
    pub fn new() -> Result<Self> {
        ClientBuilder::new().build()
    }

    /// Get the proxy URL configured for this client (if any).
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Root of the versioned API, e.g. `http://127.0.0.1:8000/api/v1`.
    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    /// List the domains the backend can issue addresses on.
    pub async fn domains(&self) -> Result<Vec<String>> {
        let url = self.endpoint(&["domains"]);
        let list: DomainList = self.request(Method::GET, url, None, &[], None).await?;
        Ok(list.domains)
    }

    /// Create a new temporary address.
    ///
    /// # Errors
    /// A taken username comes back as [`Error::Api`] with status 409; see
    /// [`Error::is_conflict`].
    ///
    /// # Examples
    /// ```no_run
    /// # use mailbucket_client::{AddressCreate, Client};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), mailbucket_client::Error> {
    /// let client = Client::new()?;
    /// let address = client
    ///     .create_address(&AddressCreate::new(Some("alice".into()), None))
    ///     .await?;
    /// println!("{}", address.email);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_address(&self, body: &AddressCreate) -> Result<Address> {
        let url = self.endpoint(&["addresses"]);
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, url, None, &[], Some(&body))
            .await
    }

    /// Retrieve one page of messages for the address behind `token`.
    ///
    /// # Errors
    /// An expired address comes back as a 404; see [`Error::is_expired`].
    pub async fn list_emails(&self, token: &str, query: &ListQuery) -> Result<EmailList> {
        let url = self.endpoint(&[token, "emails"]);
        let params = query.params();
        self.request(Method::GET, url, Some(token), &params, None)
            .await
    }

    /// Fetch the full content of a message.
    ///
    /// The backend marks the message read unless `mark_read` is `false`.
    pub async fn get_email(&self, token: &str, email_id: &str, mark_read: bool) -> Result<EmailDetail> {
        let url = self.endpoint(&[token, "emails", email_id]);
        let params = if mark_read {
            Vec::new()
        } else {
            vec![("mark_read", "false".to_string())]
        };
        self.request(Method::GET, url, Some(token), &params, None)
            .await
    }

    /// Delete a message.
    ///
    /// # Returns
    /// `Ok(())` on HTTP success; non-2xx responses surface as [`Error::Api`].
    pub async fn delete_email(&self, token: &str, email_id: &str) -> Result<()> {
        let url = self.endpoint(&[token, "emails", email_id]);
        self.execute(Method::DELETE, url, Some(token), &[], None)
            .await?;
        Ok(())
    }

    /// Download URL of one attachment. Not fetched by the client.
    pub fn attachment_url(&self, token: &str, email_id: &str, attachment_id: &str) -> String {
        self.endpoint(&[token, "emails", email_id, "attachments", attachment_id])
            .into()
    }

    /// Download URL of the raw RFC 822 message. Not fetched by the client.
    pub fn raw_email_url(&self, token: &str, email_id: &str) -> String {
        self.endpoint(&[token, "emails", email_id, "raw"]).into()
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_root.clone();
        // The builder rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn request<T>(
        &self,
        method: Method,
        url: Url,
        token: Option<&str>,
        params: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.execute(method, url, token, params, body).await?;
        let body = response.bytes().await?;

        #[cfg(feature = "debug_responses")]
        self.log_response(&body);

        let parsed = serde_json::from_slice::<T>(&body)?;
        Ok(parsed)
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        token: Option<&str>,
        params: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        debug!("{} {}", method, redact_token(url.as_str(), token));

        let mut request = self
            .http
            .request(method, url)
            .headers(self.headers())
            .query(params);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();

        #[cfg(feature = "debug_responses")]
        self.log_response(&body);

        let detail = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| match value.get("detail")? {
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            });
        debug!("HTTP {} (detail: {:?})", status.as_u16(), detail);

        Err(Error::Api { status, detail })
    }

    #[cfg(feature = "debug_responses")]
    fn log_response(&self, body: &[u8]) {
        if let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(body) {
            redact_tokens_in_value(&mut value);
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                debug!("response body:\n{pretty}");
                return;
            }
        }

        let body_text = String::from_utf8_lossy(body);
        debug!("response body:\n{}", redact_tokens_in_text(&body_text));
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }
}

/// Replace the bearer token in a URL so it never reaches the logs.
fn redact_token(url: &str, token: Option<&str>) -> String {
    match token.filter(|t| !t.is_empty()) {
        Some(token) => url.replace(token, "<redacted>"),
        None => url.to_string(),
    }
}

#[cfg(feature = "debug_responses")]
fn redact_tokens_in_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key.to_lowercase().contains("token") {
                    *val = serde_json::Value::String("<redacted>".to_string());
                } else {
                    redact_tokens_in_value(val);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                redact_tokens_in_value(item);
            }
        }
        _ => {}
    }
}

#[cfg(feature = "debug_responses")]
fn redact_tokens_in_text(raw: &str) -> String {
    use regex::Regex;

    let mut redacted = raw.to_string();
    let patterns = [
        r#"(?i)("token"\s*:\s*")[^"]*(")"#,
        r#"(?i)(token=)[^&\s"]+"#,
        r#"(?i)(/api/v1/)[^/\s"]+(/emails)"#,
    ];

    for pattern in patterns {
        if let Ok(re) = Regex::new(pattern) {
            redacted = re
                .replace_all(&redacted, |caps: &regex::Captures<'_>| {
                    if caps.len() >= 3 {
                        format!("{}<redacted>{}", &caps[1], &caps[2])
                    } else {
                        format!("{}<redacted>", &caps[1])
                    }
                })
                .to_string();
        }
    }

    redacted
}

const BASE_URL: &str = "http://127.0.0.1:8000";
const API_PREFIX: &str = "/api/v1";
const USER_AGENT_VALUE: &str = concat!("mailbucket-client/", env!("CARGO_PKG_VERSION"));

/// Builder for configuring a Mailbucket [`Client`].
///
/// # Defaults
/// - Base URL `http://127.0.0.1:8000`, API prefix `/api/v1`
/// - No proxy
/// - Strict TLS verification
/// - `mailbucket-client/<version>` user agent
/// - Reqwest default timeout
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    base_url: String,
    api_prefix: String,
    proxy: Option<String>,
    danger_accept_invalid_certs: bool,
    user_agent: String,
    timeout: Option<Duration>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            api_prefix: API_PREFIX.to_string(),
            proxy: None,
            danger_accept_invalid_certs: false,
            user_agent: USER_AGENT_VALUE.to_string(),
            timeout: None,
        }
    }

    /// Override the backend base URL (scheme, host and port).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the versioned API prefix appended to the base URL.
    pub fn api_prefix(mut self, api_prefix: impl Into<String>) -> Self {
        self.api_prefix = api_prefix.into();
        self
    }

    /// Set a proxy URL (e.g. `"http://127.0.0.1:8080"`).
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Configure whether to accept invalid TLS certificates (default: `false`).
    ///
    /// # Security
    /// Accepting invalid certificates is unsafe on untrusted networks; it is primarily useful
    /// for self-hosted backends with self-signed certificates.
    pub fn danger_accept_invalid_certs(mut self, value: bool) -> Self {
        self.danger_accept_invalid_certs = value;
        self
    }

    /// Override the default user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set a request timeout applied to all operations.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`Client`].
    ///
    /// # Errors
    /// Returns an error if the base URL does not parse or cannot carry a path,
    /// or if the HTTP client cannot be constructed (e.g. invalid proxy URL).
    pub fn build(self) -> Result<Client> {
        let mut api_root =
            Url::parse(&self.base_url).map_err(|e| Error::BaseUrl(format!("{}: {e}", self.base_url)))?;
        {
            let mut path = api_root
                .path_segments_mut()
                .map_err(|_| Error::BaseUrl(self.base_url.clone()))?;
            path.pop_if_empty()
                .extend(self.api_prefix.split('/').filter(|s| !s.is_empty()));
        }

        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.danger_accept_invalid_certs)
            .user_agent(self.user_agent.clone());

        if let Some(proxy_url) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let http = builder.build()?;

        Ok(Client {
            http,
            api_root,
            proxy: self.proxy,
            user_agent: self.user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{DELETE, GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    fn client_for(server: &MockServer) -> Client {
        Client::builder()
            .base_url(server.base_url())
            .build()
            .expect("test client build failed")
    }

    fn address_json(username: &str, token: &str) -> serde_json::Value {
        json!({
            "id": format!("id-{username}"),
            "email": format!("{username}@example.com"),
            "token": token,
            "created_at": "2024-05-01T10:00:00",
            "expires_at": "2024-05-02T10:00:00"
        })
    }

    fn summary_json(id: &str, subject: &str) -> serde_json::Value {
        json!({
            "id": id,
            "subject": subject,
            "from_address": "billing@shop.test",
            "to_address": "alice@example.com",
            "received_at": "2024-05-01T10:05:00",
            "is_read": false,
            "has_attachments": false,
            "size_bytes": 2048
        })
    }

    #[tokio::test]
    async fn create_address_sends_username_and_domain() {
        let server = MockServer::start_async().await;

        let create_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/addresses")
                    .json_body(json!({ "username": "alice", "domain": "example.com" }));
                then.status(200).json_body(address_json("alice", "tok-a"));
            })
            .await;

        let client = client_for(&server);
        let address = client
            .create_address(&AddressCreate::new(
                Some("alice".into()),
                Some("example.com".into()),
            ))
            .await
            .unwrap();

        assert_eq!(address.email, "alice@example.com");
        assert_eq!(address.token, "tok-a");
        create_mock.assert_async().await;
    }

    #[tokio::test]
    async fn taken_username_is_a_conflict_with_detail() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/addresses");
                then.status(409)
                    .json_body(json!({ "detail": "Username 'alice' is already taken" }));
            })
            .await;

        let client = client_for(&server);
        let err = client
            .create_address(&AddressCreate::new(Some("alice".into()), None))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(err.detail(), Some("Username 'alice' is already taken"));
    }

    #[tokio::test]
    async fn list_emails_passes_filters_as_query() {
        let server = MockServer::start_async().await;

        let list_mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/tok-a/emails")
                    .query_param("per_page", "50")
                    .query_param("unread_only", "true")
                    .query_param("search", "invoice");
                then.status(200).json_body(json!({
                    "emails": [summary_json("e1", "Your invoice")],
                    "total": 1,
                    "page": 1,
                    "per_page": 50,
                    "has_next": false,
                    "has_prev": false
                }));
            })
            .await;

        let client = client_for(&server);
        let query = ListQuery {
            per_page: Some(50),
            unread_only: true,
            search: Some("invoice".into()),
            ..ListQuery::default()
        };
        let list = client.list_emails("tok-a", &query).await.unwrap();

        assert_eq!(list.emails.len(), 1);
        assert_eq!(list.emails[0].subject.as_deref(), Some("Your invoice"));
        assert!(!list.has_next);
        list_mock.assert_async().await;
    }

    #[tokio::test]
    async fn expired_address_surfaces_as_expired_error() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/tok-old/emails");
                then.status(404).json_body(json!({ "detail": "Address has expired" }));
            })
            .await;

        let client = client_for(&server);
        let err = client
            .list_emails("tok-old", &ListQuery::default())
            .await
            .unwrap_err();

        assert!(err.is_expired());
        assert_eq!(err.status(), Some(reqwest::StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn get_email_can_skip_marking_read() {
        let server = MockServer::start_async().await;

        let detail = json!({
            "id": "e1",
            "message_id": "<m1@shop.test>",
            "subject": "Your invoice",
            "from_address": "billing@shop.test",
            "to_address": "alice@example.com",
            "raw_headers": "Subject: Your invoice",
            "body_plain": "Total: 10 EUR",
            "body_html": null,
            "size_bytes": 2048,
            "dkim_valid": true,
            "spf_result": "pass",
            "dmarc_result": null,
            "has_attachments": true,
            "received_at": "2024-05-01T10:05:00",
            "is_read": false,
            "attachments": [
                { "id": "a1", "filename": "invoice.pdf", "content_type": "application/pdf", "size_bytes": 1024 }
            ]
        });

        let peek_mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/tok-a/emails/e1")
                    .query_param("mark_read", "false");
                then.status(200).json_body(detail.clone());
            })
            .await;

        let client = client_for(&server);
        let email = client.get_email("tok-a", "e1", false).await.unwrap();

        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename, "invoice.pdf");
        peek_mock.assert_async().await;
    }

    #[tokio::test]
    async fn delete_email_propagates_error_on_non_success_status() {
        let server = MockServer::start_async().await;

        let delete_mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/api/v1/tok-a/emails/e1");
                then.status(500).body("boom");
            })
            .await;

        let client = client_for(&server);
        let err = client.delete_email("tok-a", "e1").await.unwrap_err();

        assert_eq!(err.status(), Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(err.detail(), None);
        delete_mock.assert_async().await;
    }

    #[tokio::test]
    async fn domains_are_listed() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/domains");
                then.status(200)
                    .json_body(json!({ "domains": ["example.com", "example.org"] }));
            })
            .await;

        let client = client_for(&server);
        assert_eq!(
            client.domains().await.unwrap(),
            vec!["example.com".to_string(), "example.org".to_string()]
        );
    }

    #[test]
    fn download_urls_are_built_under_api_prefix() {
        let client = Client::builder()
            .base_url("https://mail.example.com/")
            .build()
            .unwrap();

        assert_eq!(
            client.attachment_url("tok-a", "e1", "a1"),
            "https://mail.example.com/api/v1/tok-a/emails/e1/attachments/a1"
        );
        assert_eq!(
            client.raw_email_url("tok-a", "e1"),
            "https://mail.example.com/api/v1/tok-a/emails/e1/raw"
        );
    }

    #[test]
    fn builder_rejects_unusable_base_url() {
        assert!(matches!(
            Client::builder().base_url("not a url").build(),
            Err(Error::BaseUrl(_))
        ));
        assert!(matches!(
            Client::builder().base_url("mailto:alice@example.com").build(),
            Err(Error::BaseUrl(_))
        ));
    }

    #[test]
    fn debug_output_and_logs_hide_tokens() {
        assert_eq!(
            redact_token("http://h/api/v1/secret/emails", Some("secret")),
            "http://h/api/v1/<redacted>/emails"
        );
        let client = Client::new().unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("127.0.0.1:8000/api/v1"));
    }
}
