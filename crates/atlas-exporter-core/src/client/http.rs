//! HTTP client for the Atlas Administration API (v1.0).
//!
//! Atlas authenticates API keys with HTTP Digest. The first request of the
//! process goes out without credentials and receives a `401` challenge; the
//! challenge is kept and every later request answers it up front. When the
//! server rotates the nonce it answers `401` again and the request is sent a
//! second time with the new challenge.
//!
//! List endpoints are paginated (`results` + `totalCount`); all pages are read.

use std::sync::Mutex;

use async_trait::async_trait;
use digest_auth::{AuthContext, WwwAuthenticateHeader};
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::{
    AtlasApi, ClientError, Database, Disk, Measurement, MeasurementWindow, Process, Project,
};

/// Public Atlas Administration API root.
pub const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com/api/atlas/v1.0";

/// Page size requested from list endpoints (Atlas maximum).
const ITEMS_PER_PAGE: usize = 500;

/// One page of a list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default)]
    total_count: Option<usize>,
}

/// Body of the process/database/disk measurement endpoints.
#[derive(Debug, Deserialize)]
struct MeasurementsResponse {
    #[serde(default)]
    measurements: Vec<Measurement>,
}

/// Error body returned by Atlas on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    detail: Option<String>,
    error_code: Option<String>,
}

/// Digest-authenticated Atlas API client.
pub struct AtlasClient {
    http: reqwest::Client,
    base_url: Url,
    public_key: String,
    private_key: String,
    challenge: Mutex<Option<WwwAuthenticateHeader>>,
}

impl AtlasClient {
    /// Creates a client for `base_url` authenticating with an API key pair.
    ///
    /// Fails if the URL does not parse or the HTTP/TLS stack cannot be
    /// initialized.
    pub fn new(
        base_url: &str,
        public_key: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Transport(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Transport(format!(
                "invalid base URL '{}'",
                base_url
            )));
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("atlas-exporter/{}", crate::VERSION))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            public_key: public_key.into(),
            private_key: private_key.into(),
            challenge: Mutex::new(None),
        })
    }

    /// Builds `<base>/<segments...>?<query>`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    /// Answers the cached digest challenge for `uri`, if one is cached.
    fn authorization(&self, uri: &str) -> Result<Option<String>, ClientError> {
        let mut challenge = self.challenge.lock().unwrap_or_else(|e| e.into_inner());
        let Some(prompt) = challenge.as_mut() else {
            return Ok(None);
        };
        let context = AuthContext::new(self.public_key.as_str(), self.private_key.as_str(), uri);
        let answer = prompt
            .respond(&context)
            .map_err(|e| ClientError::Auth(e.to_string()))?;
        Ok(Some(answer.to_header_string()))
    }

    fn store_challenge(&self, header: &str) -> Result<(), ClientError> {
        let prompt = digest_auth::parse(header).map_err(|e| ClientError::Auth(e.to_string()))?;
        *self.challenge.lock().unwrap_or_else(|e| e.into_inner()) = Some(prompt);
        Ok(())
    }

    async fn send(&self, url: &Url, uri: &str) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/json");
        if let Some(auth) = self.authorization(uri)? {
            request = request.header(AUTHORIZATION, auth);
        }
        request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let uri = request_uri(&url);
        debug!(%url, "atlas request");

        let mut response = self.send(&url, &uri).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let header = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if let Some(header) = header {
                trace!(%url, "digest challenge received");
                self.store_challenge(&header)?;
                response = self.send(&url, &uri).await?;
            }
        }

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<Vec<T>, ClientError> {
        let per_page = ITEMS_PER_PAGE.to_string();
        let mut results = Vec::new();
        let mut page_num = 1usize;

        loop {
            let page_str = page_num.to_string();
            let url = self.endpoint(
                segments,
                &[("itemsPerPage", &per_page), ("pageNum", &page_str)],
            );
            let page: Page<T> = self.get_json(url).await?;
            let received = page.results.len();
            results.extend(page.results);

            let done = received < ITEMS_PER_PAGE
                || page.total_count.is_some_and(|total| results.len() >= total);
            if done {
                return Ok(results);
            }
            page_num += 1;
        }
    }

    async fn get_measurements(
        &self,
        segments: &[&str],
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError> {
        let url = self.endpoint(
            segments,
            &[
                ("granularity", window.granularity.as_str()),
                ("period", window.period.as_str()),
            ],
        );
        let response: MeasurementsResponse = self.get_json(url).await?;
        Ok(response.measurements)
    }
}

#[async_trait]
impl AtlasApi for AtlasClient {
    async fn list_projects(&self) -> Result<Vec<Project>, ClientError> {
        self.get_all_pages(&["groups"]).await
    }

    async fn list_processes(&self, project: &str) -> Result<Vec<Process>, ClientError> {
        self.get_all_pages(&["groups", project, "processes"]).await
    }

    async fn list_process_measurements(
        &self,
        project: &str,
        host: &str,
        port: u16,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError> {
        let process = process_id(host, port);
        self.get_measurements(
            &["groups", project, "processes", &process, "measurements"],
            window,
        )
        .await
    }

    async fn list_process_databases(
        &self,
        project: &str,
        host: &str,
        port: u16,
    ) -> Result<Vec<Database>, ClientError> {
        let process = process_id(host, port);
        self.get_all_pages(&["groups", project, "processes", &process, "databases"])
            .await
    }

    async fn list_database_measurements(
        &self,
        project: &str,
        host: &str,
        port: u16,
        database: &str,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError> {
        let process = process_id(host, port);
        self.get_measurements(
            &[
                "groups",
                project,
                "processes",
                &process,
                "databases",
                database,
                "measurements",
            ],
            window,
        )
        .await
    }

    async fn list_process_disks(
        &self,
        project: &str,
        host: &str,
        port: u16,
    ) -> Result<Vec<Disk>, ClientError> {
        let process = process_id(host, port);
        self.get_all_pages(&["groups", project, "processes", &process, "disks"])
            .await
    }

    async fn list_disk_measurements(
        &self,
        project: &str,
        host: &str,
        port: u16,
        disk: &str,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError> {
        let process = process_id(host, port);
        self.get_measurements(
            &[
                "groups",
                project,
                "processes",
                &process,
                "disks",
                disk,
                "measurements",
            ],
            window,
        )
        .await
    }
}

fn process_id(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Path and query of `url`, as the digest `uri` parameter expects.
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn error_detail(body: &[u8]) -> String {
    let parsed: ApiErrorBody = serde_json::from_slice(body).unwrap_or_default();
    match (parsed.error_code, parsed.detail) {
        (Some(code), Some(detail)) => format!("{}: {}", code, detail),
        (Some(code), None) => code,
        (None, Some(detail)) => detail,
        (None, None) => String::from_utf8_lossy(body).chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AtlasClient {
        AtlasClient::new(DEFAULT_BASE_URL, "public", "private").unwrap()
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(AtlasClient::new("not a url", "a", "b").is_err());
        assert!(AtlasClient::new("mailto:ops@example.net", "a", "b").is_err());
    }

    #[test]
    fn test_endpoint_paths() {
        let c = client();
        let url = c.endpoint(&["groups", "abc", "processes", "h.example.net:27017", "disks"], &[]);
        assert_eq!(
            url.as_str(),
            "https://cloud.mongodb.com/api/atlas/v1.0/groups/abc/processes/h.example.net:27017/disks"
        );
    }

    #[test]
    fn test_endpoint_trailing_slash_base() {
        let c = AtlasClient::new("http://127.0.0.1:8080/api/", "a", "b").unwrap();
        let url = c.endpoint(&["groups"], &[]);
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/groups");
    }

    #[test]
    fn test_endpoint_encodes_segments_and_query() {
        let c = client();
        let url = c.endpoint(
            &["groups", "abc", "processes", "h:1", "disks", "data/log", "measurements"],
            &[("granularity", "PT5M"), ("period", "PT1H")],
        );
        assert!(url.path().ends_with("/disks/data%2Flog/measurements"));
        assert_eq!(url.query(), Some("granularity=PT5M&period=PT1H"));
        assert_eq!(
            request_uri(&url),
            format!("{}?granularity=PT5M&period=PT1H", url.path())
        );
    }

    #[test]
    fn test_no_authorization_before_challenge() {
        let c = client();
        assert_eq!(c.authorization("/api/atlas/v1.0/groups").unwrap(), None);
    }

    #[test]
    fn test_authorization_after_challenge() {
        let c = client();
        c.store_challenge(
            r#"Digest realm="MMS Public API", domain="", nonce="OSjKDJbSmBo1nMjKkzlX3LnYAu2EhcuB", algorithm=MD5, qop="auth", stale=false"#,
        )
        .unwrap();
        let header = c.authorization("/api/atlas/v1.0/groups").unwrap().unwrap();
        assert!(header.starts_with("Digest "));
        assert!(header.contains(r#"username="public""#));
        assert!(header.contains(r#"uri="/api/atlas/v1.0/groups""#));
    }

    #[test]
    fn test_bad_challenge_is_auth_error() {
        let c = client();
        let err = c.store_challenge("Basic realm=\"x\"").unwrap_err();
        assert!(matches!(err, ClientError::Auth(_)));
    }

    #[test]
    fn test_page_deserialize() {
        let json = r#"{
            "links": [],
            "results": [{"databaseName": "admin"}, {"databaseName": "shop"}],
            "totalCount": 2
        }"#;
        let page: Page<Database> = serde_json::from_str(json).unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.total_count, Some(2));
        assert_eq!(page.results[1].database_name, "shop");
    }

    #[test]
    fn test_measurements_response_deserialize() {
        let json = r#"{
            "end": "2024-03-01T11:00:00Z",
            "granularity": "PT5M",
            "measurements": [
                {"name": "DISK_PARTITION_SPACE_FREE", "units": "BYTES",
                 "dataPoints": [{"timestamp": "2024-03-01T10:00:00Z", "value": 1.5E10}]}
            ],
            "partitionName": "data",
            "start": "2024-03-01T10:00:00Z"
        }"#;
        let r: MeasurementsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(r.measurements.len(), 1);
        assert_eq!(r.measurements[0].first_value(), Some(1.5e10));
    }

    #[test]
    fn test_error_detail() {
        let body = br#"{"detail":"No group with ID abc exists.","error":404,"errorCode":"GROUP_NOT_FOUND","reason":"Not Found"}"#;
        assert_eq!(
            error_detail(body),
            "GROUP_NOT_FOUND: No group with ID abc exists."
        );
        assert_eq!(error_detail(b"gateway timeout"), "gateway timeout");
    }

    // ------------------------------------------------------------
    // Against a local HTTP server
    // ------------------------------------------------------------

    use std::sync::{Arc, Mutex as StdMutex};

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CHALLENGE: &str = r#"Digest realm="MMS Public API", domain="", nonce="OSjKDJbSmBo1nMjKkzlX3LnYAu2EhcuB", algorithm=MD5, qop="auth", stale=false"#;

    struct Reply {
        status: u16,
        challenge: bool,
        body: String,
    }

    impl Reply {
        fn ok(body: serde_json::Value) -> Self {
            Self {
                status: 200,
                challenge: false,
                body: body.to_string(),
            }
        }

        fn unauthorized() -> Self {
            Self {
                status: 401,
                challenge: true,
                body: json!({"error": 401, "reason": "Unauthorized"}).to_string(),
            }
        }
    }

    /// Serves one response per connection from `handler(hit, request_head)`.
    /// Returns the base URL and the request heads received so far.
    async fn serve<F>(handler: F) -> (String, Arc<StdMutex<Vec<String>>>)
    where
        F: Fn(usize, &str) -> Reply + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_ascii_lowercase();
                let hit = {
                    let mut log = log.lock().unwrap();
                    log.push(head.clone());
                    log.len() - 1
                };

                let reply = handler(hit, &head);
                let reason = match reply.status {
                    200 => "OK",
                    401 => "Unauthorized",
                    _ => "Error",
                };
                let mut out = format!(
                    "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
                    reply.status,
                    reason,
                    reply.body.len()
                );
                if reply.challenge {
                    out.push_str(&format!("www-authenticate: {}\r\n", CHALLENGE));
                }
                out.push_str("\r\n");
                out.push_str(&reply.body);
                let _ = socket.write_all(out.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/api/atlas/v1.0", addr), seen)
    }

    fn has_digest(head: &str) -> bool {
        head.contains("authorization: digest ")
    }

    fn databases_page(count: usize, offset: usize, total: Option<usize>) -> serde_json::Value {
        let results: Vec<_> = (offset..offset + count)
            .map(|i| json!({"databaseName": format!("db{}", i)}))
            .collect();
        match total {
            Some(total) => json!({"results": results, "totalCount": total}),
            None => json!({"results": results}),
        }
    }

    #[tokio::test]
    async fn test_challenge_answered_and_cached() {
        let (base, seen) = serve(|_, head| {
            if has_digest(head) {
                Reply::ok(json!({"results": [{"id": "p1", "name": "prod"}], "totalCount": 1}))
            } else {
                Reply::unauthorized()
            }
        })
        .await;
        let client = AtlasClient::new(&base, "public", "private").unwrap();

        let projects = client.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, "p1");

        // Second call answers the cached challenge up front.
        client.list_projects().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(!has_digest(&seen[0]));
        assert!(has_digest(&seen[1]));
        assert!(seen[1].contains(r#"username="public""#));
        assert!(seen[1].contains("uri=\"/api/atlas/v1.0/groups?itemsperpage=500&pagenum=1\""));
        assert!(has_digest(&seen[2]));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_status_error() {
        let (base, seen) = serve(|_, _| Reply::unauthorized()).await;
        let client = AtlasClient::new(&base, "public", "wrong").unwrap();

        let err = client.list_projects().await.unwrap_err();

        assert!(matches!(err, ClientError::Status { status: 401, .. }));
        // One unauthenticated attempt, one answered challenge, no loop.
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_error_status_carries_detail() {
        let (base, _) = serve(|_, _| Reply {
            status: 404,
            challenge: false,
            body: json!({"detail": "No group with ID p1 exists.", "errorCode": "GROUP_NOT_FOUND"})
                .to_string(),
        })
        .await;
        let client = AtlasClient::new(&base, "public", "private").unwrap();

        match client.list_processes("p1").await.unwrap_err() {
            ClientError::Status { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "GROUP_NOT_FOUND: No group with ID p1 exists.");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_pages_followed_until_short_page() {
        let (base, seen) = serve(|_, head| {
            if head.contains("pagenum=1 ") {
                Reply::ok(databases_page(ITEMS_PER_PAGE, 0, Some(501)))
            } else {
                Reply::ok(databases_page(1, ITEMS_PER_PAGE, Some(501)))
            }
        })
        .await;
        let client = AtlasClient::new(&base, "public", "private").unwrap();

        let dbs = client
            .list_process_databases("p1", "h.example.net", 27017)
            .await
            .unwrap();

        assert_eq!(dbs.len(), 501);
        assert_eq!(dbs[500].database_name, "db500");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with(
            "get /api/atlas/v1.0/groups/p1/processes/h.example.net:27017/databases?itemsperpage=500&pagenum=1 "
        ));
        assert!(seen[1].contains("pagenum=2 "));
    }

    #[tokio::test]
    async fn test_empty_final_page() {
        let (base, seen) = serve(|_, head| {
            if head.contains("pagenum=1 ") {
                Reply::ok(databases_page(ITEMS_PER_PAGE, 0, None))
            } else {
                Reply::ok(databases_page(0, 0, None))
            }
        })
        .await;
        let client = AtlasClient::new(&base, "public", "private").unwrap();

        let dbs = client.list_process_databases("p1", "h", 27017).await.unwrap();

        assert_eq!(dbs.len(), ITEMS_PER_PAGE);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_total_count_stops_paging() {
        let (base, seen) =
            serve(|_, _| Reply::ok(databases_page(ITEMS_PER_PAGE, 0, Some(ITEMS_PER_PAGE)))).await;
        let client = AtlasClient::new(&base, "public", "private").unwrap();

        let dbs = client.list_process_databases("p1", "h", 27017).await.unwrap();

        assert_eq!(dbs.len(), ITEMS_PER_PAGE);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_measurement_window_in_query() {
        let (base, seen) = serve(|_, _| {
            Reply::ok(json!({
                "measurements": [
                    {"name": "CONNECTIONS", "units": "SCALAR",
                     "dataPoints": [{"timestamp": "2024-03-01T10:00:00Z", "value": 12.0}]}
                ]
            }))
        })
        .await;
        let client = AtlasClient::new(&base, "public", "private").unwrap();
        let window = MeasurementWindow::new("PT1M", "PT10M");

        let measurements = client
            .list_process_measurements("p1", "h", 27017, &window)
            .await
            .unwrap();

        assert_eq!(measurements[0].first_value(), Some(12.0));
        assert!(seen.lock().unwrap()[0].contains("measurements?granularity=pt1m&period=pt10m "));
    }
}
