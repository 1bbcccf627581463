//! Kilter Board (Aurora platform) client.
//!
//! The vendor's sync endpoint is an idiosyncratic cursor protocol: every request
//! carries one watermark per table, every response echoes newer watermarks in
//! `user_syncs`/`shared_syncs`, and `_complete` says whether more pages remain.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crux_core::BoardType;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    build_http_client, null_as_default, payload_prefix, BoardClient, HttpClientConfig,
    VendorAscentRecord, VendorClimbRecord, VendorError, VendorSession, VendorSyncResult,
};

pub const KILTER_API_BASE_URL: &str = "https://kilterboardapp.com";
pub const KILTER_CLIMB_URL_BASE: &str = "https://kilterboardapp.com/climbs";

/// Watermark meaning "from the beginning of time".
pub const BASE_SYNC_DATE: &str = "1970-01-01 00:00:00.000000";
pub const DEFAULT_MAX_PAGES: usize = 10;

const KILTER_USER_AGENT: &str = "Kilter%20Board/202 CFNetwork/1568.100.1 Darwin/24.0.0";
const SYNC_TABLES: [&str; 2] = ["ascents", "climbs"];
const DIAGNOSTIC_PREFIX_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct KilterClient {
    client: reqwest::Client,
    base_url: String,
    max_pages: usize,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    session: Option<SessionField>,
    #[serde(default)]
    user_id: Option<i64>,
}

/// The vendor returns either a bare token or `{token, user_id}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionField {
    Token(String),
    Object {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        user_id: Option<i64>,
    },
}

impl LoginResponse {
    fn into_session(self) -> Option<VendorSession> {
        let (token, vendor_user_id) = match self.session? {
            SessionField::Token(token) => (token, self.user_id.unwrap_or(0)),
            SessionField::Object { token, user_id } => (token?, user_id.unwrap_or(0)),
        };
        if token.is_empty() {
            return None;
        }
        Some(VendorSession {
            token,
            vendor_user_id,
        })
    }
}

/// Per-table watermark echo.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CursorEcho {
    pub table_name: String,
    #[serde(default)]
    pub last_synchronized_at: Option<String>,
}

/// One response of the sync endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncPage {
    #[serde(rename = "_complete", default, deserialize_with = "null_as_default")]
    pub complete: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ascents: Vec<VendorAscentRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub climbs: Vec<VendorClimbRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_syncs: Vec<CursorEcho>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shared_syncs: Vec<CursorEcho>,
}

/// Bounded, non-restartable sequence of sync pages.
///
/// Watermarks are threaded through as local state; a table only moves forward
/// when a response echoes a newer value for it.
#[derive(Debug)]
pub struct SyncPager<'a> {
    client: &'a KilterClient,
    token: Option<&'a str>,
    cursors: BTreeMap<String, String>,
    pages_fetched: usize,
    complete: bool,
}

impl<'a> SyncPager<'a> {
    pub async fn next_page(&mut self) -> Result<Option<SyncPage>, VendorError> {
        if self.complete || self.pages_fetched >= self.client.max_pages {
            return Ok(None);
        }

        let page = self.client.post_sync(&self.cursors, self.token).await?;
        self.complete = page.complete;
        if self.token.is_some() {
            advance_cursors(&mut self.cursors, &page.user_syncs);
        }
        advance_cursors(&mut self.cursors, &page.shared_syncs);
        self.pages_fetched += 1;

        Ok(Some(page))
    }

    pub fn cursors(&self) -> &BTreeMap<String, String> {
        &self.cursors
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Move each known table's watermark to the echoed value if it is newer.
///
/// Vendor timestamps are fixed-width `YYYY-MM-DD HH:MM:SS.ffffff`, so string
/// order is chronological order.
pub fn advance_cursors(cursors: &mut BTreeMap<String, String>, echoes: &[CursorEcho]) {
    for echo in echoes {
        let Some(reported) = echo.last_synchronized_at.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        if let Some(current) = cursors.get_mut(&echo.table_name) {
            if reported > current.as_str() {
                *current = reported.to_string();
            }
        }
    }
}

pub fn format_since(since: DateTime<Utc>) -> String {
    since.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn encode_cursor_body(cursors: &BTreeMap<String, String>) -> String {
    cursors
        .iter()
        .map(|(table, watermark)| {
            format!(
                "{}={}",
                urlencoding::encode(table),
                urlencoding::encode(watermark)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

impl KilterClient {
    pub fn new(base_url: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        let config = HttpClientConfig {
            user_agent: config
                .user_agent
                .clone()
                .or_else(|| Some(KILTER_USER_AGENT.to_string())),
            ..config
        };
        Ok(Self {
            client: build_http_client(&config)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_pages: config.max_pages.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pager<'a>(
        &'a self,
        cursors: BTreeMap<String, String>,
        token: Option<&'a str>,
    ) -> SyncPager<'a> {
        SyncPager {
            client: self,
            token: token.filter(|t| !t.is_empty()),
            cursors,
            pages_fetched: 0,
            complete: false,
        }
    }

    async fn post_sync(
        &self,
        cursors: &BTreeMap<String, String>,
        token: Option<&str>,
    ) -> Result<SyncPage, VendorError> {
        let url = format!("{}/sync", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(encode_cursor_body(cursors));
        if let Some(token) = token {
            request = request.header(COOKIE, format!("token={token}"));
        }

        let span = info_span!("vendor_request", endpoint = "sync");
        async move {
            let resp = request.send().await.map_err(VendorError::from_transport)?;
            let status = resp.status();
            let body = resp.text().await.map_err(VendorError::from_transport)?;

            if !status.is_success() {
                return Err(VendorError::Unavailable {
                    status: Some(status.as_u16()),
                    message: format!(
                        "sync failed: {} body={}",
                        status.as_u16(),
                        payload_prefix(&body, 200)
                    ),
                });
            }

            serde_json::from_str::<SyncPage>(&body).map_err(|err| {
                warn!(
                    error = %err,
                    payload = %payload_prefix(&body, DIAGNOSTIC_PREFIX_CHARS),
                    "unparseable sync page"
                );
                VendorError::Malformed(format!("sync page: {err}"))
            })
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl BoardClient for KilterClient {
    fn board_type(&self) -> BoardType {
        BoardType::Kilter
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<VendorSession, VendorError> {
        let url = format!("{}/sessions", self.base_url);
        let request = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&json!({
                "username": username,
                "password": password,
                "tou": "accepted",
                "pp": "accepted",
                "ua": "app",
            }));

        let span = info_span!("vendor_request", endpoint = "sessions");
        async move {
            let resp = request.send().await.map_err(VendorError::from_transport)?;
            let status = resp.status();
            if status == StatusCode::UNPROCESSABLE_ENTITY {
                return Err(VendorError::InvalidCredentials);
            }
            if !status.is_success() {
                return Err(VendorError::Unavailable {
                    status: Some(status.as_u16()),
                    message: format!("login failed: {}", status.as_u16()),
                });
            }

            let body = resp.text().await.map_err(VendorError::from_transport)?;
            let session = serde_json::from_str::<LoginResponse>(&body)
                .ok()
                .and_then(LoginResponse::into_session);
            match session {
                Some(session) => {
                    debug!(vendor_user_id = session.vendor_user_id, "vendor session established");
                    Ok(session)
                }
                None => {
                    warn!(
                        payload = %payload_prefix(&body, DIAGNOSTIC_PREFIX_CHARS),
                        "no token in vendor login response"
                    );
                    Err(VendorError::Malformed("no token in login response".into()))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_ascents_and_climbs(
        &self,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<VendorSyncResult, VendorError> {
        let watermark = since
            .map(format_since)
            .unwrap_or_else(|| BASE_SYNC_DATE.to_string());
        let cursors = SYNC_TABLES
            .iter()
            .map(|table| (table.to_string(), watermark.clone()))
            .collect();

        let mut pager = self.pager(cursors, Some(token));
        let mut result = VendorSyncResult::default();
        while let Some(page) = pager.next_page().await? {
            result.ascents.extend(page.ascents);
            result.climbs.extend(page.climbs);
        }

        if !pager.is_complete() {
            warn!(
                pages = pager.pages_fetched(),
                "sync stopped at page cap before the vendor reported completion"
            );
        }
        debug!(
            pages = pager.pages_fetched(),
            ascents = result.ascents.len(),
            climbs = result.climbs.len(),
            "vendor sync pulled"
        );
        Ok(result)
    }

    fn climb_url(&self, climb_uuid: &str) -> String {
        format!("{KILTER_CLIMB_URL_BASE}/{climb_uuid}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> KilterClient {
        KilterClient::new(server.url(), HttpClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn authenticate_accepts_bare_token_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sessions")
            .match_body(Matcher::PartialJson(json!({
                "username": "crux",
                "password": "secret",
                "tou": "accepted",
                "pp": "accepted",
                "ua": "app",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"session":"tok-1","user_id":77}"#)
            .create_async()
            .await;

        let session = client_for(&server).authenticate("crux", "secret").await.unwrap();
        assert_eq!(
            session,
            VendorSession {
                token: "tok-1".into(),
                vendor_user_id: 77
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn authenticate_accepts_object_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sessions")
            .with_status(200)
            .with_body(r#"{"session":{"token":"tok-2","user_id":12}}"#)
            .create_async()
            .await;

        let session = client_for(&server).authenticate("crux", "secret").await.unwrap();
        assert_eq!(session.token, "tok-2");
        assert_eq!(session.vendor_user_id, 12);
    }

    #[tokio::test]
    async fn authenticate_maps_422_to_invalid_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sessions")
            .with_status(422)
            .with_body(r#"{"errors":["bad login"]}"#)
            .create_async()
            .await;

        let err = client_for(&server).authenticate("crux", "nope").await.unwrap_err();
        assert!(matches!(err, VendorError::InvalidCredentials));
    }

    #[tokio::test]
    async fn authenticate_maps_other_failures_to_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sessions")
            .with_status(503)
            .create_async()
            .await;

        let err = client_for(&server).authenticate("crux", "secret").await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(matches!(err, VendorError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn silent_vendor_times_out_as_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let config = HttpClientConfig {
            timeout: std::time::Duration::from_millis(300),
            ..Default::default()
        };
        let client = KilterClient::new(format!("http://{addr}"), config).unwrap();
        let err = client.authenticate("crux", "secret").await.unwrap_err();
        hold.abort();

        match err {
            VendorError::Unavailable { status, message } => {
                assert_eq!(status, None);
                assert_eq!(message, "request timed out");
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authenticate_without_token_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sessions")
            .with_status(200)
            .with_body(r#"{"session":{"user_id":12}}"#)
            .create_async()
            .await;

        let err = client_for(&server).authenticate("crux", "secret").await.unwrap_err();
        assert!(matches!(err, VendorError::Malformed(_)));
    }

    #[tokio::test]
    async fn sync_sends_token_cookie_and_seeded_watermarks() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sync")
            .match_header("cookie", "token=tok")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body("ascents=2024-03-01%2010%3A00%3A00.000&climbs=2024-03-01%2010%3A00%3A00.000")
            .with_status(200)
            .with_body(r#"{"_complete":true,"ascents":[],"climbs":[]}"#)
            .create_async()
            .await;

        let since = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().unwrap();
        let result = client_for(&server)
            .fetch_ascents_and_climbs("tok", Some(since))
            .await
            .unwrap();
        assert!(result.ascents.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sync_non_success_aborts_with_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sync")
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_ascents_and_climbs("tok", None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn sync_garbage_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sync")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_ascents_and_climbs("tok", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VendorError::Malformed(_)));
    }

    #[test]
    fn cursors_only_move_forward_for_known_tables() {
        let mut cursors = BTreeMap::from([
            ("ascents".to_string(), "2024-05-01 00:00:00.000000".to_string()),
            ("climbs".to_string(), BASE_SYNC_DATE.to_string()),
        ]);
        advance_cursors(
            &mut cursors,
            &[
                CursorEcho {
                    table_name: "ascents".into(),
                    last_synchronized_at: Some("2024-04-01 00:00:00.000000".into()),
                },
                CursorEcho {
                    table_name: "climbs".into(),
                    last_synchronized_at: Some("2024-02-01 00:00:00.000000".into()),
                },
                CursorEcho {
                    table_name: "walls".into(),
                    last_synchronized_at: Some("2025-01-01 00:00:00.000000".into()),
                },
                CursorEcho {
                    table_name: "climbs".into(),
                    last_synchronized_at: None,
                },
            ],
        );
        assert_eq!(cursors["ascents"], "2024-05-01 00:00:00.000000");
        assert_eq!(cursors["climbs"], "2024-02-01 00:00:00.000000");
        assert!(!cursors.contains_key("walls"));
    }

    #[test]
    fn since_is_rendered_with_millisecond_precision() {
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 5).single().unwrap();
        assert_eq!(format_since(since), "2024-03-01 10:00:05.000");
    }

    #[test]
    fn body_encodes_spaces_as_percent_twenty() {
        let cursors = BTreeMap::from([("ascents".to_string(), BASE_SYNC_DATE.to_string())]);
        assert_eq!(
            encode_cursor_body(&cursors),
            "ascents=1970-01-01%2000%3A00%3A00.000000"
        );
    }
}
