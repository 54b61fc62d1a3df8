//! Counter store backed by a Redis-compatible REST endpoint.
//!
//! Commands are sent as a JSON pipeline to `{url}/pipeline` with bearer
//! token authentication. An increment is the pipeline
//! `INCR key` / `PEXPIRE key ttl NX` / `PTTL key`: the increment is the
//! store's own atomic primitive and `NX` only sets an expiry on a key that
//! has none, so no server-side scripting is needed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{CounterEntry, CounterStore, StoreError};
use crate::error::{FloodgateError, Result};
use crate::ratelimit::duration_millis;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// One element of a pipeline response.
#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// REST client for the shared counter store.
///
/// The underlying HTTP client pools connections and is cheap to share, so
/// one instance should serve every limiter in the process.
pub struct RestStore {
    base_url: String,
    token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RestStore {
    /// Create a client for the endpoint at `url` authenticated with `token`.
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let base_url = url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(FloodgateError::Config(
                "counter store URL is required".to_string(),
            ));
        }
        if token.trim().is_empty() {
            return Err(FloodgateError::Config(
                "counter store token is required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FloodgateError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            token: token.to_string(),
            timeout,
            client,
        })
    }

    /// The configured endpoint, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn pipeline(&self, commands: Vec<Vec<String>>) -> std::result::Result<Vec<Reply>, StoreError> {
        let url = format!("{}/pipeline", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&commands)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| classify_transport(&e))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        serde_json::from_str::<Vec<Reply>>(&body).map_err(|e| {
            StoreError::Unavailable(format!("malformed pipeline response: {}", e))
        })
    }
}

#[async_trait]
impl CounterStore for RestStore {
    async fn increment_and_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> std::result::Result<CounterEntry, StoreError> {
        let ttl_ms = duration_millis(ttl).max(1).to_string();
        let replies = self
            .pipeline(vec![
                vec!["INCR".to_string(), key.to_string()],
                vec!["PEXPIRE".to_string(), key.to_string(), ttl_ms, "NX".to_string()],
                vec!["PTTL".to_string(), key.to_string()],
            ])
            .await?;

        parse_increment(key, &replies)
    }

    async fn read(&self, key: &str) -> std::result::Result<Option<CounterEntry>, StoreError> {
        let replies = self
            .pipeline(vec![
                vec!["GET".to_string(), key.to_string()],
                vec!["PTTL".to_string(), key.to_string()],
            ])
            .await?;

        parse_read(&replies)
    }
}

/// Interpret the replies of an `INCR` / `PEXPIRE NX` / `PTTL` pipeline.
///
/// The count is mandatory: an increment that was sent but whose result is
/// missing counts as a store failure. A failed expiry is only logged since
/// the window index in the key already bounds the counter's lifetime.
fn parse_increment(key: &str, replies: &[Reply]) -> std::result::Result<CounterEntry, StoreError> {
    let incr = replies
        .first()
        .ok_or_else(|| StoreError::Unavailable("empty pipeline response".to_string()))?;
    let count = reply_integer(incr)?
        .filter(|count| *count > 0)
        .ok_or_else(|| StoreError::Unavailable("INCR returned no count".to_string()))?
        as u64;

    if let Some(Reply {
        error: Some(err), ..
    }) = replies.get(1)
    {
        warn!(key = %key, error = %err, "Failed to set counter expiry");
    }

    let ttl_remaining = match replies.get(2) {
        Some(reply) => match reply_integer(reply) {
            // -2: the key expired between INCR and PTTL
            Ok(Some(-2)) => Some(Duration::ZERO),
            Ok(Some(ms)) => pttl_to_duration(ms),
            Ok(None) => None,
            Err(e) => {
                debug!(key = %key, error = %e, "PTTL failed after increment");
                None
            }
        },
        None => None,
    };

    Ok(CounterEntry {
        count,
        ttl_remaining,
    })
}

/// Interpret the replies of a `GET` / `PTTL` pipeline.
fn parse_read(replies: &[Reply]) -> std::result::Result<Option<CounterEntry>, StoreError> {
    let get = replies
        .first()
        .ok_or_else(|| StoreError::Unavailable("empty pipeline response".to_string()))?;
    let count = match reply_integer(get)? {
        Some(count) if count >= 0 => count as u64,
        Some(count) => {
            return Err(StoreError::Unavailable(format!(
                "negative counter value {}",
                count
            )))
        }
        None => return Ok(None),
    };

    let ttl_remaining = match replies.get(1) {
        Some(reply) => reply_integer(reply)?.and_then(pttl_to_duration),
        None => None,
    };

    Ok(Some(CounterEntry {
        count,
        ttl_remaining,
    }))
}

/// Extract an integer result. Counters come back as numbers from `INCR`
/// and as strings from `GET`; `null` means the key is absent.
fn reply_integer(reply: &Reply) -> std::result::Result<Option<i64>, StoreError> {
    if let Some(err) = &reply.error {
        return Err(classify_command_error(err));
    }

    match &reply.result {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| StoreError::Unavailable(format!("non-integer result {}", n))),
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| StoreError::Unavailable(format!("non-integer result {:?}", s))),
        Some(other) => Err(StoreError::Unavailable(format!(
            "unexpected result {}",
            other
        ))),
    }
}

/// `PTTL` answers -1 for a key without expiry and -2 for a missing key.
fn pttl_to_duration(ms: i64) -> Option<Duration> {
    if ms >= 0 {
        Some(Duration::from_millis(ms as u64))
    } else {
        None
    }
}

/// Classify a per-command error string returned by the store.
fn classify_command_error(message: &str) -> StoreError {
    let upper = message.to_ascii_uppercase();
    if upper.contains("NOPERM") || upper.contains("NOAUTH") || upper.contains("SCRIPT") {
        StoreError::PermissionDenied(message.to_string())
    } else {
        StoreError::Unavailable(message.to_string())
    }
}

/// Classify a non-success HTTP status.
fn classify_status(status: StatusCode, body: &str) -> StoreError {
    let detail = match serde_json::from_str::<Reply>(body) {
        Ok(Reply {
            error: Some(err), ..
        }) => err,
        _ => body.trim().to_string(),
    };
    let message = format!("HTTP {}: {}", status.as_u16(), detail);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => StoreError::Timeout(message),
        _ => match classify_command_error(&detail) {
            StoreError::PermissionDenied(_) => StoreError::PermissionDenied(message),
            _ => StoreError::Unavailable(message),
        },
    }
}

/// Classify a transport failure.
fn classify_transport(err: &reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn replies(json: &str) -> Vec<Reply> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_rejects_missing_endpoint_or_token() {
        assert!(matches!(
            RestStore::new("", "token", DEFAULT_TIMEOUT),
            Err(FloodgateError::Config(_))
        ));
        assert!(matches!(
            RestStore::new("https://store.example.com", "  ", DEFAULT_TIMEOUT),
            Err(FloodgateError::Config(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let store = RestStore::new("https://store.example.com/", "t", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(store.base_url(), "https://store.example.com");
    }

    #[test]
    fn test_parse_increment() {
        let entry =
            parse_increment("k", &replies(r#"[{"result":3},{"result":0},{"result":59000}]"#))
                .unwrap();
        assert_eq!(entry.count, 3);
        assert_eq!(entry.ttl_remaining, Some(Duration::from_millis(59_000)));
    }

    #[test]
    fn test_parse_increment_tolerates_expiry_failure() {
        let entry = parse_increment(
            "k",
            &replies(r#"[{"result":1},{"error":"ERR syntax error"},{"result":-1}]"#),
        )
        .unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.ttl_remaining, None);
    }

    #[test]
    fn test_parse_increment_missing_count_is_error() {
        assert!(matches!(
            parse_increment("k", &[]),
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            parse_increment("k", &replies(r#"[{"result":null}]"#)),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_parse_increment_noperm() {
        let err = parse_increment(
            "k",
            &replies(r#"[{"error":"NOPERM this user has no permissions to run the 'incr' command"}]"#),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::store::StoreErrorKind::PermissionDenied);
    }

    #[test]
    fn test_parse_read() {
        let entry = parse_read(&replies(r#"[{"result":"7"},{"result":1500}]"#))
            .unwrap()
            .unwrap();
        assert_eq!(entry.count, 7);
        assert_eq!(entry.ttl_remaining, Some(Duration::from_millis(1500)));

        assert_eq!(
            parse_read(&replies(r#"[{"result":null},{"result":-2}]"#)).unwrap(),
            None
        );
    }

    #[test]
    fn test_parse_read_rejects_garbage() {
        assert!(parse_read(&replies(r#"[{"result":"abc"}]"#)).is_err());
        assert!(parse_read(&replies(r#"[{"result":[1,2]}]"#)).is_err());
    }

    #[test]
    fn test_classify_command_error() {
        assert!(matches!(
            classify_command_error("NOPERM this user has no permissions to run the 'evalsha' command"),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_command_error("ERR NOPERM this user has no permissions to run the 'incr' command"),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_command_error("ERR NOAUTH Authentication required"),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_command_error("ERR Command is not allowed: script"),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_command_error("ERR max daily request limit exceeded"),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, r#"{"error":"Unauthorized"}"#),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, ""),
            StoreError::Timeout(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, r#"{"error":"NOPERM scripting disabled"}"#),
            StoreError::PermissionDenied(_)
        ));

        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(err, StoreError::Unavailable("HTTP 500: boom".to_string()));
    }

    #[tokio::test]
    async fn test_increment_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(json!([
                ["INCR", "ratelimit:general_api:1.2.3.4:7"],
                ["PEXPIRE", "ratelimit:general_api:1.2.3.4:7", "60000", "NX"],
                ["PTTL", "ratelimit:general_api:1.2.3.4:7"]
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"result": 4},
                {"result": 0},
                {"result": 30000}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "secret-token", DEFAULT_TIMEOUT).unwrap();
        let entry = store
            .increment_and_get("ratelimit:general_api:1.2.3.4:7", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(entry.count, 4);
        assert_eq!(entry.ttl_remaining, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_read_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(json!([["GET", "k"], ["PTTL", "k"]])))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"result": "12"}, {"result": 1500}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "secret-token", DEFAULT_TIMEOUT).unwrap();
        let entry = store.read("k").await.unwrap().unwrap();

        assert_eq!(entry.count, 12);
        assert_eq!(entry.ttl_remaining, Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn test_unauthorized_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .and(header("authorization", "Bearer wrong"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "Unauthorized"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "wrong", DEFAULT_TIMEOUT).unwrap();
        let err = store.read("k").await.unwrap_err();

        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_noperm_reply_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"error": "ERR NOPERM this user has no permissions to run the 'incr' command"}
            ])))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "t", DEFAULT_TIMEOUT).unwrap();
        let err = store
            .increment_and_get("k", Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        // Reserve a free port, then close it so connections are refused.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let store = RestStore::new(&format!("http://{}", addr), "t", DEFAULT_TIMEOUT).unwrap();
        let err = store
            .increment_and_get("k", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"result": 1}]))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "t", Duration::from_millis(100)).unwrap();
        let err = store
            .increment_and_get("k", Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Timeout(_)));
    }
}
