use crate::cache::{Clock, TtlCache};
use crate::egress::EgressClient;
use crate::errors::ProxyError;
use crate::metrics_defs::{IDENTITY_CACHE_HIT, IDENTITY_CACHE_MISS};
use http::HeaderMap;
use http::header::{COOKIE, HeaderValue};
use serde::Deserialize;
use shared::counter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const SESSION_COOKIE: &str = "kbase_session";
pub const SESSION_COOKIE_BACKUP: &str = "kbase_session_backup";

pub const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(300);

/// KBase session token taken from the browser's cookies.
///
/// This is a credential: it is never logged and its `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Reads `kbase_session`, falling back to `kbase_session_backup` when the
    /// primary cookie is absent or empty.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        [SESSION_COOKIE, SESSION_COOKIE_BACKUP]
            .into_iter()
            .find_map(|name| cookie_value(headers, name))
            .map(|value| SessionToken(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Authorization: <token>`, as the auth service expects it.
    pub fn authorization(&self) -> Result<HeaderValue, ProxyError> {
        sensitive_header(&self.0)
    }

    /// `Authorization: Bearer <token>`, as the cluster manager expects it.
    pub fn bearer(&self) -> Result<HeaderValue, ProxyError> {
        sensitive_header(&format!("Bearer {}", self.0))
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

impl From<&str> for SessionToken {
    fn from(token: &str) -> Self {
        SessionToken(token.to_string())
    }
}

fn sensitive_header(value: &str) -> Result<HeaderValue, ProxyError> {
    let mut header = HeaderValue::from_str(value).map_err(|_| ProxyError::InvalidToken)?;
    header.set_sensitive(true);
    Ok(header)
}

/// Value of the first non-empty cookie named `name`, across every `Cookie` header.
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(key, _)| key.trim() == name)
        .map(|(_, value)| unquote(value.trim()))
        .find(|value| !value.is_empty())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[derive(Deserialize)]
struct WhoAmI {
    user: String,
}

#[derive(Deserialize)]
struct AuthErrorBody {
    error: AuthErrorDetail,
}

#[derive(Deserialize)]
struct AuthErrorDetail {
    message: String,
}

/// Resolves session tokens to usernames through the KBase auth service,
/// remembering each answer for [`IDENTITY_CACHE_TTL`].
pub struct IdentityResolver {
    client: EgressClient,
    identity_url: String,
    cache: TtlCache<String>,
}

impl IdentityResolver {
    pub fn new(client: EgressClient, identity_url: String, clock: Arc<dyn Clock>) -> Self {
        IdentityResolver {
            client,
            identity_url,
            cache: TtlCache::new(IDENTITY_CACHE_TTL, clock),
        }
    }

    pub async fn resolve_username(&self, token: &SessionToken) -> Result<String, ProxyError> {
        if let Some(username) = self.cache.get(token.as_str()) {
            counter!(IDENTITY_CACHE_HIT).increment(1);
            return Ok(username);
        }
        counter!(IDENTITY_CACHE_MISS).increment(1);

        let response = self
            .client
            .get(&self.identity_url, Some(token.authorization()?))
            .await
            .map_err(|e| match e {
                ProxyError::UpstreamStatus { status, body, .. } => ProxyError::AuthRejected {
                    status,
                    message: auth_error_message(&body)
                        .or_else(|| status.canonical_reason().map(String::from))
                        .unwrap_or_else(|| status.to_string()),
                },
                other => other,
            })?;

        let whoami: WhoAmI = serde_json::from_slice(&response.body).map_err(|e| {
            ProxyError::InvalidUpstreamResponse(format!("auth service response: {e}"))
        })?;

        tracing::debug!(username = %whoami.user, "validated session token");
        self.cache.insert(token.as_str().to_string(), whoami.user.clone());
        Ok(whoami.user)
    }
}

/// The auth service reports failures as `{"error": {"message": ...}}`.
fn auth_error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<AuthErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{ManualClock, StubUpstream, TEST_USER, start_identity_stub};
    use http::StatusCode;
    use hyper::Method;
    use std::collections::HashMap;

    fn cookie_headers(cookies: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for cookie in cookies {
            headers.append(COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        headers
    }

    fn resolver(identity: &StubUpstream, clock: Arc<ManualClock>) -> IdentityResolver {
        let client = EgressClient::new(&HashMap::new()).unwrap();
        IdentityResolver::new(client, format!("{}/api/V2/me", identity.url()), clock)
    }

    #[test]
    fn test_token_from_cookies() {
        let headers = cookie_headers(&["_xsrf=abc; kbase_session=TOKEN1; other=1"]);
        assert_eq!(
            SessionToken::from_headers(&headers),
            Some(SessionToken::from("TOKEN1"))
        );

        let headers = cookie_headers(&["kbase_session_backup=TOKEN2"]);
        assert_eq!(
            SessionToken::from_headers(&headers),
            Some(SessionToken::from("TOKEN2"))
        );

        // An empty primary cookie falls through to the backup
        let headers = cookie_headers(&["kbase_session=", "kbase_session_backup=\"TOKEN3\""]);
        assert_eq!(
            SessionToken::from_headers(&headers),
            Some(SessionToken::from("TOKEN3"))
        );

        let headers = cookie_headers(&["kbase_session_other=x; session=y"]);
        assert_eq!(SessionToken::from_headers(&headers), None);
        assert_eq!(SessionToken::from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn test_token_is_redacted() {
        let token = SessionToken::from("SECRET");
        assert!(!format!("{token:?}").contains("SECRET"));
        assert_eq!(token.bearer().unwrap(), "Bearer SECRET");
        assert!(token.authorization().unwrap().is_sensitive());
        assert!(matches!(
            SessionToken::from("bad\ntoken").authorization(),
            Err(ProxyError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_username_is_cached_for_ttl() {
        let identity = start_identity_stub().await;
        let clock = Arc::new(ManualClock::new());
        let resolver = resolver(&identity, clock.clone());
        let token = SessionToken::from("TOKEN");

        assert_eq!(resolver.resolve_username(&token).await.unwrap(), TEST_USER);
        assert_eq!(resolver.resolve_username(&token).await.unwrap(), TEST_USER);
        assert_eq!(identity.hits(Method::GET, "/api/V2/me"), 1);
        assert_eq!(
            identity.last_authorization(Method::GET, "/api/V2/me").as_deref(),
            Some("TOKEN")
        );

        clock.advance(Duration::from_secs(299));
        resolver.resolve_username(&token).await.unwrap();
        assert_eq!(identity.hits(Method::GET, "/api/V2/me"), 1);

        clock.advance(Duration::from_secs(1));
        resolver.resolve_username(&token).await.unwrap();
        assert_eq!(identity.hits(Method::GET, "/api/V2/me"), 2);

        // Distinct tokens are validated separately
        resolver
            .resolve_username(&SessionToken::from("OTHER"))
            .await
            .unwrap();
        assert_eq!(identity.hits(Method::GET, "/api/V2/me"), 3);
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let identity = StubUpstream::start().await;
        identity.respond(
            Method::GET,
            "/api/V2/me",
            401,
            r#"{"error": {"httpcode": 401, "message": "10020 Invalid token"}}"#,
        );
        let resolver = resolver(&identity, Arc::new(ManualClock::new()));
        let token = SessionToken::from("EXPIRED");

        let err = resolver.resolve_username(&token).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(err.to_string().contains("10020 Invalid token"));

        // Failures are not cached
        let _ = resolver.resolve_username(&token).await;
        assert_eq!(identity.hits(Method::GET, "/api/V2/me"), 2);
    }

    #[tokio::test]
    async fn test_malformed_identity_response() {
        let identity = StubUpstream::start().await;
        identity.respond(Method::GET, "/api/V2/me", 200, r#"{"display": "no user"}"#);
        let resolver = resolver(&identity, Arc::new(ManualClock::new()));

        let err = resolver
            .resolve_username(&SessionToken::from("TOKEN"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidUpstreamResponse(_)));
    }
}
