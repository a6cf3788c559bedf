//! Google API adapters over direct HTTP (reqwest).
//!
//! Token format is compatible with the `token.json` written by Google's
//! Python OAuth library. The consent flow itself is not handled here: an
//! already-issued access token is read from the environment, or a token
//! file is read and refreshed when expired.
//!
//! Modules:
//! - calendar: Google Calendar API v3 (`CalendarSource`)
//! - gmail: Gmail API v1 thread search (`MailboxSource`) and send (`MailTransport`)

pub mod calendar;
pub mod gmail;

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{CollaboratorError, ExecutionError};
use crate::types::GoogleConfig;

pub use calendar::GoogleCalendar;
pub use gmail::{Gmail, GmailTransport};

/// OAuth2 scopes the token must carry.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/calendar.readonly",
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
];

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 token payload as persisted on disk.
///
/// Both `token` and `access_token` are accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry time (ISO 8601)
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Default token file location.
pub fn default_token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".preread")
        .join("google")
        .join("token.json")
}

/// Map a non-success HTTP status to a collaborator error.
pub fn classify_status(status: reqwest::StatusCode, body: String) -> CollaboratorError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED => CollaboratorError::Unauthorized,
        reqwest::StatusCode::TOO_MANY_REQUESTS => CollaboratorError::RateLimited,
        _ => CollaboratorError::Api {
            status: status.as_u16(),
            message: body.chars().take(300).collect(),
        },
    }
}

/// Required scopes absent from the token. A token that lists no scopes at
/// all is not judged.
pub fn missing_scopes(token: &GoogleToken) -> Vec<&'static str> {
    if token.scopes.is_empty() {
        return Vec::new();
    }
    SCOPES
        .iter()
        .copied()
        .filter(|scope| !token.scopes.iter().any(|s| s == scope))
        .collect()
}

/// Check if a token is expired based on its expiry field.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry_str) => match chrono::DateTime::parse_from_rfc3339(expiry_str) {
            // Expired if within 60 seconds of expiry
            Ok(expiry) => expiry <= chrono::Utc::now() + chrono::Duration::seconds(60),
            Err(_) => true,
        },
    }
}

// ============================================================================
// Access tokens
// ============================================================================

enum TokenSource {
    /// Token supplied through the environment; used as-is.
    Static(String),
    /// Token file; refreshed and rewritten when expired.
    File {
        path: PathBuf,
        cached: Mutex<Option<GoogleToken>>,
    },
}

/// Hands out bearer tokens to the adapters. Concurrent refreshes are
/// serialized by the cache lock.
pub struct TokenProvider {
    source: TokenSource,
    http: reqwest::Client,
}

impl TokenProvider {
    pub fn from_config(config: &GoogleConfig) -> Result<Self, ExecutionError> {
        if let Some(token) = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
        {
            return Ok(Self::fixed(token));
        }

        let path = config
            .token_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_token_path);
        if !path.exists() {
            return Err(ExecutionError::ConfigurationError(format!(
                "No Google token: set ${} or provide {}",
                config.token_env,
                path.display()
            )));
        }
        Ok(Self {
            source: TokenSource::File {
                path,
                cached: Mutex::new(None),
            },
            http: reqwest::Client::new(),
        })
    }

    pub fn fixed(token: String) -> Self {
        Self {
            source: TokenSource::Static(token),
            http: reqwest::Client::new(),
        }
    }

    /// A currently valid access token.
    pub async fn access_token(&self) -> Result<String, CollaboratorError> {
        let (path, cached) = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::File { path, cached } => (path, cached),
        };

        let mut cached = cached.lock().await;
        let token = match cached.take() {
            Some(token) => token,
            None => {
                let token = load_token_file(path)?;
                let missing = missing_scopes(&token);
                if !missing.is_empty() {
                    log::warn!("Google token is missing scopes: {}", missing.join(", "));
                }
                token
            }
        };

        let token = if is_token_expired(&token) {
            let refreshed = self.refresh(&token).await?;
            if let Err(e) = save_token_file(path, &refreshed) {
                log::warn!("Could not persist refreshed Google token: {}", e);
            }
            refreshed
        } else {
            token
        };

        let access = token.token.clone();
        *cached = Some(token);
        Ok(access)
    }

    async fn refresh(&self, token: &GoogleToken) -> Result<GoogleToken, CollaboratorError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(CollaboratorError::Unauthorized)?;

        let mut form = vec![
            ("client_id", token.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = token.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self.http.post(&token.token_uri).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 400 && body.contains("invalid_grant") {
                return Err(CollaboratorError::Unauthorized);
            }
            return Err(classify_status(status, body));
        }

        let body: serde_json::Value = resp.json().await?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| CollaboratorError::Malformed("no access_token in refresh response".into()))?;
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);

        log::info!("Refreshed Google access token");
        let mut refreshed = token.clone();
        refreshed.token = access_token.to_string();
        refreshed.expiry =
            Some((chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64)).to_rfc3339());
        Ok(refreshed)
    }
}

fn load_token_file(path: &PathBuf) -> Result<GoogleToken, CollaboratorError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CollaboratorError::Transport(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| CollaboratorError::Malformed(format!("{}: {}", path.display(), e)))
}

fn save_token_file(path: &PathBuf, token: &GoogleToken) -> std::io::Result<()> {
    let content = serde_json::to_string_pretty(token)?;
    std::fs::write(path, content)
}

// ============================================================================
// Shared HTTP client
// ============================================================================

/// Authenticated client shared by every Google adapter.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
}

impl GoogleClient {
    pub fn new(tokens: Arc<TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
        }
    }

    /// GET `url` and decode the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, CollaboratorError> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        decode(resp).await
    }

    /// POST `body` as JSON to `url` and decode the JSON reply.
    pub(crate) async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, CollaboratorError> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, CollaboratorError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_status(status, body));
    }
    Ok(resp.json().await?)
}

// ============================================================================
// Tests
// ============================================================================
