//! OAuth2 installed-app flow for the Google Calendar API.
//!
//! Tokens live in `token.json` next to the Google-issued `client.json`. When no
//! token is stored yet the user is sent through the browser consent screen and
//! the code is picked up by a one-shot listener on a random localhost port.

use std::{
    io::{Read, Write},
    net::TcpListener,
    path::{Path, PathBuf},
};

use chrono::Utc;
use reqwest::{blocking::Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{self, ConfigError};

pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("client secrets not found at {0:?}")]
    MissingClientSecrets(PathBuf),
    #[error("client secrets file has neither an \"installed\" nor a \"web\" section")]
    InvalidClientSecrets,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("token endpoint rejected the request: {0}")]
    Rejected(String),
    #[error("authorization callback carried no code")]
    MissingCode,
    #[error("stored token has expired and has no refresh token")]
    MissingRefreshToken,
}

/// Supplies a bearer token for each calendar request.
pub trait TokenProvider {
    fn access_token(&mut self) -> Result<String, OAuthError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientConfig>,
    web: Option<ClientConfig>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, OAuthError> {
        let file: ClientSecretsFile = config::read_json(path)?
            .ok_or_else(|| OAuthError::MissingClientSecrets(path.to_path_buf()))?;
        file.installed
            .or(file.web)
            .ok_or(OAuthError::InvalidClientSecrets)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp.
    pub expires_at: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self, previous_refresh: Option<&str>) -> Result<OAuthTokens, OAuthError> {
        if let Some(error) = self.error {
            let detail = self
                .error_description
                .map(|desc| format!("{error}: {desc}"))
                .unwrap_or(error);
            return Err(OAuthError::Rejected(detail));
        }
        let access_token = self
            .access_token
            .ok_or_else(|| OAuthError::Rejected("response carried no access_token".into()))?;
        Ok(OAuthTokens {
            access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: self.expires_in.map(|secs| Utc::now().timestamp() + secs),
            token_type: self.token_type.unwrap_or_else(default_token_type),
            scope: self.scope,
        })
    }
}

/// True once the token is within a minute of expiring.
pub fn is_expired(tokens: &OAuthTokens, now: i64) -> bool {
    match tokens.expires_at {
        Some(exp) => now > exp - EXPIRY_MARGIN_SECS,
        None => false,
    }
}

/// An authorized session that refreshes and persists its own tokens.
pub struct OAuthSession {
    client: ClientConfig,
    tokens: OAuthTokens,
    token_path: PathBuf,
    http: Client,
}

impl OAuthSession {
    /// Uses the stored token when there is one, otherwise runs the browser flow.
    pub fn load_or_authorize(
        client_path: &Path,
        token_path: &Path,
        scopes: &[&str],
    ) -> Result<Self, OAuthError> {
        let client = ClientConfig::load(client_path)?;
        let http = Client::new();

        let tokens = match config::read_json::<OAuthTokens>(token_path) {
            Ok(Some(tokens)) => {
                debug!("loaded stored token from {:?}", token_path);
                tokens
            }
            Ok(None) => authorize(&http, &client, scopes, token_path)?,
            Err(err) => {
                warn!("ignoring unreadable token file: {err}");
                authorize(&http, &client, scopes, token_path)?
            }
        };

        Ok(Self {
            client,
            tokens,
            token_path: token_path.to_path_buf(),
            http,
        })
    }

    fn refresh(&mut self) -> Result<(), OAuthError> {
        let refresh = self
            .tokens
            .refresh_token
            .clone()
            .ok_or(OAuthError::MissingRefreshToken)?;
        debug!("refreshing access token");
        let response: TokenResponse = self
            .http
            .post(&self.client.token_uri)
            .form(&[
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("refresh_token", refresh.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()?
            .json()?;
        self.tokens = response.into_tokens(Some(&refresh))?;
        config::write_json(&self.token_path, &self.tokens)?;
        Ok(())
    }
}

impl TokenProvider for OAuthSession {
    fn access_token(&mut self) -> Result<String, OAuthError> {
        if is_expired(&self.tokens, Utc::now().timestamp()) {
            self.refresh()?;
        }
        Ok(self.tokens.access_token.clone())
    }
}

fn authorize(
    http: &Client,
    client: &ClientConfig,
    scopes: &[&str],
    token_path: &Path,
) -> Result<OAuthTokens, OAuthError> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());

    let auth_url = Url::parse_with_params(
        &client.auth_uri,
        [
            ("client_id", client.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scopes.join(" ").as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|err| OAuthError::Rejected(format!("bad auth uri: {err}")))?;

    info!("Please visit this URL to authorize this application: {auth_url}");
    if let Err(err) = open::that(auth_url.as_str()) {
        warn!("could not open a browser: {err}");
    }

    let (mut stream, _) = listener.accept()?;
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf)?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let code = extract_code(&request).ok_or(OAuthError::MissingCode)?;

    let reply = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html><body><p>The authentication flow has completed. You may close this window.</p></body></html>";
    stream.write_all(reply.as_bytes())?;
    drop(stream);

    let response: TokenResponse = http
        .post(&client.token_uri)
        .form(&[
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("code", code.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri.as_str()),
        ])
        .send()?
        .json()?;
    let tokens = response.into_tokens(None)?;
    config::write_json(token_path, &tokens)?;
    info!("stored new token at {:?}", token_path);
    Ok(tokens)
}

/// Pulls `code` out of the first line of the redirect request.
fn extract_code(request: &str) -> Option<String> {
    let first_line = request.lines().next()?;
    let path = first_line.split_whitespace().nth(1)?;
    let url = Url::parse(&format!("http://localhost{path}")).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn tokens(expires_at: Option<i64>) -> OAuthTokens {
        OAuthTokens {
            access_token: "old".into(),
            refresh_token: Some("refresh-me".into()),
            expires_at,
            token_type: "Bearer".into(),
            scope: None,
        }
    }

    #[test]
    fn expiry_uses_one_minute_margin() {
        assert!(!is_expired(&tokens(None), 1_000));
        assert!(!is_expired(&tokens(Some(1_100)), 1_000));
        assert!(is_expired(&tokens(Some(1_050)), 1_000));
        assert!(is_expired(&tokens(Some(900)), 1_000));
    }

    #[test]
    fn extracts_code_from_callback_request() {
        let request = "GET /?state=x&code=4%2Fabc&scope=cal HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        assert_eq!(extract_code(request).as_deref(), Some("4/abc"));
        assert_eq!(extract_code("GET /?error=access_denied HTTP/1.1\r\n"), None);
    }

    #[test]
    fn client_secrets_accept_installed_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("client.json");
        config::write_json(
            &path,
            &json!({ "installed": { "client_id": "id", "client_secret": "secret" } }),
        )
        .expect("write");

        let client = ClientConfig::load(&path).expect("load");
        assert_eq!(client.client_id, "id");
        assert_eq!(client.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn missing_client_secrets_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ClientConfig::load(&dir.path().join("client.json")).unwrap_err();
        assert!(matches!(err, OAuthError::MissingClientSecrets(_)));
    }

    #[test]
    fn expired_session_refreshes_and_persists() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-me".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(json!({ "access_token": "fresh", "expires_in": 3600 }).to_string())
            .create();

        let dir = tempfile::tempdir().expect("tempdir");
        let token_path = dir.path().join("token.json");
        let mut session = OAuthSession {
            client: ClientConfig {
                client_id: "id".into(),
                client_secret: "secret".into(),
                auth_uri: DEFAULT_AUTH_URI.into(),
                token_uri: format!("{}/token", server.url()),
            },
            tokens: tokens(Some(0)),
            token_path: token_path.clone(),
            http: Client::new(),
        };

        assert_eq!(session.access_token().expect("token"), "fresh");
        mock.assert();

        let stored: OAuthTokens = config::read_json(&token_path)
            .expect("read")
            .expect("stored");
        assert_eq!(stored.access_token, "fresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-me"));
    }

    #[test]
    fn token_errors_are_surfaced() {
        let response = TokenResponse {
            access_token: None,
            refresh_token: None,
            expires_in: None,
            token_type: None,
            scope: None,
            error: Some("invalid_grant".into()),
            error_description: Some("Token has been revoked.".into()),
        };
        let err = response.into_tokens(None).unwrap_err();
        assert!(matches!(err, OAuthError::Rejected(msg) if msg.contains("invalid_grant")));
    }
}
