use crate::types::{ACCESS_TOKEN_PARAM, Result, TorcError, service_methods};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    accesstoken: Option<String>,
}

/// Requests a WebSocket token from the services endpoint.
///
/// Servers without authentication still answer, so the token is usually
/// present even when it is meaningless.
pub struct TokenFetcher {
    url: Url,
    client: reqwest::Client,
}

impl TokenFetcher {
    pub fn new(endpoint: &str, services_path: &str) -> Result<Self> {
        Ok(Self {
            url: token_url(endpoint, services_path)?,
            client: reqwest::Client::new(),
        })
    }

    /// GET `<services path>GetWebSocketToken` and return its `accesstoken`
    pub async fn fetch(&self) -> Result<String> {
        tracing::debug!("Requesting WebSocket token from {}", self.url);
        let response = self
            .client
            .get(self.url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TorcError::Connection(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(TorcError::Auth(format!(
                "Token request failed with status: {}",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        let token = body
            .accesstoken
            .ok_or_else(|| TorcError::Auth("Token response has no accesstoken".to_string()))?;

        tracing::debug!("Received WebSocket token");
        Ok(token)
    }
}

fn with_scheme(endpoint: &str, secure: &str, plain: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint)?;
    let scheme = match url.scheme() {
        "https" | "wss" => secure,
        "http" | "ws" => plain,
        other => {
            return Err(TorcError::Connection(format!(
                "Unsupported endpoint scheme '{}'",
                other
            )));
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| TorcError::Connection(format!("Cannot use scheme '{}' for {}", scheme, endpoint)))?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Converts a WebSocket or HTTP endpoint to its HTTP form
pub fn http_endpoint(endpoint: &str) -> Result<Url> {
    with_scheme(endpoint, "https", "http")
}

/// Converts a WebSocket or HTTP endpoint to its WebSocket form
pub fn ws_endpoint(endpoint: &str) -> Result<Url> {
    with_scheme(endpoint, "wss", "ws")
}

/// URL of the token endpoint under the services path
pub fn token_url(endpoint: &str, services_path: &str) -> Result<Url> {
    let base = http_endpoint(endpoint)?;
    let path = format!("{}{}", services_path, service_methods::GET_WEBSOCKET_TOKEN);
    Ok(base.join(&path)?)
}

/// WebSocket URL carrying the token as a query parameter
pub fn websocket_url(endpoint: &str, token: &str) -> Result<String> {
    let mut url = ws_endpoint(endpoint)?;
    url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
    Ok(url.to_string())
}
