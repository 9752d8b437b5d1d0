/*
[INPUT]:  Environment selection, base URLs, access tokens
[OUTPUT]: Connection URL with the access token embedded
[POS]:    Endpoint layer - where and as whom to connect
[UPDATE]: When adding environments or changing token placement
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FeedError, Result};

/// Query parameter carrying the access token
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Deployment the feed connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedEnvironment {
    #[default]
    Development,
    Production,
}

impl FeedEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedEnvironment::Development => "development",
            FeedEnvironment::Production => "production",
        }
    }
}

impl fmt::Display for FeedEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedEnvironment {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(FeedEnvironment::Development),
            "production" | "prod" => Ok(FeedEnvironment::Production),
            other => Err(FeedError::Config(format!("unknown environment: {other}"))),
        }
    }
}

/// Resolved connection target
#[derive(Debug, Clone)]
pub struct Endpoint {
    environment: FeedEnvironment,
    development_url: Url,
    production_url: Url,
    development_token: Option<String>,
}

impl Endpoint {
    pub fn new(
        environment: FeedEnvironment,
        development_url: &str,
        production_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            environment,
            development_url: parse_ws_url(development_url)?,
            production_url: parse_ws_url(production_url)?,
            development_token: None,
        })
    }

    /// Token used outside production when no auth token is set.
    pub fn with_development_token(mut self, token: Option<String>) -> Self {
        self.development_token = token.filter(|token| !token.is_empty());
        self
    }

    pub fn environment(&self) -> FeedEnvironment {
        self.environment
    }

    pub fn base_url(&self) -> &Url {
        match self.environment {
            FeedEnvironment::Development => &self.development_url,
            FeedEnvironment::Production => &self.production_url,
        }
    }

    /// Explicit auth token, else the development token outside production.
    pub fn resolve_token<'a>(&'a self, auth_token: Option<&'a str>) -> Option<&'a str> {
        if let Some(token) = auth_token.filter(|token| !token.is_empty()) {
            return Some(token);
        }
        match self.environment {
            FeedEnvironment::Development => self.development_token.as_deref(),
            FeedEnvironment::Production => None,
        }
    }

    pub fn connection_url(&self, auth_token: Option<&str>) -> Url {
        let mut url = self.base_url().clone();
        if let Some(token) = self.resolve_token(auth_token) {
            url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        }
        url
    }
}

fn parse_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(FeedError::Config(format!(
            "unsupported scheme {scheme:?} in {raw}"
        ))),
    }
}
