//! Common types for BMC operations

use std::time::Duration;

use crate::error::{BmcError, Result};

/// Default per-message timeout for a single HTTP exchange
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Power state of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Machine is powered on
    On,
    /// Machine is powered off
    Off,
    /// Power state is unknown
    Unknown,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// HTTP method used for an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Status query, no body
    Get,
    /// Power action with a body
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Identity of one submitted exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// HTTP basic auth credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create new credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse a `user:passwd` string
    ///
    /// Only the first colon separates the two halves, so passwords may
    /// contain colons.
    pub fn parse(userpwd: &str) -> Result<Self> {
        match userpwd.split_once(':') {
            Some((user, pass)) if !user.is_empty() => Ok(Self::new(user, pass)),
            _ => Err(BmcError::InvalidConfig(format!(
                "expected user:passwd, got '{}'",
                userpwd
            ))),
        }
    }
}

// Keep passwords out of debug logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One extra header sent with every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraHeader {
    name: String,
    value: String,
}

impl ExtraHeader {
    /// Parse a `Name: value` header line
    pub fn parse(line: &str) -> Result<Self> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| BmcError::InvalidConfig(format!("header '{}' has no ':'", line)))?;

        let name = name.trim();
        let valid_name = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
        if !valid_name {
            return Err(BmcError::InvalidConfig(format!(
                "invalid header name '{}'",
                name
            )));
        }

        Ok(Self {
            name: name.to_string(),
            value: value.trim().to_string(),
        })
    }

    /// Header name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header value
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for ExtraHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// A fully resolved request, ready to hand to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerRequest {
    /// Absolute URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Request body (POST only)
    pub body: Option<String>,
    /// Extra header
    pub header: Option<ExtraHeader>,
    /// Basic auth credentials
    pub credentials: Option<Credentials>,
}

impl PowerRequest {
    /// Status query against `https://<host>/<path>`
    pub fn get(host: &str, path: &str) -> Self {
        Self {
            url: redfish_url(host, path),
            method: Method::Get,
            body: None,
            header: None,
            credentials: None,
        }
    }

    /// Power action POST against `https://<host>/<path>`
    pub fn post(host: &str, path: &str, body: impl Into<String>) -> Self {
        Self {
            url: redfish_url(host, path),
            method: Method::Post,
            body: Some(body.into()),
            header: None,
            credentials: None,
        }
    }

    /// Attach an extra header
    pub fn with_header(mut self, header: Option<ExtraHeader>) -> Self {
        self.header = header;
        self
    }

    /// Attach basic auth credentials
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Build the URL for a BMC path. A leading slash on `path` is not doubled.
pub fn redfish_url(host: &str, path: &str) -> String {
    format!("https://{}/{}", host, path.trim_start_matches('/'))
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for a single exchange
    pub message_timeout: Duration,
    /// Skip TLS verification (BMCs mostly ship self-signed certs)
    pub insecure: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            insecure: true,
        }
    }
}

impl TransportConfig {
    /// Set the per-message timeout
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Allow insecure TLS (self-signed certs)
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }
}
