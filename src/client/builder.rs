//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use bap_client::Client;
//!
//! # fn example() -> bap_client::Result<()> {
//! let client = Client::builder()
//!     .url("ws://localhost:9222")
//!     .token("secret")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::ProtocolVersion;
use crate::transport::{ReconnectPolicy, Transport};

use super::session::Client;
use super::dispatcher::DEFAULT_MAX_PENDING;
use super::options::{
    ClientOptions, DEFAULT_CLIENT_NAME, DEFAULT_CLIENT_VERSION, DEFAULT_EVENTS, DEFAULT_TIMEOUT,
    DEFAULT_URL, TransportKind,
};

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] instance.
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ClientBuilder {
    /// Server endpoint, parsed in `build()`.
    url: String,
    /// Authentication token.
    token: Option<String>,
    /// Client name for the handshake.
    client_name: String,
    /// Client version for the handshake.
    client_version: String,
    /// Default call timeout.
    timeout: Duration,
    /// Event categories to subscribe to.
    events: Vec<String>,
    /// Explicit transport kind; inferred from the scheme when unset.
    transport_kind: Option<TransportKind>,
    /// Auto-reconnect policy.
    reconnect: Option<ReconnectPolicy>,
    /// Announced protocol version.
    protocol_version: ProtocolVersion,
    /// Pending call ceiling.
    max_pending: usize,
    /// Pre-built transport, bypassing URL-based construction.
    transport: Option<Arc<dyn Transport>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token: None,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            events: DEFAULT_EVENTS.iter().map(ToString::to_string).collect(),
            transport_kind: None,
            reconnect: None,
            protocol_version: ProtocolVersion::current(),
            max_pending: DEFAULT_MAX_PENDING,
            transport: None,
        }
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("client_name", &self.client_name)
            .field("timeout", &self.timeout)
            .field("events", &self.events)
            .field("transport_kind", &self.transport_kind)
            .field("reconnect", &self.reconnect)
            .field("protocol_version", &self.protocol_version)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server URL (`ws://`, `wss://`, `http://` or `https://`).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the authentication token.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the client name and version announced in the handshake.
    #[inline]
    #[must_use]
    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    /// Sets the default per-call timeout.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the event categories subscribed to after the handshake.
    ///
    /// An empty list skips `events/subscribe` entirely.
    #[must_use]
    pub fn events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Forces the wire transport instead of inferring it from the scheme.
    #[inline]
    #[must_use]
    pub fn transport_kind(mut self, kind: TransportKind) -> Self {
        self.transport_kind = Some(kind);
        self
    }

    /// Enables auto-reconnect.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Overrides the protocol version announced in the handshake.
    #[inline]
    #[must_use]
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Sets the maximum number of concurrent pending calls.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Uses a pre-built transport. The URL is still validated but not dialed.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the configuration without creating a client.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn options(&self) -> Result<ClientOptions> {
        let url = self.validate_url()?;
        let transport = self.validate_transport_kind(&url)?;
        self.validate_limits()?;

        Ok(ClientOptions {
            url,
            token: self.token.clone(),
            client_name: self.client_name.clone(),
            client_version: self.client_version.clone(),
            timeout: self.timeout,
            events: self.events.clone(),
            transport,
            reconnect: self.reconnect,
            protocol_version: self.protocol_version,
            max_pending: self.max_pending,
        })
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::Config`] if the scheme, token, timeout, pending limit or
    ///   reconnect policy is invalid
    pub fn build(self) -> Result<Client> {
        let options = self.options()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => options.create_transport()?,
        };
        Ok(Client::with_transport(options, transport))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn validate_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;

        if TransportKind::from_scheme(url.scheme()).is_none() {
            return Err(Error::config(format!(
                "Unsupported URL scheme '{}'. Use ws://, wss://, http:// or https://\n\
                 Example: Client::builder().url(\"ws://localhost:9222\")",
                url.scheme()
            )));
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::config(format!("URL has no host: {url}")));
        }

        Ok(url)
    }

    fn validate_transport_kind(&self, url: &Url) -> Result<TransportKind> {
        let inferred = TransportKind::from_scheme(url.scheme());
        match (self.transport_kind, inferred) {
            (Some(kind), Some(scheme_kind)) if kind != scheme_kind => Err(Error::config(format!(
                "{kind:?} transport cannot use a {}:// URL",
                url.scheme()
            ))),
            (Some(kind), _) => Ok(kind),
            (None, Some(kind)) => Ok(kind),
            (None, None) => Err(Error::config("Cannot infer transport from URL")),
        }
    }

    fn validate_limits(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::config("Timeout must be greater than zero"));
        }

        if self.max_pending == 0 {
            return Err(Error::config("max_pending must be at least 1"));
        }

        if self.token.as_deref().is_some_and(str::is_empty) {
            return Err(Error::config("Token must not be empty"));
        }

        if let Some(policy) = self.reconnect
            && policy.max_attempts == 0
        {
            return Err(Error::config("Reconnect policy needs at least one attempt"));
        }

        if self.client_name.trim().is_empty() {
            return Err(Error::config("Client name must not be empty"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
