//! Process-wide request configuration.
//!
//! # Design
//! `Config` is an explicit, passable object rather than hidden module state:
//! tests construct one per run and the engine receives it as a parameter.
//! Credential and header fields are [`Resolvable`] so a caller can store a
//! literal, a synchronous closure, or an async closure; whichever variant is
//! stored is re-resolved on every request and never cached, so a resolver
//! that reads an external credential store always sees the current value.
//! Resolver closures live behind `Arc`, which keeps `Config` cheap to clone —
//! the engine snapshots it per call, so a mutation racing an in-flight
//! request only affects calls issued afterwards.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use reqwest::cookie::Jar;

use crate::error::ApiError;
use crate::request::Descriptor;

/// A configuration value that is either a literal or a resolver invoked with
/// the in-flight descriptor.
pub enum Resolvable<T> {
    Value(T),
    Sync(Arc<dyn Fn(&Descriptor) -> T + Send + Sync>),
    Async(Arc<dyn Fn(&Descriptor) -> BoxFuture<'static, T> + Send + Sync>),
}

impl<T> Resolvable<T> {
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    pub fn resolver(f: impl Fn(&Descriptor) -> T + Send + Sync + 'static) -> Self {
        Self::Sync(Arc::new(f))
    }

    pub fn async_resolver<F, Fut>(f: F) -> Self
    where
        F: Fn(&Descriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self::Async(Arc::new(move |descriptor: &Descriptor| {
            let fut: BoxFuture<'static, T> = Box::pin(f(descriptor));
            fut
        }))
    }
}

impl<T: Clone> Resolvable<T> {
    /// Produce the current value for one request, awaiting async resolvers.
    pub async fn resolve(&self, descriptor: &Descriptor) -> T {
        match self {
            Self::Value(value) => value.clone(),
            Self::Sync(f) => f(descriptor),
            Self::Async(f) => f(descriptor).await,
        }
    }
}

impl<T: Clone> Clone for Resolvable<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
        }
    }
}

impl<T: Default> Default for Resolvable<T> {
    fn default() -> Self {
        Self::Value(T::default())
    }
}

impl<T> From<T> for Resolvable<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolvable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Sync(_) => f.write_str("Sync(<resolver>)"),
            Self::Async(_) => f.write_str("Async(<resolver>)"),
        }
    }
}

/// Whether ambient credentials (cookies) accompany a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    #[default]
    Include,
    Omit,
    SameOrigin,
}

/// A persistent client-side key/value store holding issued credentials.
/// The store itself is an external collaborator; the engine only reads it
/// through a token resolver.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Hook for callers that need custom path-segment encoding, e.g. to preserve
/// literal slashes in an identifier.
pub type PathEncoder = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Transport state shared by a config and every snapshot cloned from it:
/// the ambient cookie jar and one lazily-built HTTP client per credentials
/// mode. Living behind one `Arc`, a cookie issued by one response is visible
/// to every later call made from the same config, and the connection pool
/// survives across calls.
pub(crate) struct TransportState {
    jar: Arc<Jar>,
    plain: OnceLock<reqwest::Client>,
    ambient: OnceLock<reqwest::Client>,
}

impl TransportState {
    fn new() -> Self {
        Self {
            jar: Arc::new(Jar::default()),
            plain: OnceLock::new(),
            ambient: OnceLock::new(),
        }
    }

    /// The client for the requested mode, built on first use. A racing
    /// initializer may lose the slot; either client is equivalent.
    pub(crate) fn client(&self, ambient: bool) -> Result<reqwest::Client, ApiError> {
        let slot = if ambient { &self.ambient } else { &self.plain };
        if let Some(client) = slot.get() {
            return Ok(client.clone());
        }
        let builder = reqwest::Client::builder();
        let builder = if ambient {
            builder.cookie_provider(Arc::clone(&self.jar))
        } else {
            builder
        };
        let client = builder
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let _ = slot.set(client.clone());
        Ok(client)
    }
}

/// Process-wide request configuration, read fresh on every call.
#[derive(Clone)]
pub struct Config {
    pub base: String,
    pub version: String,
    pub with_credentials: bool,
    pub credentials_mode: CredentialsMode,
    pub token: Resolvable<Option<String>>,
    pub username: Resolvable<Option<String>>,
    pub password: Resolvable<Option<String>>,
    pub headers: Resolvable<Vec<(String, String)>>,
    pub encode_path: Option<PathEncoder>,
    pub(crate) transport: Arc<TransportState>,
}

impl Config {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            version: "1".to_string(),
            with_credentials: false,
            credentials_mode: CredentialsMode::default(),
            token: Resolvable::Value(None),
            username: Resolvable::Value(None),
            password: Resolvable::Value(None),
            headers: Resolvable::Value(Vec::new()),
            encode_path: None,
            transport: Arc::new(TransportState::new()),
        }
    }

    /// Seed a config from the environment at process start: `API_BASE`,
    /// `API_VERSION`, and `API_TOKEN`. Missing variables keep the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::new(&std::env::var("API_BASE").unwrap_or_default());
        if let Ok(version) = std::env::var("API_VERSION") {
            if !version.is_empty() {
                config.version = version;
            }
        }
        if let Ok(token) = std::env::var("API_TOKEN") {
            if !token.is_empty() {
                config.token = Resolvable::Value(Some(token));
            }
        }
        config
    }

    /// Wire the token to a named entry in a credential store. The store is
    /// read on every request, so a credential injected after sign-in is
    /// picked up by the next call without touching the config again.
    pub fn token_from_store(&mut self, store: Arc<dyn CredentialStore>, key: impl Into<String>) {
        let key = key.into();
        self.token = Resolvable::resolver(move |_| store.get(&key));
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base", &self.base)
            .field("version", &self.version)
            .field("with_credentials", &self.with_credentials)
            .field("credentials_mode", &self.credentials_mode)
            .field("token", &"<credential>")
            .field("username", &"<credential>")
            .field("password", &"<credential>")
            .field("headers", &self.headers)
            .field("encode_path", &self.encode_path.as_ref().map(|_| "<hook>"))
            .finish_non_exhaustive()
    }
}
