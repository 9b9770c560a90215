//! API credential sources.
//!
//! A [`CredentialProvider`] yields the key used to authenticate the realtime
//! connection. Sources are tried in priority order by
//! [`ChainedCredentialProvider`]:
//!
//! 1. explicit key from the configuration file
//! 2. the site proxy (`GET {proxy}?action=get-api-key`)
//! 3. the `VOXY_API_KEY` environment variable
//! 4. a key file persisted from an earlier prompt
//! 5. an interactive prompt (optional)
//!
//! Keys are zeroized on drop and never printed in full.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::CredentialSettings;
use crate::core::realtime::{RealtimeError, RealtimeResult};

/// Environment variable holding the API key.
pub const API_KEY_ENV_VAR: &str = "VOXY_API_KEY";

/// Prefix every valid OpenAI key carries.
pub const DEFAULT_KEY_PREFIX: &str = "sk-";

const PROXY_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Credential
// =============================================================================

/// An API key. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    /// Wrap a key, trimming surrounding whitespace.
    pub fn new(key: impl Into<String>) -> Self {
        let mut key = key.into();
        let trimmed = key.trim().to_string();
        key.zeroize();
        Self(trimmed)
    }

    /// The raw key, for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the key starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Printable form showing at most the first three characters.
    pub fn redacted(&self) -> String {
        let visible: String = self.0.chars().take(3).collect();
        format!("{visible}***")
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

/// A credential is usable when non-empty and, if a prefix convention is
/// configured, carrying that prefix.
pub fn is_valid_credential(credential: &Credential, required_prefix: Option<&str>) -> bool {
    if credential.is_empty() {
        return false;
    }
    match required_prefix {
        Some(prefix) if !prefix.is_empty() => credential.has_prefix(prefix),
        _ => true,
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Source of API credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Fetch a credential. `Ok(None)` means this source has nothing to offer.
    async fn credential(&self) -> RealtimeResult<Option<Credential>>;
}

// =============================================================================
// Static
// =============================================================================

/// A key supplied directly (configuration file, tests).
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    /// Provide `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(key),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn credential(&self) -> RealtimeResult<Option<Credential>> {
        Ok(Some(self.credential.clone()))
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Reads the key from an environment variable at connect time.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    var: String,
}

impl EnvCredentialProvider {
    /// Read from `var`.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new(API_KEY_ENV_VAR)
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn credential(&self) -> RealtimeResult<Option<Credential>> {
        Ok(std::env::var(&self.var).ok().map(Credential::new))
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// Response body of `GET {proxy}?action=get-api-key`.
#[derive(Debug, Deserialize)]
struct ProxyKeyResponse {
    #[serde(rename = "apiKey", default)]
    api_key: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Fetches the key from the site's HTTP proxy.
#[derive(Debug, Clone)]
pub struct ProxyCredentialProvider {
    url: String,
    client: reqwest::Client,
}

impl ProxyCredentialProvider {
    /// Query the proxy at `url`.
    pub fn new(url: impl Into<String>) -> RealtimeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROXY_TIMEOUT)
            .build()
            .map_err(|e| {
                RealtimeError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl CredentialProvider for ProxyCredentialProvider {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn credential(&self) -> RealtimeResult<Option<Credential>> {
        debug!(url = %self.url, "Requesting API key from proxy");
        let response = self
            .client
            .get(&self.url)
            .query(&[("action", "get-api-key")])
            .send()
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(format!("Proxy request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RealtimeError::AuthenticationFailed(format!(
                "Proxy returned HTTP {status}"
            )));
        }

        let body: ProxyKeyResponse = response
            .json()
            .await
            .map_err(|e| RealtimeError::ProtocolError(format!("Invalid proxy response: {e}")))?;

        if body.status.as_deref() != Some("success") {
            warn!(
                "Proxy did not return a key: {}",
                body.error.as_deref().unwrap_or("no error given")
            );
            return Ok(None);
        }
        Ok(body.api_key.map(Credential::new))
    }
}

// =============================================================================
// File
// =============================================================================

/// A key persisted on disk.
#[derive(Debug, Clone)]
pub struct FileCredentialProvider {
    path: PathBuf,
}

impl FileCredentialProvider {
    /// Read from (and store to) `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `credential`, readable by the owner only.
    pub async fn store(&self, credential: &Credential) -> RealtimeResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    RealtimeError::InvalidConfiguration(format!(
                        "Failed to create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.path).await.map_err(|e| {
            RealtimeError::InvalidConfiguration(format!(
                "Failed to open key file {}: {e}",
                self.path.display()
            ))
        })?;
        file.write_all(credential.expose().as_bytes())
            .await
            .map_err(|e| {
                RealtimeError::InvalidConfiguration(format!(
                    "Failed to write key file {}: {e}",
                    self.path.display()
                ))
            })?;
        file.flush().await.map_err(|e| {
            RealtimeError::InvalidConfiguration(format!(
                "Failed to write key file {}: {e}",
                self.path.display()
            ))
        })?;
        info!("Stored API key {} in {}", credential.redacted(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn credential(&self) -> RealtimeResult<Option<Credential>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(mut contents) => {
                let credential = Credential::new(contents.as_str());
                contents.zeroize();
                Ok(Some(credential))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RealtimeError::InvalidConfiguration(format!(
                "Failed to read key file {}: {e}",
                self.path.display()
            ))),
        }
    }
}

// =============================================================================
// Prompt
// =============================================================================

type PromptReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Asks the user for a key on the terminal.
///
/// When a key file is attached, an entered key is persisted there so the
/// next run does not prompt again.
pub struct PromptCredentialProvider {
    reader: Mutex<PromptReader>,
    persist_to: Option<FileCredentialProvider>,
}

impl PromptCredentialProvider {
    /// Prompt on standard input.
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    /// Read answers from `reader`.
    pub fn from_reader(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Mutex::new(Box::new(reader)),
            persist_to: None,
        }
    }

    /// Persist entered keys to `file`.
    pub fn persist_to(mut self, file: FileCredentialProvider) -> Self {
        self.persist_to = Some(file);
        self
    }
}

#[async_trait]
impl CredentialProvider for PromptCredentialProvider {
    fn name(&self) -> &'static str {
        "prompt"
    }

    async fn credential(&self) -> RealtimeResult<Option<Credential>> {
        eprint!("Enter your OpenAI API key: ");
        let mut line = String::new();
        let read = self
            .reader
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| RealtimeError::Unsupported(format!("Failed to read from prompt: {e}")))?;
        if read == 0 {
            return Ok(None);
        }

        let credential = Credential::new(line.as_str());
        line.zeroize();
        if credential.is_empty() {
            return Ok(None);
        }
        if let Some(file) = &self.persist_to {
            if let Err(e) = file.store(&credential).await {
                warn!("Could not persist entered key: {}", e);
            }
        }
        Ok(Some(credential))
    }
}

// =============================================================================
// Chain
// =============================================================================

/// Tries providers in order and returns the first valid credential.
pub struct ChainedCredentialProvider {
    providers: Vec<Box<dyn CredentialProvider>>,
    required_prefix: Option<String>,
}

impl ChainedCredentialProvider {
    /// Chain `providers`, requiring the default `sk-` prefix.
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self {
            providers,
            required_prefix: Some(DEFAULT_KEY_PREFIX.to_string()),
        }
    }

    /// Override the prefix convention (`None` disables the check).
    pub fn with_required_prefix(mut self, prefix: Option<String>) -> Self {
        self.required_prefix = prefix;
        self
    }

    /// Build the chain described by the configuration.
    pub fn from_settings(settings: &CredentialSettings) -> RealtimeResult<Self> {
        let mut providers: Vec<Box<dyn CredentialProvider>> = Vec::new();
        if let Some(key) = &settings.api_key {
            providers.push(Box::new(StaticCredentialProvider::new(key.as_str())));
        }
        if let Some(url) = &settings.proxy_url {
            providers.push(Box::new(ProxyCredentialProvider::new(url.as_str())?));
        }
        providers.push(Box::new(EnvCredentialProvider::default()));
        let key_file = settings.key_file.clone().map(FileCredentialProvider::new);
        if let Some(file) = &key_file {
            providers.push(Box::new(file.clone()));
        }
        if settings.prompt {
            let mut prompt = PromptCredentialProvider::stdin();
            if let Some(file) = key_file {
                prompt = prompt.persist_to(file);
            }
            providers.push(Box::new(prompt));
        }
        Ok(Self::new(providers).with_required_prefix(settings.required_prefix.clone()))
    }

    /// Names of the chained providers in priority order.
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl CredentialProvider for ChainedCredentialProvider {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn credential(&self) -> RealtimeResult<Option<Credential>> {
        for provider in &self.providers {
            match provider.credential().await {
                Ok(Some(credential))
                    if is_valid_credential(&credential, self.required_prefix.as_deref()) =>
                {
                    info!(
                        "Using API key {} from {} source",
                        credential.redacted(),
                        provider.name()
                    );
                    return Ok(Some(credential));
                }
                Ok(Some(credential)) => {
                    warn!(
                        "Ignoring invalid API key {} from {} source",
                        credential.redacted(),
                        provider.name()
                    );
                }
                Ok(None) => debug!("No API key from {} source", provider.name()),
                Err(e) => warn!("Credential source {} failed: {}", provider.name(), e),
            }
        }
        Ok(None)
    }
}
