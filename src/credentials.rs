//! Which API key is active for a call.
//!
//! Resolution order is the manual override, then the environment default. The
//! video call class additionally honours a platform credential selection made
//! through a host-provided chooser. A call resolves its key once, up front, and
//! keeps that value for its whole lifetime; later changes only affect later
//! calls.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{StudioError, StudioResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// Prompt extraction, image generation, enhancement and speech.
    General,
    /// Long-running video generation.
    Video,
}

/// A resolved key, captured by value at the start of a call.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredential(String);

impl ApiCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiCredential(***)")
    }
}

/// Where the environment default comes from.
#[derive(Debug, Clone)]
pub enum DefaultSource {
    /// Read the named variable on every resolution.
    Env(String),
    Fixed(Option<String>),
}

impl DefaultSource {
    fn read(&self) -> Option<String> {
        let value = match self {
            Self::Env(name) => std::env::var(name).ok(),
            Self::Fixed(v) => v.clone(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// Host-provided UI for picking a platform credential.
#[async_trait]
pub trait PlatformChooser: Send + Sync {
    async fn open_select(&self);
    async fn has_selection(&self) -> bool;
}

/// Persistence for the manual override.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> StudioResult<Option<String>>;
    fn save(&self, token: &str) -> StudioResult<()>;
    fn clear(&self) -> StudioResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    #[serde(rename = "manualApiKey")]
    manual_api_key: String,
}

/// Keeps the manual key in a small JSON file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> StudioResult<Option<String>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StudioError::CredentialStore(e.to_string())),
        };
        let stored: StoredCredential = serde_json::from_str(&raw)
            .map_err(|e| StudioError::CredentialStore(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(stored.manual_api_key).filter(|k| !k.is_empty()))
    }

    fn save(&self, token: &str) -> StudioResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StudioError::CredentialStore(e.to_string()))?;
        }
        let body = serde_json::to_string(&StoredCredential { manual_api_key: token.to_string() })
            .map_err(|e| StudioError::CredentialStore(e.to_string()))?;
        std::fs::write(&self.path, body).map_err(|e| StudioError::CredentialStore(e.to_string()))
    }

    fn clear(&self) -> StudioResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StudioError::CredentialStore(e.to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct CredentialState {
    manual: Option<String>,
    platform_selected: bool,
}

/// Snapshot for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub manual: bool,
    pub environment: bool,
    pub platform: bool,
}

/// Explicit credential context handed to every client call. Clones share state.
#[derive(Clone)]
pub struct CredentialContext {
    state: Arc<RwLock<CredentialState>>,
    default: DefaultSource,
    store: Option<Arc<dyn CredentialStore>>,
    chooser: Option<Arc<dyn PlatformChooser>>,
}

impl CredentialContext {
    pub fn new(default: DefaultSource) -> Self {
        Self {
            state: Arc::default(),
            default,
            store: None,
            chooser: None,
        }
    }

    /// Attaches a store and loads any previously saved manual key from it.
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> StudioResult<Self> {
        if let Some(saved) = store.load()? {
            info!("Loaded manual API key from credential store");
            self.state.write().manual = Some(saved);
        }
        self.store = Some(store);
        Ok(self)
    }

    pub fn with_chooser(mut self, chooser: Arc<dyn PlatformChooser>) -> Self {
        self.chooser = Some(chooser);
        self
    }

    /// Manual override first, then the environment default.
    pub fn resolve(&self) -> StudioResult<ApiCredential> {
        let manual = self.state.read().manual.clone();
        manual
            .or_else(|| self.default.read())
            .map(ApiCredential)
            .ok_or(StudioError::NoCredentialAvailable)
    }

    /// Resolution for a call class. When a platform chooser is attached, video
    /// calls without a manual key also need a platform selection, and the
    /// selected key is delivered through the environment default.
    pub fn resolve_for(&self, class: CallClass) -> StudioResult<ApiCredential> {
        if class == CallClass::Video && self.chooser.is_some() {
            let state = self.state.read();
            if let Some(manual) = &state.manual {
                return Ok(ApiCredential(manual.clone()));
            }
            if !state.platform_selected {
                return Err(StudioError::NoCredentialAvailable);
            }
        }
        self.resolve()
    }

    /// Overwrites the manual override; `None` or blank reverts to the default.
    pub fn set(&self, token: Option<&str>) -> StudioResult<()> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        if let Some(store) = &self.store {
            match token {
                Some(t) => store.save(t)?,
                None => store.clear()?,
            }
        }
        self.state.write().manual = token.map(str::to_string);
        match token {
            Some(_) => info!("Manual API key set"),
            None => info!("Manual API key cleared, using environment default"),
        }
        Ok(())
    }

    pub fn has_platform_credential(&self) -> bool {
        self.state.read().platform_selected
    }

    /// Opens the host chooser and records whether a selection was made.
    pub async fn request_platform_credential(&self) -> bool {
        let Some(chooser) = &self.chooser else {
            warn!("No platform credential chooser available");
            return false;
        };
        chooser.open_select().await;
        let selected = chooser.has_selection().await;
        self.state.write().platform_selected = selected;
        selected
    }

    /// Refreshes the platform flag from the chooser, e.g. at startup.
    pub async fn sync_platform_credential(&self) -> bool {
        let selected = match &self.chooser {
            Some(chooser) => chooser.has_selection().await,
            None => false,
        };
        self.state.write().platform_selected = selected;
        selected
    }

    /// Called after the service rejects the key so the next attempt re-prompts.
    pub fn reset_platform_credential(&self) {
        self.state.write().platform_selected = false;
    }

    pub fn status(&self) -> CredentialStatus {
        let state = self.state.read();
        CredentialStatus {
            manual: state.manual.is_some(),
            environment: self.default.read().is_some(),
            platform: state.platform_selected,
        }
    }
}
