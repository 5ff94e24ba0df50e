//! Provider resolution.

use std::sync::Arc;

use crewdesk_core::config::Settings;
use crewdesk_core::provider::{ModelProvider, ProviderError};

use crate::mock::MockProvider;
use crate::native::NativeProvider;
use crate::opencode::OpencodeProvider;
use crate::subprocess::{CliFlavor, SubprocessProvider};

/// Resolves provider names to adapter instances.
///
/// The native provider is always constructible - it is the fallback target
/// whenever another provider cannot serve part of a request.
pub struct ProviderFactory {
    native: Arc<dyn ModelProvider>,
    mock: Arc<dyn ModelProvider>,
    codex: Arc<dyn ModelProvider>,
    opencode: Arc<dyn ModelProvider>,
    nanobot: Arc<dyn ModelProvider>,
    pi: Option<Arc<dyn ModelProvider>>,
    default_name: String,
}

impl ProviderFactory {
    pub fn new(settings: &Settings) -> Self {
        Self {
            native: Arc::new(NativeProvider::new(
                settings.native_api_key.clone(),
                settings.native_base_url.clone(),
            )),
            mock: Arc::new(MockProvider::new()),
            codex: Arc::new(SubprocessProvider::new(
                CliFlavor::Codex,
                settings.codex_cmd.clone(),
                settings.codex_timeout,
            )),
            opencode: Arc::new(OpencodeProvider::new(
                settings.opencode_base_url.clone(),
                settings.opencode_username.clone(),
                settings.opencode_password.clone(),
                settings.opencode_timeout,
            )),
            nanobot: Arc::new(SubprocessProvider::new(
                CliFlavor::Nanobot,
                settings.nanobot_cmd.clone(),
                settings.nanobot_timeout,
            )),
            pi: settings.enable_pi.then(|| {
                Arc::new(SubprocessProvider::new(
                    CliFlavor::Pi,
                    settings.pi_cmd.clone(),
                    settings.pi_timeout,
                )) as Arc<dyn ModelProvider>
            }),
            default_name: settings.provider_default.clone(),
        }
    }

    /// The fallback target.
    pub fn native(&self) -> Arc<dyn ModelProvider> {
        self.native.clone()
    }

    /// Resolve a requested provider name (or the configured default).
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let name = name
            .map(|n| n.trim().to_ascii_lowercase())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.default_name.to_ascii_lowercase());
        match name.as_str() {
            "native" | "openai" => Ok(self.native.clone()),
            "mock" => Ok(self.mock.clone()),
            "codex" => Ok(self.codex.clone()),
            "opencode" => Ok(self.opencode.clone()),
            "nanobot" => Ok(self.nanobot.clone()),
            "pi" => self
                .pi
                .clone()
                .ok_or(ProviderError::Disabled { name }),
            _ => Err(ProviderError::Unknown { name }),
        }
    }
}
