//! Capability policy.
//!
//! One turn's tool permissions collapse three inputs into a single effective
//! set: the server ceiling, the request preset (or explicit toggles), and
//! the caller's team role. The derivation is a pure function so it can be
//! tested exhaustively without a request in flight.

use serde::{Deserialize, Serialize};

use crate::provider::ProviderCaps;

/// The enabled subset of `{shell, write, browser, dangerous}` for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub browser: bool,
    #[serde(default)]
    pub dangerous: bool,
}

impl CapabilitySet {
    pub const NONE: CapabilitySet = CapabilitySet {
        shell: false,
        write: false,
        browser: false,
        dangerous: false,
    };

    pub fn intersect(self, other: CapabilitySet) -> CapabilitySet {
        CapabilitySet {
            shell: self.shell && other.shell,
            write: self.write && other.write,
            browser: self.browser && other.browser,
            dangerous: self.dangerous && other.dangerous,
        }
    }

    pub fn is_subset_of(self, other: CapabilitySet) -> bool {
        self.intersect(other) == self
    }

    pub fn any(self) -> bool {
        self.shell || self.write || self.browser || self.dangerous
    }
}

/// Named capability request shipped with a chat request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPreset {
    #[default]
    Safe,
    Standard,
    Power,
    Custom,
}

impl SecurityPreset {
    /// Lenient parse; unknown values fall back to `safe`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("standard") => Self::Standard,
            Some("power") => Self::Power,
            Some("custom") => Self::Custom,
            _ => Self::Safe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Standard => "standard",
            Self::Power => "power",
            Self::Custom => "custom",
        }
    }
}

/// Per-request explicit toggles, only honored under the `custom` preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestToggles {
    pub shell: Option<bool>,
    pub write: Option<bool>,
    pub browser: Option<bool>,
    pub dangerous: Option<bool>,
}

/// Membership role within a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Owner,
    Admin,
    Member,
}

impl TeamRole {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    /// Only owners and admins may enable dangerous-class capabilities.
    pub fn can_enable_dangerous(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

/// The derived profile for one turn, emitted as the first event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub preset: SecurityPreset,
    pub requested: CapabilitySet,
    pub effective: CapabilitySet,
}

fn requested_set(preset: SecurityPreset, toggles: RequestToggles) -> CapabilitySet {
    match preset {
        SecurityPreset::Safe => CapabilitySet::NONE,
        SecurityPreset::Standard => CapabilitySet {
            write: true,
            ..CapabilitySet::NONE
        },
        SecurityPreset::Power => CapabilitySet {
            shell: true,
            write: true,
            browser: true,
            dangerous: false,
        },
        SecurityPreset::Custom => CapabilitySet {
            shell: toggles.shell.unwrap_or(false),
            write: toggles.write.unwrap_or(false),
            browser: toggles.browser.unwrap_or(false),
            dangerous: toggles.dangerous.unwrap_or(false),
        },
    }
}

/// Derive the effective capability set for one turn.
///
/// `effective = requested ∩ ceiling`, then the role gate silently clears
/// every dangerous-class bit for non-admin callers. The no-sandbox bit is
/// additionally valid only under the `custom` preset and only when the
/// selected provider declares it can run unsandboxed.
pub fn derive_profile(
    ceiling: CapabilitySet,
    preset: SecurityPreset,
    toggles: RequestToggles,
    role: TeamRole,
    provider_caps: ProviderCaps,
) -> SecurityProfile {
    let requested = requested_set(preset, toggles);
    let mut effective = requested.intersect(ceiling);

    if !role.can_enable_dangerous() {
        effective = CapabilitySet::NONE;
    }

    if effective.dangerous
        && !(preset == SecurityPreset::Custom && provider_caps.run_unsandboxed)
    {
        effective.dangerous = false;
    }

    SecurityProfile {
        preset,
        requested,
        effective,
    }
}

/// Whether the request explicitly asked for the no-sandbox bit and the
/// server ceiling forbids it. This is the only denial that hard-fails the
/// request (HTTP 403); everything else clears silently.
pub fn dangerous_explicitly_denied(
    ceiling: CapabilitySet,
    preset: SecurityPreset,
    toggles: RequestToggles,
) -> bool {
    preset == SecurityPreset::Custom && toggles.dangerous == Some(true) && !ceiling.dangerous
}
