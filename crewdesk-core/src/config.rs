//! Server settings, loaded from the environment.
//!
//! Every option has a sane default so a bare `crewdesk-rest` binary comes
//! up with the mock provider, a local SQLite file, and all dangerous
//! capabilities ceilinged off.

use std::path::PathBuf;
use std::time::Duration;

use crate::policy::CapabilitySet;

const ENV_PREFIX: &str = "CREWDESK_";

fn env_str(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_str(name).map(|v| v.to_ascii_lowercase()) {
        Some(v) if ["1", "true", "yes", "y", "on"].contains(&v.as_str()) => true,
        Some(v) if ["0", "false", "no", "n", "off"].contains(&v.as_str()) => false,
        _ => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env_str(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env_str(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    env_str(name).map(PathBuf::from).unwrap_or(default)
}

/// Settings for one server process.
#[derive(Debug, Clone)]
pub struct Settings {
    // Provider selection
    pub provider_default: String,
    pub model_default: String,
    pub native_api_key: Option<String>,
    pub native_base_url: String,

    // Workspace roots
    pub workspace_default: PathBuf,
    pub projects_root_allowlist: Vec<PathBuf>,

    // Capability ceiling
    pub ceiling: CapabilitySet,

    // Session bounds
    pub session_ttl: Duration,
    pub max_sessions: usize,
    pub max_session_messages: usize,
    pub max_context_chars: usize,

    // Artifacts
    pub data_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub outputs_ttl: Duration,
    pub db_path: PathBuf,

    // Loop limits
    pub max_steps: u32,
    pub max_tool_output_chars: usize,
    pub max_file_read_chars: usize,
    pub provider_timeout: Duration,

    // HTTP
    pub public_base_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,

    // Browser tool
    pub browser_cmd: String,
    pub max_browser_pages: usize,
    pub browser_page_ttl: Duration,

    // Subprocess / sidecar providers
    pub codex_cmd: String,
    pub codex_timeout: Duration,
    pub opencode_base_url: String,
    pub opencode_username: String,
    pub opencode_password: Option<String>,
    pub opencode_timeout: Duration,
    pub nanobot_cmd: String,
    pub nanobot_timeout: Duration,
    pub pi_cmd: String,
    pub pi_timeout: Duration,
    pub enable_pi: bool,
}

impl Settings {
    /// Load settings from the environment.
    pub fn from_env() -> Self {
        let data_dir = env_path("DATA_DIR", PathBuf::from(".crewdesk"));
        let workspace_default = env_path(
            "WORKSPACE",
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        );
        let projects_root_allowlist = env_str("PROJECTS_ROOT")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![workspace_default.clone()]);

        let outputs_dir = env_path("OUTPUTS_DIR", data_dir.join("outputs"));
        let db_path = env_path("DB_PATH", data_dir.join("crewdesk.db"));

        let jwt_secret = env_str("JWT_SECRET")
            .or_else(|| Self::read_persisted_secret(&data_dir))
            .unwrap_or_else(|| Self::persist_generated_secret(&data_dir));

        Self {
            provider_default: env_str("PROVIDER").unwrap_or_else(|| "mock".to_string()),
            model_default: env_str("MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            native_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty()),
            native_base_url: env_str("NATIVE_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            workspace_default,
            projects_root_allowlist,
            ceiling: CapabilitySet {
                shell: env_bool("ENABLE_SHELL", false),
                write: env_bool("ENABLE_WRITE", false),
                browser: env_bool("ENABLE_BROWSER", false),
                dangerous: env_bool("ALLOW_DANGEROUS", false),
            },
            session_ttl: Duration::from_secs(env_u64("SESSION_TTL_MINUTES", 120) * 60),
            max_sessions: env_usize("MAX_SESSIONS", 200),
            max_session_messages: env_usize("MAX_SESSION_MESSAGES", 120),
            max_context_chars: env_usize("MAX_CONTEXT_CHARS", 120_000),
            data_dir,
            outputs_dir,
            outputs_ttl: Duration::from_secs(env_u64("OUTPUTS_TTL_HOURS", 7 * 24) * 3600),
            db_path,
            max_steps: env_u64("MAX_STEPS", 10) as u32,
            max_tool_output_chars: env_usize("MAX_TOOL_OUTPUT_CHARS", 12_000),
            max_file_read_chars: env_usize("MAX_FILE_READ_CHARS", 120_000),
            provider_timeout: Duration::from_secs(env_u64("PROVIDER_TIMEOUT_SECONDS", 300)),
            public_base_url: env_str("PUBLIC_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            host: env_str("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env_str("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            jwt_secret,
            browser_cmd: env_str("BROWSER_CMD").unwrap_or_else(|| "chromium".to_string()),
            max_browser_pages: env_usize("MAX_BROWSER_PAGES", 8),
            browser_page_ttl: Duration::from_secs(env_u64("BROWSER_PAGE_TTL_MINUTES", 30) * 60),
            codex_cmd: env_str("CODEX_CMD").unwrap_or_else(|| "codex".to_string()),
            codex_timeout: Duration::from_secs(env_u64("CODEX_TIMEOUT_SECONDS", 300)),
            opencode_base_url: env_str("OPENCODE_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:4096".to_string()),
            opencode_username: env_str("OPENCODE_USERNAME")
                .unwrap_or_else(|| "opencode".to_string()),
            opencode_password: env_str("OPENCODE_PASSWORD"),
            opencode_timeout: Duration::from_secs(env_u64("OPENCODE_TIMEOUT_SECONDS", 300)),
            nanobot_cmd: env_str("NANOBOT_CMD").unwrap_or_else(|| "nanobot".to_string()),
            nanobot_timeout: Duration::from_secs(env_u64("NANOBOT_TIMEOUT_SECONDS", 300)),
            pi_cmd: env_str("PI_CMD").unwrap_or_else(|| "pi".to_string()),
            pi_timeout: Duration::from_secs(env_u64("PI_TIMEOUT_SECONDS", 300)),
            enable_pi: env_bool("ENABLE_PI", false),
        }
    }

    fn read_persisted_secret(data_dir: &PathBuf) -> Option<String> {
        std::fs::read_to_string(data_dir.join("jwt_secret"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn persist_generated_secret(data_dir: &PathBuf) -> String {
        let secret = uuid::Uuid::new_v4().simple().to_string()
            + &uuid::Uuid::new_v4().simple().to_string();
        if std::fs::create_dir_all(data_dir).is_ok() {
            let _ = std::fs::write(data_dir.join("jwt_secret"), &secret);
        }
        secret
    }

    /// Absolute download URL for a file id + token pair.
    pub fn download_url(&self, file_id: &str, token: &str) -> String {
        format!("{}/files/{}?token={}", self.public_base_url, file_id, token)
    }
}
