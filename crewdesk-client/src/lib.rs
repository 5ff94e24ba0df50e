//! crewdesk-client - model provider adapters.
//!
//! Four families of providers behind one interface: the native HTTP API
//! (OpenAI-compatible chat completions), local CLI providers that run the
//! agent themselves (`codex`, `pi`, `nanobot`), the `opencode` HTTP
//! sidecar, and a mock for tests and offline defaults. Each declares its
//! capabilities; the factory resolves names and the features module decides
//! per-turn fallback to native.

pub mod factory;
pub mod features;
pub mod mock;
pub mod native;
pub mod opencode;
pub mod subprocess;

pub use factory::ProviderFactory;
pub use features::{detect_features, unserved_features, RequestedFeature};
pub use mock::MockProvider;
pub use native::NativeProvider;
pub use opencode::OpencodeProvider;
pub use subprocess::{CliFlavor, SubprocessProvider};
