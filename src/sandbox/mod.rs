//! Guest isolation
//!
//! - **relay**: the intermediate frame between Host and Guest
//! - **csp**: per-resource Content-Security-Policy synthesis
//! - **attributes**: `sandbox` attribute tokens for the inner frame
//! - **embedding**: the relay's self-check (framing, referrer, top access)
//! - **tamper**: monitor installed ahead of Guest scripts
//! - **script**: headless JavaScript host for Guest-side scripts
//! - **frame**: the inner content frame abstraction

pub mod attributes;
pub mod csp;
pub mod embedding;
pub mod frame;
pub mod relay;
pub mod script;
pub mod tamper;

pub use attributes::{DEFAULT_SANDBOX, SandboxAttributes, SandboxFlag};
pub use csp::{ContentSecurityPolicy, CspDeclaration, CspDirective};
pub use embedding::{EmbeddingEnvironment, ReferrerPattern, TopAccess, verify_embedding};
pub use frame::{ContentFrame, InMemoryFrame, PreparedDocument};
pub use relay::{RelayConfig, RelayState, SandboxRelay, SandboxResourceReadyParams, prepare_document};
pub use script::ScriptHost;
pub use tamper::{
    AccessKind, DEFAULT_TAMPER_RULES, Severity, TamperAccess, TamperMonitor, TamperReport, TamperRule,
    TamperTarget,
};
