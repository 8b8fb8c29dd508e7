//! Host <-> Guest RPC protocol
//!
//! - **jsonrpc**: message framing and validation
//! - **session**: request/response correlation, handler registry, timeouts
//! - **types**: typed params and results, capabilities, host context
//! - **methods**: method names, including the reserved sandbox signals
//! - **version**: protocol version negotiation
//! - **metadata**: tool/resource `_meta` normalization

pub mod jsonrpc;
pub mod metadata;
pub mod methods;
pub mod session;
pub mod types;
pub mod version;

pub use jsonrpc::{JsonRpcMessage, RequestId, RpcErrorObject};
pub use metadata::{ResourceUiMeta, ToolUiMeta, ToolVisibility};
pub use session::{Session, SessionOptions};
pub use types::*;
pub use version::{LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};
