//! Tool call lifecycle as seen by the Guest
//!
//! Per invocation: any number of partial inputs, exactly one input, then
//! exactly one of result or cancelled. A cancel may also arrive before the
//! input. Once an invocation has ended a new one may start.

use crate::utils::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolLifecycle {
    /// No invocation yet
    #[default]
    Idle,
    /// Partial inputs have been sent
    Streaming,
    /// The complete input has been sent
    InputDelivered,
    Completed,
    Cancelled,
}

impl ToolLifecycle {
    fn violation(&self, what: &str) -> BridgeError {
        BridgeError::Protocol(format!("cannot send {} while tool call is {:?}", what, self))
    }

    /// Whether an invocation is open
    pub fn in_flight(&self) -> bool {
        matches!(self, ToolLifecycle::Streaming | ToolLifecycle::InputDelivered)
    }

    pub fn partial_input(&mut self) -> Result<()> {
        match self {
            ToolLifecycle::InputDelivered => Err(self.violation("tool-input-partial")),
            _ => {
                *self = ToolLifecycle::Streaming;
                Ok(())
            }
        }
    }

    pub fn input(&mut self) -> Result<()> {
        match self {
            ToolLifecycle::InputDelivered => Err(self.violation("tool-input")),
            _ => {
                *self = ToolLifecycle::InputDelivered;
                Ok(())
            }
        }
    }

    pub fn result(&mut self) -> Result<()> {
        match self {
            ToolLifecycle::InputDelivered => {
                *self = ToolLifecycle::Completed;
                Ok(())
            }
            _ => Err(self.violation("tool-result")),
        }
    }

    pub fn cancel(&mut self) -> Result<()> {
        match self {
            ToolLifecycle::Completed | ToolLifecycle::Cancelled => Err(self.violation("tool-cancelled")),
            _ => {
                *self = ToolLifecycle::Cancelled;
                Ok(())
            }
        }
    }
}
