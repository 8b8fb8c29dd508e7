//! The inner content frame the relay loads Guest documents into

use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::attributes::SandboxAttributes;
use crate::channel::Window;
use crate::utils::{BridgeError, Result};

/// Guest document ready to be assigned to the inner frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDocument {
    /// HTML with the CSP meta tag and monitor already spliced in
    pub html: String,
    pub sandbox: SandboxAttributes,
}

/// A nested frame the relay owns
pub trait ContentFrame: Send + Sync {
    /// Browsing context of the frame; messages it posts carry this identity
    fn window(&self) -> Arc<Window>;

    /// Replace the frame's document
    fn load(&self, document: PreparedDocument) -> Result<()>;
}

/// Frame that keeps the loaded documents in memory.
///
/// Its window persists across loads, mirroring an iframe whose `srcdoc`
/// is reassigned.
pub struct InMemoryFrame {
    window: Arc<Window>,
    loads: Mutex<Vec<PreparedDocument>>,
    loaded: watch::Sender<usize>,
}

impl InMemoryFrame {
    pub fn new(window: Arc<Window>) -> Arc<Self> {
        let (loaded, _) = watch::channel(0);
        Arc::new(Self {
            window,
            loads: Mutex::new(Vec::new()),
            loaded,
        })
    }

    /// Most recently loaded document
    pub fn current(&self) -> Option<PreparedDocument> {
        self.loads.lock().ok().and_then(|l| l.last().cloned())
    }

    /// Number of documents loaded so far
    pub fn load_count(&self) -> usize {
        *self.loaded.borrow()
    }

    /// Wait until at least `count` documents have been loaded
    pub async fn wait_for_load(&self, count: usize) -> Result<PreparedDocument> {
        let mut rx = self.loaded.subscribe();
        rx.wait_for(|n| *n >= count)
            .await
            .map_err(|_| BridgeError::Closed)?;
        self.current().ok_or(BridgeError::Closed)
    }
}

impl ContentFrame for InMemoryFrame {
    fn window(&self) -> Arc<Window> {
        Arc::clone(&self.window)
    }

    fn load(&self, document: PreparedDocument) -> Result<()> {
        let count = {
            let mut loads = self
                .loads
                .lock()
                .map_err(|_| BridgeError::Transport("frame state poisoned".into()))?;
            loads.push(document);
            loads.len()
        };
        log::debug!("frame {} loaded document #{}", self.window.id(), count);
        self.loaded.send_replace(count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OPAQUE_ORIGIN;

    #[tokio::test]
    async fn test_loads_are_recorded() {
        let frame = InMemoryFrame::new(Window::new(OPAQUE_ORIGIN));
        assert!(frame.current().is_none());

        frame
            .load(PreparedDocument {
                html: "<p>one</p>".into(),
                sandbox: SandboxAttributes::default(),
            })
            .unwrap();
        let doc = frame.wait_for_load(1).await.unwrap();
        assert_eq!(doc.html, "<p>one</p>");
        assert_eq!(frame.load_count(), 1);
    }
}
