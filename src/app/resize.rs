//! Guest auto-resize
//!
//! Content changes schedule at most one measurement per frame. A measurement
//! temporarily sizes the root to fit its content, reads the size, restores
//! the original sizing and only yields a size when it differs from the last
//! one reported. Without that last check a Host that resizes the frame in
//! response would trigger another report.

use taffy::TaffyError;
use taffy::prelude::*;

use crate::protocol::SizeChangedParams;
use crate::utils::{BridgeError, Result};

/// Measured content box in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasuredSize {
    pub width: f32,
    pub height: f32,
}

/// The document root the resizer measures
pub trait LayoutRoot {
    /// Sizing state to put back after measuring
    type Saved;

    /// Switch the root to fit-content sizing, returning what it had before
    fn force_fit_content(&mut self) -> Result<Self::Saved>;

    fn measure(&mut self) -> Result<MeasuredSize>;

    fn restore(&mut self, saved: Self::Saved) -> Result<()>;

    /// Width the platform reserves for a vertical scrollbar
    fn scrollbar_width(&self) -> f32 {
        0.0
    }
}

/// Turns content changes into size-changed notifications
#[derive(Debug, Default)]
pub struct AutoResizer {
    scheduled: bool,
    last: Option<SizeChangedParams>,
}

impl AutoResizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that content changed. Returns `true` when this schedules a
    /// measurement for the next frame, `false` when one is already pending.
    pub fn notify_content_changed(&mut self) -> bool {
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Run the scheduled measurement, if any
    pub fn on_animation_frame<R: LayoutRoot>(&mut self, root: &mut R) -> Result<Option<SizeChangedParams>> {
        let size = self.take_frame(root)?;
        if let Some(size) = size {
            self.mark_reported(size);
        }
        Ok(size)
    }

    /// Like [`on_animation_frame`](Self::on_animation_frame) but records
    /// nothing; call [`mark_reported`](Self::mark_reported) once the size
    /// has actually been delivered.
    pub fn take_frame<R: LayoutRoot>(&mut self, root: &mut R) -> Result<Option<SizeChangedParams>> {
        if !self.scheduled {
            return Ok(None);
        }
        self.scheduled = false;
        self.measure_change(root)
    }

    /// Measure now, regardless of scheduling
    pub fn measure<R: LayoutRoot>(&mut self, root: &mut R) -> Result<Option<SizeChangedParams>> {
        let size = self.measure_change(root)?;
        if let Some(size) = size {
            self.mark_reported(size);
        }
        Ok(size)
    }

    /// The current size if it differs from the last one reported
    pub fn measure_change<R: LayoutRoot>(&self, root: &mut R) -> Result<Option<SizeChangedParams>> {
        let saved = root.force_fit_content()?;
        let measured = root.measure();
        root.restore(saved)?;
        let measured = measured?;

        let size = SizeChangedParams {
            width: (measured.width + root.scrollbar_width()).ceil().max(0.0) as u32,
            height: measured.height.ceil().max(0.0) as u32,
        };
        if self.last == Some(size) {
            return Ok(None);
        }
        Ok(Some(size))
    }

    pub fn mark_reported(&mut self, size: SizeChangedParams) {
        self.last = Some(size);
    }

    pub fn last_reported(&self) -> Option<SizeChangedParams> {
        self.last
    }
}

fn layout_error(err: TaffyError) -> BridgeError {
    BridgeError::Layout(err.to_string())
}

/// A document modeled as a taffy block tree.
///
/// The root fills the frame like `<html>` normally does; its children are
/// the content blocks.
pub struct TaffyLayoutRoot {
    taffy: TaffyTree<()>,
    root: NodeId,
    viewport: Size<f32>,
    scrollbar: f32,
}

impl TaffyLayoutRoot {
    pub fn new(viewport_width: f32, viewport_height: f32) -> Result<Self> {
        let mut taffy = TaffyTree::new();
        let root = taffy
            .new_leaf(Style {
                display: Display::Block,
                size: Size {
                    width: Dimension::percent(1.0),
                    height: Dimension::percent(1.0),
                },
                ..Default::default()
            })
            .map_err(layout_error)?;
        Ok(Self {
            taffy,
            root,
            viewport: Size {
                width: viewport_width,
                height: viewport_height,
            },
            scrollbar: 0.0,
        })
    }

    /// Reserve room for a vertical scrollbar
    pub fn with_scrollbar(mut self, width: f32) -> Self {
        self.scrollbar = width;
        self
    }

    /// Append a content block of fixed size
    pub fn add_block(&mut self, width: f32, height: f32) -> Result<NodeId> {
        let node = self
            .taffy
            .new_leaf(Style {
                size: Size {
                    width: Dimension::length(width),
                    height: Dimension::length(height),
                },
                ..Default::default()
            })
            .map_err(layout_error)?;
        self.taffy.add_child(self.root, node).map_err(layout_error)?;
        Ok(node)
    }

    /// Resize an existing block
    pub fn resize_block(&mut self, node: NodeId, width: f32, height: f32) -> Result<()> {
        let mut style = self.taffy.style(node).map_err(layout_error)?.clone();
        style.size = Size {
            width: Dimension::length(width),
            height: Dimension::length(height),
        };
        self.taffy.set_style(node, style).map_err(layout_error)
    }

    pub fn remove_block(&mut self, node: NodeId) -> Result<()> {
        self.taffy.remove(node).map(|_| ()).map_err(layout_error)
    }

    /// The frame was resized by the Host
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = Size { width, height };
    }

    /// Size of the root at the current viewport
    pub fn root_size(&mut self) -> Result<MeasuredSize> {
        let available = Size {
            width: AvailableSpace::Definite(self.viewport.width),
            height: AvailableSpace::Definite(self.viewport.height),
        };
        self.compute(available)
    }

    fn compute(&mut self, available: Size<AvailableSpace>) -> Result<MeasuredSize> {
        self.taffy
            .compute_layout(self.root, available)
            .map_err(layout_error)?;
        let layout = self.taffy.layout(self.root).map_err(layout_error)?;
        Ok(MeasuredSize {
            width: layout.size.width,
            height: layout.size.height,
        })
    }
}

impl LayoutRoot for TaffyLayoutRoot {
    type Saved = Style;

    fn force_fit_content(&mut self) -> Result<Style> {
        let saved = self.taffy.style(self.root).map_err(layout_error)?.clone();
        let mut fit = saved.clone();
        fit.size = Size {
            width: Dimension::auto(),
            height: Dimension::auto(),
        };
        self.taffy.set_style(self.root, fit).map_err(layout_error)?;
        Ok(saved)
    }

    fn measure(&mut self) -> Result<MeasuredSize> {
        self.compute(Size {
            width: AvailableSpace::MaxContent,
            height: AvailableSpace::MaxContent,
        })
    }

    fn restore(&mut self, saved: Style) -> Result<()> {
        self.taffy.set_style(self.root, saved).map_err(layout_error)
    }

    fn scrollbar_width(&self) -> f32 {
        self.scrollbar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_measurement_per_frame() {
        let mut resizer = AutoResizer::new();
        assert!(resizer.notify_content_changed());
        assert!(!resizer.notify_content_changed());
        assert!(resizer.is_scheduled());

        let mut root = TaffyLayoutRoot::new(800.0, 600.0).unwrap();
        root.add_block(320.0, 100.0).unwrap();
        assert!(resizer.on_animation_frame(&mut root).unwrap().is_some());
        assert!(!resizer.is_scheduled());
        assert_eq!(resizer.on_animation_frame(&mut root).unwrap(), None);
    }

    #[test]
    fn test_measures_content_not_viewport() {
        let mut root = TaffyLayoutRoot::new(800.0, 600.0).unwrap();
        root.add_block(320.0, 100.0).unwrap();
        root.add_block(200.0, 50.5).unwrap();

        let size = AutoResizer::new().measure(&mut root).unwrap().unwrap();
        assert_eq!(size, SizeChangedParams { width: 320, height: 151 });

        // The original sizing is back in place afterwards.
        let filled = root.root_size().unwrap();
        assert_eq!(filled, MeasuredSize { width: 800.0, height: 600.0 });
    }

    #[test]
    fn test_same_size_is_reported_once() {
        let mut root = TaffyLayoutRoot::new(800.0, 600.0).unwrap();
        let block = root.add_block(300.0, 120.0).unwrap();
        let mut resizer = AutoResizer::new();

        assert!(resizer.measure(&mut root).unwrap().is_some());
        // The Host resizing the frame does not change the content size.
        root.set_viewport(300.0, 120.0);
        assert_eq!(resizer.measure(&mut root).unwrap(), None);

        root.resize_block(block, 300.0, 240.0).unwrap();
        assert_eq!(
            resizer.measure(&mut root).unwrap(),
            Some(SizeChangedParams { width: 300, height: 240 })
        );
        assert_eq!(resizer.last_reported(), Some(SizeChangedParams { width: 300, height: 240 }));
    }

    #[test]
    fn test_unreported_size_is_measured_again() {
        let mut root = TaffyLayoutRoot::new(800.0, 600.0).unwrap();
        root.add_block(300.0, 100.0).unwrap();
        let mut resizer = AutoResizer::new();

        resizer.notify_content_changed();
        let size = resizer.take_frame(&mut root).unwrap().unwrap();
        assert_eq!(resizer.last_reported(), None);

        resizer.notify_content_changed();
        assert_eq!(resizer.take_frame(&mut root).unwrap(), Some(size));
        resizer.mark_reported(size);

        resizer.notify_content_changed();
        assert_eq!(resizer.take_frame(&mut root).unwrap(), None);
    }

    #[test]
    fn test_scrollbar_is_added_to_width() {
        let mut root = TaffyLayoutRoot::new(800.0, 600.0).unwrap().with_scrollbar(15.0);
        root.add_block(100.0, 10.0).unwrap();
        let size = AutoResizer::new().measure(&mut root).unwrap().unwrap();
        assert_eq!(size.width, 115);
    }

    struct Broken;

    impl LayoutRoot for Broken {
        type Saved = ();
        fn force_fit_content(&mut self) -> Result<()> {
            Ok(())
        }
        fn measure(&mut self) -> Result<MeasuredSize> {
            Err(BridgeError::Layout("detached".into()))
        }
        fn restore(&mut self, _saved: ()) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_measure_errors_propagate() {
        assert!(matches!(AutoResizer::new().measure(&mut Broken), Err(BridgeError::Layout(_))));
    }
}
