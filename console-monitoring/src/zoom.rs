//! Drag-to-zoom
//!
//! Tracks a horizontal pointer drag over the graph and maps the selected pixel
//! range onto the time axis.

use console_common::AxisDomain;

/// Zoom interaction state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ZoomState {
    #[default]
    Idle,
    Dragging { start_x: f64, end_x: f64 },
}

/// Key presses the handler cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomKey {
    Escape,
    Other,
}

#[derive(Debug, Clone, Default)]
pub struct ZoomHandler {
    state: ZoomState,
}

impl ZoomHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ZoomState {
        self.state
    }

    pub fn is_zooming(&self) -> bool {
        matches!(self.state, ZoomState::Dragging { .. })
    }

    /// Selected pixel range as `(left, width)`, for drawing an overlay
    pub fn selection(&self) -> Option<(f64, f64)> {
        match self.state {
            ZoomState::Dragging { start_x, end_x } => {
                Some((start_x.min(end_x), (start_x - end_x).abs()))
            }
            ZoomState::Idle => None,
        }
    }

    pub fn pointer_down(&mut self, x: f64) {
        self.state = ZoomState::Dragging { start_x: x, end_x: x };
    }

    pub fn pointer_move(&mut self, x: f64) {
        if let ZoomState::Dragging { end_x, .. } = &mut self.state {
            *end_x = x;
        }
    }

    /// Returns true if the key cancelled a drag
    pub fn key_down(&mut self, key: ZoomKey) -> bool {
        if key == ZoomKey::Escape && self.is_zooming() {
            self.state = ZoomState::Idle;
            return true;
        }
        false
    }

    /// Finish the drag and compute the new domain.
    ///
    /// `domain` is the current explicit domain, if any; otherwise the window is
    /// taken to end at `now`. Returns `None` for a plain click.
    pub fn pointer_up(
        &mut self,
        width: f64,
        span: f64,
        domain: Option<AxisDomain>,
        now: f64,
        min_span: f64,
    ) -> Option<AxisDomain> {
        let state = std::mem::take(&mut self.state);
        let ZoomState::Dragging { start_x, end_x } = state else {
            return None;
        };

        let x_min = start_x.min(end_x);
        let x_max = start_x.max(end_x);
        if x_max == x_min || !(width > 0.0) {
            return None;
        }

        let old_from = domain.map(|d| d.from).unwrap_or(now - span);
        Some(zoom_domain(old_from, span, x_min, x_max, width, min_span))
    }
}

/// Map the pixel range `[x_min, x_max]` of a `width` pixel graph showing
/// `[old_from, old_from + span]` onto time, widening to `min_span` around the
/// midpoint if needed.
pub fn zoom_domain(
    old_from: f64,
    span: f64,
    x_min: f64,
    x_max: f64,
    width: f64,
    min_span: f64,
) -> AxisDomain {
    let mut from = old_from + (span * x_min) / width;
    let mut to = old_from + (span * x_max) / width;

    if to - from < min_span {
        let middle = (from + to) / 2.0;
        from = middle - min_span / 2.0;
        to = middle + min_span / 2.0;
    }

    AxisDomain::new(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::{ONE_HOUR, ONE_SECOND};

    const MIN_SPAN: f64 = 30.0 * ONE_SECOND;
    const NOW: f64 = 1_700_000_000_000.0;

    #[test]
    fn test_drag_maps_pixels_to_time() {
        let span = 2.0 * ONE_HOUR;
        let mut zoom = ZoomHandler::new();
        zoom.pointer_down(100.0);
        zoom.pointer_move(200.0);

        let domain = zoom.pointer_up(400.0, span, None, NOW, MIN_SPAN).unwrap();
        let start = NOW - span;
        assert_eq!(domain.from, start + 0.25 * span);
        assert_eq!(domain.to, start + 0.5 * span);
        assert!(!zoom.is_zooming());
    }

    #[test]
    fn test_drag_uses_existing_domain() {
        let existing = AxisDomain::new(1_000_000.0, 1_000_000.0 + ONE_HOUR);
        let mut zoom = ZoomHandler::new();
        // Dragging right to left selects the same range
        zoom.pointer_down(300.0);
        zoom.pointer_move(100.0);

        let domain = zoom.pointer_up(400.0, ONE_HOUR, Some(existing), NOW, MIN_SPAN).unwrap();
        assert_eq!(domain.from, 1_000_000.0 + 0.25 * ONE_HOUR);
        assert_eq!(domain.to, 1_000_000.0 + 0.75 * ONE_HOUR);
    }

    #[test]
    fn test_narrow_zoom_expands_to_min_span() {
        let span = 2.0 * ONE_HOUR;
        let mut zoom = ZoomHandler::new();
        zoom.pointer_down(100.0);
        zoom.pointer_move(100.5);

        let domain = zoom.pointer_up(400.0, span, None, NOW, MIN_SPAN).unwrap();
        assert!((domain.span() - MIN_SPAN).abs() < 1e-6);

        let start = NOW - span;
        let middle = start + span * 100.25 / 400.0;
        assert!(((domain.from + domain.to) / 2.0 - middle).abs() < 1e-6);
    }

    #[test]
    fn test_click_does_not_zoom() {
        let mut zoom = ZoomHandler::new();
        zoom.pointer_down(150.0);
        assert!(zoom.pointer_up(400.0, ONE_HOUR, None, NOW, MIN_SPAN).is_none());
        assert_eq!(zoom.state(), ZoomState::Idle);
    }

    #[test]
    fn test_escape_cancels_drag() {
        let mut zoom = ZoomHandler::new();
        assert!(!zoom.key_down(ZoomKey::Escape));

        zoom.pointer_down(10.0);
        zoom.pointer_move(90.0);
        assert_eq!(zoom.selection(), Some((10.0, 80.0)));
        assert!(!zoom.key_down(ZoomKey::Other));
        assert!(zoom.key_down(ZoomKey::Escape));

        assert!(zoom.selection().is_none());
        assert!(zoom.pointer_up(400.0, ONE_HOUR, None, NOW, MIN_SPAN).is_none());
    }

    #[test]
    fn test_move_without_drag_is_ignored() {
        let mut zoom = ZoomHandler::new();
        zoom.pointer_move(50.0);
        assert_eq!(zoom.state(), ZoomState::Idle);
    }
}
