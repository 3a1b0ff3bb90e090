// Auto-scroll model for the conversation view.
//
// Pure geometry in display units; the rendering layer reports viewport and
// content sizes and scroll offsets, and asks this model what to do when
// content changes.

/// Distance from the content bottom under which the view tracks new messages
pub const STICK_THRESHOLD: f32 = 50.0;

/// Estimated height of one message row
pub const ROW_HEIGHT: f32 = 48.0;

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    height: f32,
    content_height: f32,
    scroll_top: f32,
}

impl Viewport {
    pub fn new(height: f32) -> Self {
        Viewport {
            height,
            content_height: 0.0,
            scroll_top: 0.0,
        }
    }

    pub fn resize(&mut self, height: f32) {
        self.height = height;
    }

    pub fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    pub fn content_height(&self) -> f32 {
        self.content_height
    }

    fn distance_to_bottom(&self) -> f32 {
        (self.content_height - (self.scroll_top + self.height)).max(0.0)
    }

    /// Whether the view currently tracks the newest message
    pub fn is_stuck_to_bottom(&self) -> bool {
        self.distance_to_bottom() < STICK_THRESHOLD
    }

    /// Whether the oldest visible row has reached the top boundary
    pub fn is_at_top(&self) -> bool {
        self.scroll_top <= 0.0
    }

    /// The user scrolled; record the new offset
    pub fn set_scroll_top(&mut self, scroll_top: f32) {
        self.scroll_top = scroll_top.clamp(0.0, (self.content_height - self.height).max(0.0));
    }

    /// `count` rows were appended at the bottom. If the view was stuck to
    /// the bottom it follows the new content; otherwise the position is
    /// preserved.
    pub fn on_appended(&mut self, count: usize) {
        let stuck = self.is_stuck_to_bottom();
        self.content_height += count as f32 * ROW_HEIGHT;
        if stuck {
            self.scroll_to_bottom();
        }
    }

    /// `count` rows were prepended at the top (backfill). The scroll offset
    /// shifts by the added height so the visible rows do not jump.
    pub fn on_prepended(&mut self, count: usize) {
        let added = count as f32 * ROW_HEIGHT;
        self.content_height += added;
        self.scroll_top += added;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = (self.content_height - self.height).max(0.0);
    }
}
