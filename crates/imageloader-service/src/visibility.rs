//! Viewport intersection tracking.
//!
//! A [`VisibilityWatcher`] reports how much of each observed target lies within the
//! viewport expanded by a look-ahead margin, so that loads can start before an image
//! scrolls into view.

use std::fmt;

/// An axis aligned rectangle in px.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Grows the rectangle by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
        }
    }

    /// The overlap of both rectangles. Rectangles sharing only an edge overlap in an empty
    /// rectangle.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right < x || bottom < y {
            return None;
        }
        Some(Rect::new(x, y, right - x, bottom - y))
    }

    /// Shortest distance between the edges of both rectangles, `0` if they overlap.
    pub fn distance_to(&self, other: &Rect) -> f64 {
        let dx = (other.x - self.right()).max(self.x - other.right()).max(0.0);
        let dy = (other.y - self.bottom()).max(self.y - other.bottom()).max(0.0);
        dx.hypot(dy)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisibilityOptions {
    /// Margin (in px) added around the viewport on every side.
    pub root_margin: f64,
    /// Intersection ratios at which changes are reported.
    pub thresholds: Vec<f64>,
}

/// The visibility of one target.
#[derive(Clone, Debug, PartialEq)]
pub struct VisibilityEntry<T> {
    pub target: T,
    /// Share of the target within the expanded viewport, between `0` and `1`.
    pub ratio: f64,
    pub is_intersecting: bool,
    /// Distance (in px) to the viewport itself, ignoring the margin.
    pub distance: f64,
}

struct Observed<T> {
    target: T,
    rect: Rect,
    state: Option<(bool, usize)>,
}

type Callback<T> = Box<dyn FnMut(Vec<VisibilityEntry<T>>) + Send>;

/// Tracks observed targets against a viewport and reports changes to a callback.
///
/// The callback receives one entry per target when it is first observed, and whenever its
/// intersecting flag changes or its ratio crosses one of the thresholds.
pub struct VisibilityWatcher<T> {
    viewport: Rect,
    options: VisibilityOptions,
    targets: Vec<Observed<T>>,
    callback: Callback<T>,
}

impl<T: Clone + PartialEq> VisibilityWatcher<T> {
    pub fn new<F>(viewport: Rect, options: VisibilityOptions, callback: F) -> Self
    where
        F: FnMut(Vec<VisibilityEntry<T>>) + Send + 'static,
    {
        Self {
            viewport,
            options,
            targets: Vec::new(),
            callback: Box::new(callback),
        }
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Starts observing `target`, replacing an earlier observation of the same target.
    pub fn observe(&mut self, target: T, rect: Rect) {
        self.targets.retain(|observed| observed.target != target);
        self.targets.push(Observed {
            target,
            rect,
            state: None,
        });
        self.update();
    }

    /// Moves an observed target. Unknown targets are ignored.
    pub fn update_target(&mut self, target: &T, rect: Rect) {
        if let Some(observed) = self.targets.iter_mut().find(|o| o.target == *target) {
            observed.rect = rect;
            self.update();
        }
    }

    /// Moves the viewport, for instance after scrolling.
    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
        self.update();
    }

    pub fn unobserve(&mut self, target: &T) {
        self.targets.retain(|observed| observed.target != *target);
    }

    /// Stops observing all targets.
    pub fn disconnect(&mut self) {
        self.targets.clear();
    }

    fn update(&mut self) {
        let root = self.viewport.expand(self.options.root_margin);
        let mut changed = Vec::new();

        for observed in &mut self.targets {
            let entry = entry_for(&observed.target, &observed.rect, &root, &self.viewport);
            let state = (
                entry.is_intersecting,
                threshold_index(&self.options.thresholds, &entry),
            );
            if observed.state != Some(state) {
                observed.state = Some(state);
                changed.push(entry);
            }
        }

        if !changed.is_empty() {
            (self.callback)(changed);
        }
    }
}

impl<T> fmt::Debug for VisibilityWatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilityWatcher")
            .field("viewport", &self.viewport)
            .field("options", &self.options)
            .field("targets", &self.targets.len())
            .finish()
    }
}

fn entry_for<T: Clone>(
    target: &T,
    rect: &Rect,
    root: &Rect,
    viewport: &Rect,
) -> VisibilityEntry<T> {
    let (is_intersecting, ratio) = match rect.intersection(root) {
        Some(overlap) if rect.area() > 0.0 => (true, (overlap.area() / rect.area()).min(1.0)),
        Some(_) => (true, 1.0),
        None => (false, 0.0),
    };

    VisibilityEntry {
        target: target.clone(),
        ratio,
        is_intersecting,
        distance: rect.distance_to(viewport),
    }
}

/// Number of thresholds reached by the entry.
fn threshold_index<T>(thresholds: &[f64], entry: &VisibilityEntry<T>) -> usize {
    if !entry.is_intersecting {
        return 0;
    }
    thresholds
        .iter()
        .filter(|threshold| **threshold <= entry.ratio)
        .count()
}
