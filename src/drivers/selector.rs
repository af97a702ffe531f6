use std::sync::mpsc::{channel, Receiver, Sender};
use log::debug;
/// Closed time window picked by two clicks, always stored as `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionWindow {
    pub start: f64,
    pub end: f64,
}
impl SelectionWindow {
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }
    pub fn width(&self) -> f64 {
        self.end - self.start
    }
}
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SelectorState {
    Idle,
    AwaitingSecondPoint { first: f64 },
    Ready(SelectionWindow),
}
/// Notifications for whoever draws the markers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SelectionEvent {
    Activated,
    Deactivated,
    MarkerPlaced { t: f64, ordinal: u8 },
    MarkersCleared,
    WindowReady(SelectionWindow),
    Hover(f64),
}
/// Two-click range picker for the time axis.
///
/// Clicks are only honoured between `activate` and `deactivate`. A click that
/// lands while a window is still waiting to be taken starts a fresh
/// selection with that click as the first boundary.
pub struct RangeSelector {
    state: SelectorState,
    active: bool,
    listeners: Vec<Sender<SelectionEvent>>,
}
impl Default for RangeSelector {
    fn default() -> Self {
        Self::new()
    }
}
impl RangeSelector {
    pub fn new() -> Self {
        Self {
            state: SelectorState::Idle,
            active: false,
            listeners: Vec::new(),
        }
    }
    pub fn subscribe(&mut self) -> Receiver<SelectionEvent> {
        let (tx, rx) = channel();
        self.listeners.push(tx);
        rx
    }
    pub fn state(&self) -> SelectorState {
        self.state
    }
    pub fn is_active(&self) -> bool {
        self.active
    }
    /// Enters selection mode, discarding any half-made or untaken selection.
    pub fn activate(&mut self) {
        self.reset_markers();
        self.active = true;
        self.emit(SelectionEvent::Activated);
    }
    pub fn deactivate(&mut self) {
        self.reset_markers();
        self.active = false;
        self.emit(SelectionEvent::Deactivated);
    }
    /// Feeds one click at time `t`. Returns the window when this click
    /// completes a selection.
    pub fn click(&mut self, t: f64) -> Option<SelectionWindow> {
        if !self.active || !t.is_finite() {
            debug!("selector ignored click at t={t}");
            return None;
        }
        match self.state {
            SelectorState::Idle => {
                self.place_first(t);
                None
            }
            SelectorState::AwaitingSecondPoint { first } => {
                let window = SelectionWindow::new(first, t);
                self.state = SelectorState::Ready(window);
                self.emit(SelectionEvent::MarkerPlaced { t, ordinal: 2 });
                self.emit(SelectionEvent::WindowReady(window));
                debug!("selection ready: [{}, {}]", window.start, window.end);
                Some(window)
            }
            SelectorState::Ready(_) => {
                self.reset_markers();
                self.place_first(t);
                None
            }
        }
    }
    /// Hands the ready window to the caller and returns to idle.
    pub fn take_window(&mut self) -> Option<SelectionWindow> {
        match self.state {
            SelectorState::Ready(window) => {
                self.state = SelectorState::Idle;
                Some(window)
            }
            _ => None,
        }
    }
    /// Crosshair feedback. Changes nothing apart from the notification.
    pub fn hover(&mut self, t: f64) -> Option<f64> {
        if !self.active || matches!(self.state, SelectorState::Ready(_)) {
            return None;
        }
        self.emit(SelectionEvent::Hover(t));
        Some(t)
    }
    fn place_first(&mut self, t: f64) {
        self.state = SelectorState::AwaitingSecondPoint { first: t };
        self.emit(SelectionEvent::MarkerPlaced { t, ordinal: 1 });
    }
    fn reset_markers(&mut self) {
        if self.state != SelectorState::Idle {
            self.state = SelectorState::Idle;
            self.emit(SelectionEvent::MarkersCleared);
        }
    }
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
    fn emit(&mut self, event: SelectionEvent) {
        // hung-up listeners are dropped
        self.listeners.retain(|listener| listener.send(event).is_ok());
    }
}
