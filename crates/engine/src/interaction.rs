//! Interaction router: carries UI events into the engine's per-frame
//! pre-step.
//!
//! Coordinates are in the frame's pixel space; the UI maps its viewport to
//! frame pixels before sending. The cursor is latest-value; clicks and
//! commands are consume-once.

use std::sync::Mutex;

use tracing::debug;
use types::UiEvent;

/// Operator command forwarded to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterCommand {
    StopTracking,
    ReselectObject,
}

#[derive(Debug, Default)]
struct Slots {
    cursor: Option<(i32, i32)>,
    pending_click: Option<(i32, i32)>,
    pending_command: Option<RouterCommand>,
}

/// Thread-safe event slots between the UI intake and the engine task.
#[derive(Debug, Default)]
pub struct InteractionRouter {
    slots: Mutex<Slots>,
}

impl InteractionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&self, event: UiEvent) {
        let mut slots = self.slots.lock().expect("interaction slots poisoned");
        match event {
            UiEvent::MouseMove { x, y } => slots.cursor = Some((x, y)),
            UiEvent::Click { x, y } => {
                debug!(x, y, "click registered");
                slots.cursor = Some((x, y));
                slots.pending_click = Some((x, y));
            }
            UiEvent::StopTracking => slots.pending_command = Some(RouterCommand::StopTracking),
            UiEvent::ReselectObject => {
                slots.pending_command = Some(RouterCommand::ReselectObject)
            }
        }
    }

    /// Latest cursor position, if the UI has sent one.
    pub fn cursor_pos(&self) -> Option<(i32, i32)> {
        self.slots.lock().expect("interaction slots poisoned").cursor
    }

    /// Take and clear the pending click.
    pub fn take_pending_click(&self) -> Option<(i32, i32)> {
        self.slots
            .lock()
            .expect("interaction slots poisoned")
            .pending_click
            .take()
    }

    /// Take and clear the pending command.
    pub fn take_pending_command(&self) -> Option<RouterCommand> {
        self.slots
            .lock()
            .expect("interaction slots poisoned")
            .pending_command
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_is_latest_value() {
        let router = InteractionRouter::new();
        assert!(router.cursor_pos().is_none());

        router.handle_event(UiEvent::MouseMove { x: 10, y: 20 });
        router.handle_event(UiEvent::MouseMove { x: 30, y: 40 });
        assert_eq!(router.cursor_pos(), Some((30, 40)));
        // Reading does not consume.
        assert_eq!(router.cursor_pos(), Some((30, 40)));
    }

    #[test]
    fn test_click_is_consume_once() {
        let router = InteractionRouter::new();
        router.handle_event(UiEvent::Click { x: 5, y: 6 });
        assert_eq!(router.take_pending_click(), Some((5, 6)));
        assert_eq!(router.take_pending_click(), None);
    }

    #[test]
    fn test_click_also_moves_cursor() {
        let router = InteractionRouter::new();
        router.handle_event(UiEvent::Click { x: 5, y: 6 });
        assert_eq!(router.cursor_pos(), Some((5, 6)));
    }

    #[test]
    fn test_command_is_consume_once() {
        let router = InteractionRouter::new();
        router.handle_event(UiEvent::StopTracking);
        assert_eq!(
            router.take_pending_command(),
            Some(RouterCommand::StopTracking)
        );
        assert_eq!(router.take_pending_command(), None);

        router.handle_event(UiEvent::ReselectObject);
        assert_eq!(
            router.take_pending_command(),
            Some(RouterCommand::ReselectObject)
        );
    }

    #[test]
    fn test_newer_command_overwrites_pending() {
        let router = InteractionRouter::new();
        router.handle_event(UiEvent::StopTracking);
        router.handle_event(UiEvent::ReselectObject);
        assert_eq!(
            router.take_pending_command(),
            Some(RouterCommand::ReselectObject)
        );
    }
}
