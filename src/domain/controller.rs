use crate::domain::models::{Buttons, Status};
use crate::infrastructure::bluetooth::protocol::Decoded;

/// Per-controller state, changed only by decoded reports and the rumble latch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerState {
    buttons: Buttons,
    status: Status,
    rumble: bool,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded report
    ///
    /// A status report replaces buttons and status together; a buttons
    /// report never touches the status snapshot.
    pub fn apply(&mut self, report: &Decoded) {
        match *report {
            Decoded::Buttons(buttons) => self.buttons = buttons,
            Decoded::Status { buttons, status } => {
                self.buttons = buttons;
                self.status = status;
            }
            Decoded::Ignored => {}
        }
    }

    /// Set the rumble latch. Does not send anything.
    pub fn set_rumble(&mut self, on: bool) {
        self.rumble = on;
    }

    pub fn rumble(&self) -> bool {
        self.rumble
    }

    pub fn buttons(&self) -> Buttons {
        self.buttons
    }

    /// Last status snapshot; stale until a status report arrives
    pub fn status(&self) -> Status {
        self.status
    }
}
