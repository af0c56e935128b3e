//! ==============================================================================
//! view.rs - indicator surface the poller renders into
//! ==============================================================================
//!
//! purpose:
//!     the poller never knows which widgets exist. it talks to a
//!     `DashboardView`, and each implementation decides what to draw.
//!     an implementation that has no door indicator (or no temperature
//!     label) simply ignores that call.
//!
//! relationships:
//!     - used by: poller.rs (StatusPoller<V: DashboardView>)
//!     - implemented by: ConsoleView (here), RecordingView (testing.rs)
//!
//! ==============================================================================

/// capability set handed to the poller at construction
pub trait DashboardView: Send + Sync + 'static {
    fn set_door_indicator(&self, open: bool);
    fn set_temperature(&self, text: &str);
    fn set_toggle_enabled(&self, enabled: bool);
}

/// rendered form of the door state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorIndicator {
    Open,
    Closed,
}

impl DoorIndicator {
    pub fn from_open(open: bool) -> Self {
        if open { Self::Open } else { Self::Closed }
    }

    /// visual class of the status dot
    pub fn css_class(self) -> &'static str {
        match self {
            Self::Open => "bg-success",
            Self::Closed => "bg-danger",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "ABIERTA",
            Self::Closed => "CERRADA",
        }
    }
}

/// terminal rendering for the host binary
pub struct ConsoleView {
    show_readings: bool,
}

impl ConsoleView {
    pub fn new(show_readings: bool) -> Self {
        Self { show_readings }
    }
}

impl DashboardView for ConsoleView {
    fn set_door_indicator(&self, open: bool) {
        let indicator = DoorIndicator::from_open(open);
        if self.show_readings {
            let dot = match indicator {
                DoorIndicator::Open => "🟢",
                DoorIndicator::Closed => "🔴",
            };
            println!("[DOOR] {} {} ({})", dot, indicator.label(), indicator.css_class());
        }
    }

    fn set_temperature(&self, text: &str) {
        if self.show_readings {
            println!("[TEMP] {} °C", text);
        }
    }

    fn set_toggle_enabled(&self, enabled: bool) {
        if enabled {
            println!("[CONTROL] toggle ready (t)");
        } else {
            println!("[CONTROL] toggling door...");
        }
    }
}
