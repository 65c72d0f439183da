//! Control surface
//!
//! Operator commands applied between ticks: mode and theme switches, manual
//! overrides, forced shifts. Commands validate against the session catalog
//! before touching state so a typo never lands mid-show.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;

use crate::config::{EngineConfig, SessionConfig};
use crate::error::EngineError;
use crate::scheduler::{DecisionKind, SceneScheduler};
use crate::state::{Mode, StateStore};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    SetMode { mode: Mode },
    SetTheme { theme: String },
    /// Venue ids are opaque labels; the fixture patch itself is static for
    /// the session.
    SetVenue { venue: String },
    SetManualDimmer { value: Option<f32> },
    /// Immediate full regeneration, bypassing the drop guard.
    ForceShift,
    Blackout,
    Resume { mode: Mode },
    DeployHype,
}

/// What the command changed, echoed back to the operator UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    ModeSet(Mode),
    ThemeSet(String),
    VenueSet(String),
    ManualDimmerSet(Option<f32>),
    ShiftForced,
    BlackoutEngaged,
    Resumed(Mode),
    HypeDeployed,
}

#[derive(Clone)]
pub struct ControlSurface {
    store: StateStore,
    scheduler: Arc<Mutex<SceneScheduler>>,
    session: Arc<SessionConfig>,
    cfg: EngineConfig,
}

impl ControlSurface {
    pub fn new(
        store: StateStore,
        scheduler: Arc<Mutex<SceneScheduler>>,
        session: Arc<SessionConfig>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            session,
            cfg,
        }
    }

    pub fn apply(&self, command: ControlCommand) -> Result<Ack, EngineError> {
        match command {
            ControlCommand::SetMode { mode } => {
                self.store.set_mode(mode);
                Ok(Ack::ModeSet(mode))
            }
            ControlCommand::SetTheme { theme } => {
                if self.session.theme(&theme).is_none() {
                    return Err(EngineError::UnknownResource {
                        kind: "theme",
                        id: theme,
                    });
                }
                self.store.set_theme(theme.clone());
                // A theme switch deserves a fresh palette on the next tick.
                self.force(DecisionKind::HardShift);
                Ok(Ack::ThemeSet(theme))
            }
            ControlCommand::SetVenue { venue } => {
                self.store.set_venue(venue.clone());
                Ok(Ack::VenueSet(venue))
            }
            ControlCommand::SetManualDimmer { value } => {
                self.store.set_manual_dimmer(value);
                Ok(Ack::ManualDimmerSet(value.map(|v| v.clamp(0.0, 1.0))))
            }
            ControlCommand::ForceShift => {
                self.force(DecisionKind::HardShift);
                Ok(Ack::ShiftForced)
            }
            ControlCommand::Blackout => {
                self.store.set_mode(Mode::Blackout);
                Ok(Ack::BlackoutEngaged)
            }
            ControlCommand::Resume { mode } => {
                if mode == Mode::Blackout {
                    return Err(EngineError::Config(
                        "resume target cannot be blackout".into(),
                    ));
                }
                self.store.set_mode(mode);
                Ok(Ack::Resumed(mode))
            }
            ControlCommand::DeployHype => {
                self.store
                    .deploy_hype(Duration::from_secs_f32(self.cfg.hype_deploy_secs));
                // A deploy must land in the output, not just the UI: charge
                // the scheduler so the escalation fires once the guard clears.
                self.scheduler
                    .lock()
                    .expect("scheduler poisoned")
                    .deploy_hype();
                Ok(Ack::HypeDeployed)
            }
        }
    }

    /// Parse a JSON command line and apply it. The wire shape is the serde
    /// tag form, e.g. `{"command": "set_mode", "mode": "rave"}`.
    pub fn apply_json(&self, raw: &str) -> Result<Ack, EngineError> {
        let command: ControlCommand = serde_json::from_str(raw)
            .map_err(|e| EngineError::Config(format!("bad control command: {}", e)))?;
        self.apply(command)
    }

    fn force(&self, kind: DecisionKind) {
        self.scheduler
            .lock()
            .expect("scheduler poisoned")
            .force(kind);
    }
}
