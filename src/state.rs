//! Global performance state
//!
//! One owned [`StateStore`] per session, created at session start and torn
//! down with the engine. Both loops copy the state out each tick; writers go
//! through the synchronized setters, which notify subscribers synchronously.
//! No ambient global.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Lighting/visual programming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Party,
    Rave,
    Twinkle,
    Blackout,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Party => "party",
            Mode::Rave => "rave",
            Mode::Twinkle => "twinkle",
            Mode::Blackout => "blackout",
        }
    }
}

/// Copy-out view of the session state. Cheap to clone; loops take one per
/// tick instead of holding the store lock.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceState {
    pub mode: Mode,
    pub theme: String,
    pub venue: String,
    /// 0.0 - 1.0, fed by the scheduler's hype accumulator and manual deploys.
    pub hype: f32,
    /// Manual dimmer override for the operator-controlled group, if any.
    pub manual_dimmer: Option<f32>,
    /// Epoch of the structural generation this state was last regenerated at.
    pub epoch: u64,
}

/// Change notifications delivered synchronously on write.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    ModeChanged(Mode),
    ThemeChanged(String),
    VenueChanged(String),
    ManualDimmerChanged(Option<f32>),
    HypeDeployed,
}

struct StoreInner {
    state: PerformanceState,
    hype_boost_until: Option<Instant>,
    subscribers: Vec<Box<dyn Fn(&StateEvent) + Send>>,
}

#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl StateStore {
    pub fn new(mode: Mode, theme: String, venue: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                state: PerformanceState {
                    mode,
                    theme,
                    venue,
                    hype: 0.0,
                    manual_dimmer: None,
                    epoch: 0,
                },
                hype_boost_until: None,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Copy the current state out. Expired hype deploys are cleared here so
    /// readers never observe a boost past its duration.
    pub fn snapshot(&self) -> PerformanceState {
        let mut inner = self.inner.lock().expect("state store poisoned");
        if let Some(until) = inner.hype_boost_until {
            if Instant::now() >= until {
                inner.hype_boost_until = None;
                inner.state.hype = 0.0;
            }
        }
        inner.state.clone()
    }

    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&StateEvent) + Send + 'static,
    {
        let mut inner = self.inner.lock().expect("state store poisoned");
        inner.subscribers.push(Box::new(f));
    }

    fn notify(inner: &StoreInner, event: StateEvent) {
        for sub in &inner.subscribers {
            sub(&event);
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        let mut inner = self.inner.lock().expect("state store poisoned");
        if inner.state.mode == mode {
            return;
        }
        inner.state.mode = mode;
        log::info!("[state] mode changed to: {}", mode.name());
        Self::notify(&inner, StateEvent::ModeChanged(mode));
    }

    pub fn set_theme(&self, theme: String) {
        let mut inner = self.inner.lock().expect("state store poisoned");
        if inner.state.theme == theme {
            return;
        }
        inner.state.theme = theme.clone();
        Self::notify(&inner, StateEvent::ThemeChanged(theme));
    }

    pub fn set_venue(&self, venue: String) {
        let mut inner = self.inner.lock().expect("state store poisoned");
        if inner.state.venue == venue {
            return;
        }
        inner.state.venue = venue.clone();
        Self::notify(&inner, StateEvent::VenueChanged(venue));
    }

    pub fn set_manual_dimmer(&self, value: Option<f32>) {
        let value = value.map(|v| v.clamp(0.0, 1.0));
        let mut inner = self.inner.lock().expect("state store poisoned");
        inner.state.manual_dimmer = value;
        Self::notify(&inner, StateEvent::ManualDimmerChanged(value));
    }

    /// Scheduler feedback path: mirror the rolling hype accumulator into the
    /// readable state. Does not notify; this changes every tick.
    pub fn set_hype(&self, hype: f32) {
        let mut inner = self.inner.lock().expect("state store poisoned");
        if inner.hype_boost_until.is_none() {
            inner.state.hype = hype.clamp(0.0, 1.0);
        }
    }

    /// Operator-triggered hype boost: pin hype to full for `duration`.
    pub fn deploy_hype(&self, duration: Duration) {
        let mut inner = self.inner.lock().expect("state store poisoned");
        inner.state.hype = 1.0;
        inner.hype_boost_until = Some(Instant::now() + duration);
        log::info!("[state] hype deployed for {:.0}s", duration.as_secs_f32());
        Self::notify(&inner, StateEvent::HypeDeployed);
    }

    /// Record the epoch of the structural generation currently live.
    pub fn set_epoch(&self, epoch: u64) {
        let mut inner = self.inner.lock().expect("state store poisoned");
        inner.state.epoch = epoch;
    }
}
