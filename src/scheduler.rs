//! Scene Scheduler
//!
//! Decides *when* structural regeneration is allowed, independent of what the
//! directors generate. Both loops consume the same epoch-tagged decision, at
//! most once per epoch, so lighting and visuals always agree on when the
//! scene changed.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::EngineConfig;
use crate::signal::SignalSnapshot;
use crate::state::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    NoChange,
    /// Partial regeneration: one lighting group evicted, foreground visual
    /// layers rebuilt, one palette slot refreshed.
    SoftShift,
    /// Full-stack regeneration.
    HardShift,
    BlackoutNow,
}

/// A scheduler decision tagged with a monotonically increasing epoch.
/// `NoChange` carries the current epoch; structural decisions bump it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneDecision {
    pub epoch: u64,
    pub kind: DecisionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Warmup,
    Steady,
    Suppressed,
    Blackout,
}

pub struct SceneScheduler {
    quiet_period: Duration,
    peak_energy: f32,
    mid_energy: f32,
    beat_guard: Duration,
    hype_threshold: f32,
    hype_charge_rate: f32,
    hype_decay_rate: f32,
    warmup: Duration,
    warmup_floor: f32,

    session: Duration,
    since_shift: Duration,
    since_beat: Option<Duration>,
    hype: f32,
    phase: SchedulerPhase,
    epoch: u64,
    /// Hype crossed the threshold while the drop guard was armed; the
    /// escalation fires as soon as the guard clears.
    pending_hard: bool,
    forced: Option<DecisionKind>,
    rng: StdRng,
}

impl SceneScheduler {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            quiet_period: Duration::from_secs_f32(cfg.quiet_period_secs),
            peak_energy: cfg.peak_energy,
            mid_energy: cfg.mid_energy,
            beat_guard: Duration::from_millis(cfg.beat_guard_ms),
            hype_threshold: cfg.hype_threshold,
            hype_charge_rate: cfg.hype_charge_rate,
            hype_decay_rate: cfg.hype_decay_rate,
            warmup: Duration::from_secs_f32(cfg.warmup_secs),
            warmup_floor: cfg.warmup_floor,
            session: Duration::ZERO,
            since_shift: Duration::ZERO,
            since_beat: None,
            hype: 0.0,
            phase: SchedulerPhase::Warmup,
            epoch: 0,
            pending_hard: false,
            forced: None,
            rng: StdRng::seed_from_u64(cfg.master_seed ^ 0x5ced),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Rolling hype accumulator, normalized against the escalation threshold.
    pub fn hype(&self) -> f32 {
        (self.hype / self.hype_threshold).clamp(0.0, 1.0)
    }

    /// Intensity multiplier for the warmup ramp: linear from the floor to
    /// full range over the warmup interval, then pinned at 1.0.
    pub fn intensity_scale(&self) -> f32 {
        if self.warmup.is_zero() {
            return 1.0;
        }
        let progress =
            (self.session.as_secs_f32() / self.warmup.as_secs_f32()).clamp(0.0, 1.0);
        self.warmup_floor + (1.0 - self.warmup_floor) * progress
    }

    /// Manual override from the control surface. Bypasses the drop guard on
    /// the next tick.
    pub fn force(&mut self, kind: DecisionKind) {
        self.forced = Some(kind);
    }

    /// Operator hype deploy: charge the accumulator to the escalation point.
    /// The HardShift fires on the next tick the drop guard allows, same as an
    /// organically earned escalation.
    pub fn deploy_hype(&mut self) {
        self.hype = self.hype_threshold;
        self.pending_hard = true;
        log::info!("[scheduler] hype deployed, escalation pending");
    }

    fn emit(&mut self, kind: DecisionKind) -> SceneDecision {
        self.epoch += 1;
        self.since_shift = Duration::ZERO;
        self.pending_hard = false;
        self.phase = match kind {
            DecisionKind::BlackoutNow => SchedulerPhase::Blackout,
            _ if self.session < self.warmup => SchedulerPhase::Warmup,
            _ => SchedulerPhase::Steady,
        };
        log::info!(
            "[scheduler] epoch {} -> {:?} (t={:.1}s)",
            self.epoch,
            kind,
            self.session.as_secs_f32()
        );
        SceneDecision {
            epoch: self.epoch,
            kind,
        }
    }

    fn no_change(&self) -> SceneDecision {
        SceneDecision {
            epoch: self.epoch,
            kind: DecisionKind::NoChange,
        }
    }

    /// Advance clocks and produce this tick's decision.
    pub fn tick(&mut self, signal: &SignalSnapshot, elapsed: Duration, mode: Mode) -> SceneDecision {
        self.session += elapsed;
        self.since_shift += elapsed;
        if signal.beat {
            self.since_beat = Some(Duration::ZERO);
        } else if let Some(sb) = self.since_beat {
            self.since_beat = Some(sb + elapsed);
        }

        let dt = elapsed.as_secs_f32();
        if signal.energy > self.peak_energy && signal.sustained {
            self.hype = (self.hype + self.hype_charge_rate * dt).min(self.hype_threshold * 1.5);
        } else {
            self.hype *= (-self.hype_decay_rate * dt).exp();
        }

        // Blackout pre-empts everything; entering it bumps the epoch once,
        // re-entering is a no-op, leaving rebuilds the full stack.
        if mode == Mode::Blackout {
            if self.phase == SchedulerPhase::Blackout {
                return self.no_change();
            }
            return self.emit(DecisionKind::BlackoutNow);
        }
        if self.phase == SchedulerPhase::Blackout {
            return self.emit(DecisionKind::HardShift);
        }

        // Manual overrides skip the drop guard entirely.
        if let Some(kind) = self.forced.take() {
            return self.emit(kind);
        }

        let in_warmup = self.session < self.warmup;
        if !in_warmup && self.phase == SchedulerPhase::Warmup {
            self.phase = SchedulerPhase::Steady;
        }

        // Drop-avoidance guard: no structural change during a peak or right
        // on a beat. Anything due stays pending until the guard clears.
        let beat_recent = self
            .since_beat
            .map(|sb| sb <= self.beat_guard)
            .unwrap_or(false);
        if signal.energy > self.peak_energy || beat_recent {
            if self.hype >= self.hype_threshold {
                self.pending_hard = true;
            }
            if !in_warmup {
                self.phase = SchedulerPhase::Suppressed;
            }
            return self.no_change();
        }

        if !in_warmup && self.phase == SchedulerPhase::Suppressed {
            self.phase = SchedulerPhase::Steady;
        }

        // Hype escalation intensifies programming the moment the guard is
        // clear, regardless of the quiet-period timer. Deferred past warmup
        // so the opening ramp stays soft.
        if (self.pending_hard || self.hype >= self.hype_threshold) && !in_warmup {
            self.hype = 0.0;
            return self.emit(DecisionKind::HardShift);
        }

        // Quiet-period rule.
        if self.since_shift >= self.quiet_period && signal.energy < self.mid_energy {
            if in_warmup {
                // Damped probability during warmup: early in the ramp most
                // due shifts are skipped and retried next tick.
                let p = (self.session.as_secs_f32() / self.warmup.as_secs_f32()).clamp(0.0, 1.0);
                if self.rng.gen::<f32>() > p {
                    return self.no_change();
                }
            }
            return self.emit(DecisionKind::SoftShift);
        }

        if in_warmup {
            self.phase = SchedulerPhase::Warmup;
        }
        self.no_change()
    }
}
