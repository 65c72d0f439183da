//! Interpreter Pipeline
//!
//! Interpreters map the latest signal snapshot to per-group parameter values.
//! The variant set is closed and handled exhaustively at the evaluation site;
//! new looks are added through the director's generation tables, not ad hoc
//! probing. Any internal memory (latch state, jitter rng) is owned by the
//! interpreter instance so a fixed (assignment, signal, state) triple always
//! reproduces the same output sequence.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::ColorScheme;
use crate::error::EngineError;
use crate::fixtures::models::{Capability, FixtureGroup, GroupValues};
use crate::signal::{Band, SignalSnapshot};
use crate::state::{Mode, PerformanceState};

/// Response curve for mapping a band intensity to a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Curve {
    Linear,
    Exponential { power: f32 },
    /// Zero below the threshold, linear re-normalized above it.
    ThresholdGated { threshold: f32 },
}

impl Curve {
    pub fn apply(&self, x: f32) -> f32 {
        let x = x.clamp(0.0, 1.0);
        match *self {
            Curve::Linear => x,
            Curve::Exponential { power } => x.powf(power.max(0.01)),
            Curve::ThresholdGated { threshold } => {
                if x < threshold {
                    0.0
                } else if threshold >= 1.0 {
                    1.0
                } else {
                    (x - threshold) / (1.0 - threshold)
                }
            }
        }
    }
}

/// What a base mapping writes into the group's parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    Dimmer,
    /// Palette slot; the curve output scales the color's brightness.
    PaletteColor { slot: usize },
    Strobe,
    /// Pan/tilt sweep around center; the curve output drives the extent.
    Sweep,
    Gobo,
}

impl Target {
    fn required_capability(self) -> Capability {
        match self {
            Target::Dimmer => Capability::Dimmer,
            Target::PaletteColor { .. } => Capability::Color,
            Target::Strobe => Capability::Strobe,
            Target::Sweep => Capability::Position,
            Target::Gobo => Capability::Gobo,
        }
    }
}

/// Condition that makes a latched interpreter recompute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    BeatPulse,
    EnergyAbove(f32),
}

impl Trigger {
    fn fired(&self, snapshot: &SignalSnapshot) -> bool {
        match *self {
            Trigger::BeatPulse => snapshot.beat,
            Trigger::EnergyAbove(threshold) => snapshot.energy >= threshold,
        }
    }
}

/// Variant tag used by the director's never-repeat history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpreterKind {
    Base,
    Composite,
    SignalDriven,
    Latched,
    Randomized,
}

impl InterpreterKind {
    pub fn name(self) -> &'static str {
        match self {
            InterpreterKind::Base => "base",
            InterpreterKind::Composite => "composite",
            InterpreterKind::SignalDriven => "signal-driven",
            InterpreterKind::Latched => "latched",
            InterpreterKind::Randomized => "randomized",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaseInterpreter {
    pub band: Band,
    /// Optional second band averaged in.
    pub second_band: Option<Band>,
    pub target: Target,
    pub curve: Curve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDrivenInterpreter {
    /// The band this interpreter claims for the coverage check.
    pub band: Band,
    pub target: Target,
    pub curve: Curve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatchedInterpreter {
    pub inner: Box<Interpreter>,
    pub trigger: Trigger,
    held: Option<GroupValues>,
}

#[derive(Debug, Clone)]
pub struct RandomizedInterpreter {
    pub inner: Box<Interpreter>,
    /// Maximum absolute perturbation applied to the scalar channels (dimmer,
    /// strobe, position). Color and gobo pass through unchanged.
    pub jitter: f32,
    rng: StdRng,
}

impl PartialEq for RandomizedInterpreter {
    fn eq(&self, other: &Self) -> bool {
        // Rng state is not comparable; identity is the wrapped shape.
        self.inner == other.inner && self.jitter == other.jitter
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interpreter {
    Base(BaseInterpreter),
    Composite(Vec<Interpreter>),
    SignalDriven(SignalDrivenInterpreter),
    Latched(LatchedInterpreter),
    Randomized(RandomizedInterpreter),
}

impl Interpreter {
    pub fn latched(inner: Interpreter, trigger: Trigger) -> Interpreter {
        Interpreter::Latched(LatchedInterpreter {
            inner: Box::new(inner),
            trigger,
            held: None,
        })
    }

    /// Jitter is seeded per assignment: reproducible for a fixed seed,
    /// different across reassignments.
    pub fn randomized(inner: Interpreter, jitter: f32, seed: u64) -> Interpreter {
        Interpreter::Randomized(RandomizedInterpreter {
            inner: Box::new(inner),
            jitter,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn kind(&self) -> InterpreterKind {
        match self {
            Interpreter::Base(_) => InterpreterKind::Base,
            Interpreter::Composite(_) => InterpreterKind::Composite,
            Interpreter::SignalDriven(_) => InterpreterKind::SignalDriven,
            Interpreter::Latched(_) => InterpreterKind::Latched,
            Interpreter::Randomized(_) => InterpreterKind::Randomized,
        }
    }

    /// Union of bands claimed by SignalDriven members, for the coverage check.
    pub fn claimed_bands(&self, out: &mut HashSet<Band>) {
        match self {
            Interpreter::SignalDriven(sd) => {
                out.insert(sd.band);
            }
            Interpreter::Composite(chain) => {
                for child in chain {
                    child.claimed_bands(out);
                }
            }
            Interpreter::Latched(l) => l.inner.claimed_bands(out),
            Interpreter::Randomized(r) => r.inner.claimed_bands(out),
            Interpreter::Base(_) => {}
        }
    }

    pub fn required_capabilities(&self, out: &mut HashSet<Capability>) {
        match self {
            Interpreter::Base(b) => {
                out.insert(b.target.required_capability());
            }
            Interpreter::SignalDriven(sd) => {
                out.insert(sd.target.required_capability());
            }
            Interpreter::Composite(chain) => {
                for child in chain {
                    child.required_capabilities(out);
                }
            }
            Interpreter::Latched(l) => l.inner.required_capabilities(out),
            Interpreter::Randomized(r) => r.inner.required_capabilities(out),
        }
    }

    /// Assignment-time check: an interpreter addressing a channel its group
    /// cannot render is a configuration error, not a tick-time surprise.
    pub fn validate_for_group(&self, group: &FixtureGroup) -> Result<(), EngineError> {
        let mut required = HashSet::new();
        self.required_capabilities(&mut required);
        for cap in required {
            if !group.has(cap) {
                return Err(EngineError::Config(format!(
                    "group '{}' lacks capability {:?} required by a {} interpreter",
                    group.id,
                    cap,
                    self.kind().name()
                )));
            }
        }
        Ok(())
    }

    /// Evaluate for one tick. Blackout forces the zero channel vector no
    /// matter what the signal says. Ticks never fail at the director level;
    /// an `Err` here is isolated by the caller.
    pub fn eval(
        &mut self,
        snapshot: &SignalSnapshot,
        state: &PerformanceState,
        scheme: &ColorScheme,
    ) -> Result<GroupValues, String> {
        if state.mode == Mode::Blackout {
            return Ok(GroupValues::blackout());
        }
        self.eval_inner(snapshot, state, scheme)
    }

    fn eval_inner(
        &mut self,
        snapshot: &SignalSnapshot,
        state: &PerformanceState,
        scheme: &ColorScheme,
    ) -> Result<GroupValues, String> {
        match self {
            Interpreter::Base(b) => Ok(eval_mapping(
                b.band,
                b.second_band,
                b.target,
                b.curve,
                snapshot,
                scheme,
            )),
            Interpreter::SignalDriven(sd) => Ok(eval_mapping(
                sd.band,
                None,
                sd.target,
                sd.curve,
                snapshot,
                scheme,
            )),
            Interpreter::Composite(chain) => {
                if chain.is_empty() {
                    return Err("composite interpreter has an empty chain".into());
                }
                let mut merged = GroupValues::default();
                for child in chain.iter_mut() {
                    let values = child.eval_inner(snapshot, state, scheme)?;
                    merged.blend_over(&values);
                }
                Ok(merged)
            }
            Interpreter::Latched(l) => {
                if l.held.is_none() || l.trigger.fired(snapshot) {
                    l.held = Some(l.inner.eval_inner(snapshot, state, scheme)?);
                }
                Ok(l.held.unwrap_or_default())
            }
            Interpreter::Randomized(r) => {
                let mut values = r.inner.eval_inner(snapshot, state, scheme)?;
                let jitter = r.jitter;
                let mut perturb = |v: f32| -> f32 {
                    (v + r.rng.gen_range(-jitter..=jitter)).clamp(0.0, 1.0)
                };
                if let Some(d) = values.dimmer {
                    values.dimmer = Some(perturb(d));
                }
                if let Some(s) = values.strobe {
                    values.strobe = Some(perturb(s));
                }
                if let Some(p) = values.position {
                    values.position = Some([perturb(p[0]), perturb(p[1])]);
                }
                Ok(values)
            }
        }
    }
}

fn eval_mapping(
    band: Band,
    second_band: Option<Band>,
    target: Target,
    curve: Curve,
    snapshot: &SignalSnapshot,
    scheme: &ColorScheme,
) -> GroupValues {
    let raw = match second_band {
        Some(b2) => (snapshot.band(band) + snapshot.band(b2)) / 2.0,
        None => snapshot.band(band),
    };
    let level = curve.apply(raw);

    let mut values = GroupValues::default();
    match target {
        Target::Dimmer => values.dimmer = Some(level),
        Target::PaletteColor { slot } => {
            let c = scheme.color(slot);
            values.color = Some([c.r * level, c.g * level, c.b * level]);
        }
        Target::Strobe => values.strobe = Some(level),
        Target::Sweep => {
            // Symmetric sweep around center, extent driven by the signal.
            values.position = Some([0.5 - level / 2.0, 0.5 + level / 2.0]);
        }
        Target::Gobo => values.gobo = Some(level),
    }
    values
}
