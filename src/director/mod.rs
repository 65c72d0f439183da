//! Lighting Director
//!
//! Owns the fixture-group -> interpreter assignment and regenerates it when
//! the Scene Scheduler allows. Selection favors variety (a group never gets
//! the same interpreter kind twice in a row) and honors each group's
//! capability tags; a generated assignment that fails validation is rejected
//! in favor of the previous valid one.

use std::collections::{HashMap, HashSet, VecDeque};

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::ColorScheme;
use crate::config::EngineConfig;
use crate::fixtures::models::{Capability, FixtureGroup, GroupValues};
use crate::interpreters::{
    BaseInterpreter, Curve, Interpreter, InterpreterKind, SignalDrivenInterpreter, Target, Trigger,
};
use crate::scheduler::{DecisionKind, SceneDecision};
use crate::signal::{Band, SignalSnapshot};
use crate::state::{Mode, PerformanceState};

const HISTORY_LEN: usize = 4;
/// State hype at or above this narrows selection to high-intensity looks.
const HYPE_BIAS: f32 = 0.75;

/// Current fixture-group -> interpreter mapping, tagged with the epoch of the
/// structural generation it belongs to. Every declared group has exactly one
/// entry at all times after construction (coverage invariant).
#[derive(Debug)]
pub struct Assignment {
    pub epoch: u64,
    pub entries: HashMap<String, Interpreter>,
}

impl Assignment {
    /// Union of bands claimed by SignalDriven interpreters across the whole
    /// assignment.
    pub fn claimed_bands(&self) -> HashSet<Band> {
        let mut bands = HashSet::new();
        for interp in self.entries.values() {
            interp.claimed_bands(&mut bands);
        }
        bands
    }
}

/// One candidate look in the generation tables.
struct LookTemplate {
    name: &'static str,
    kind: InterpreterKind,
    requires: Capability,
    /// Excluded from gentle modes (strobe, aggressive jitter).
    high_intensity: bool,
    build: fn(&mut StdRng, usize) -> Interpreter,
}

static LOOK_TEMPLATES: Lazy<Vec<LookTemplate>> = Lazy::new(|| {
    vec![
        LookTemplate {
            name: "bass dimmer pulse",
            kind: InterpreterKind::SignalDriven,
            requires: Capability::Dimmer,
            high_intensity: false,
            build: |_, _| {
                Interpreter::SignalDriven(SignalDrivenInterpreter {
                    band: Band::Bass,
                    target: Target::Dimmer,
                    curve: Curve::Exponential { power: 2.0 },
                })
            },
        },
        LookTemplate {
            name: "palette wash",
            kind: InterpreterKind::Base,
            requires: Capability::Color,
            high_intensity: false,
            build: |rng, palette_len| {
                Interpreter::Base(BaseInterpreter {
                    band: Band::Mid,
                    second_band: Some(Band::Treble),
                    target: Target::PaletteColor {
                        slot: rng.gen_range(0..palette_len.max(1)),
                    },
                    curve: Curve::Linear,
                })
            },
        },
        LookTemplate {
            name: "beat-latched color",
            kind: InterpreterKind::Latched,
            requires: Capability::Color,
            high_intensity: false,
            build: |rng, palette_len| {
                Interpreter::latched(
                    Interpreter::Base(BaseInterpreter {
                        band: Band::Bass,
                        second_band: None,
                        target: Target::PaletteColor {
                            slot: rng.gen_range(0..palette_len.max(1)),
                        },
                        curve: Curve::Linear,
                    }),
                    Trigger::BeatPulse,
                )
            },
        },
        LookTemplate {
            name: "jittered dimmer",
            kind: InterpreterKind::Randomized,
            requires: Capability::Dimmer,
            high_intensity: false,
            build: |rng, _| {
                Interpreter::randomized(
                    Interpreter::SignalDriven(SignalDrivenInterpreter {
                        band: Band::Mid,
                        target: Target::Dimmer,
                        curve: Curve::Linear,
                    }),
                    0.1,
                    rng.gen(),
                )
            },
        },
        LookTemplate {
            name: "treble strobe burst",
            kind: InterpreterKind::SignalDriven,
            requires: Capability::Strobe,
            high_intensity: true,
            build: |_, _| {
                Interpreter::SignalDriven(SignalDrivenInterpreter {
                    band: Band::Treble,
                    target: Target::Strobe,
                    curve: Curve::ThresholdGated { threshold: 0.7 },
                })
            },
        },
        LookTemplate {
            name: "energy sweep",
            kind: InterpreterKind::Base,
            requires: Capability::Position,
            high_intensity: false,
            build: |_, _| {
                Interpreter::Base(BaseInterpreter {
                    band: Band::Mid,
                    second_band: Some(Band::Bass),
                    target: Target::Sweep,
                    curve: Curve::Linear,
                })
            },
        },
        LookTemplate {
            name: "gobo step",
            kind: InterpreterKind::Latched,
            requires: Capability::Gobo,
            high_intensity: false,
            build: |_, _| {
                Interpreter::latched(
                    Interpreter::Base(BaseInterpreter {
                        band: Band::Presence,
                        second_band: None,
                        target: Target::Gobo,
                        curve: Curve::Linear,
                    }),
                    Trigger::EnergyAbove(0.6),
                )
            },
        },
        LookTemplate {
            name: "bass color stack",
            kind: InterpreterKind::Composite,
            requires: Capability::Color,
            high_intensity: true,
            build: |rng, palette_len| {
                Interpreter::Composite(vec![
                    Interpreter::Base(BaseInterpreter {
                        band: Band::Mid,
                        second_band: None,
                        target: Target::PaletteColor {
                            slot: rng.gen_range(0..palette_len.max(1)),
                        },
                        curve: Curve::Linear,
                    }),
                    Interpreter::SignalDriven(SignalDrivenInterpreter {
                        band: Band::Bass,
                        target: Target::Dimmer,
                        curve: Curve::Exponential { power: 1.5 },
                    }),
                ])
            },
        },
    ]
});

pub struct LightingDirector {
    groups: Vec<FixtureGroup>,
    assignment: Assignment,
    history: HashMap<String, VecDeque<InterpreterKind>>,
    palette_len: usize,
    master_seed: u64,
    shift_count: u64,
}

impl LightingDirector {
    pub fn new(groups: Vec<FixtureGroup>, cfg: &EngineConfig, mode: Mode) -> Self {
        let mut director = Self {
            groups,
            assignment: Assignment {
                epoch: 0,
                entries: HashMap::new(),
            },
            history: HashMap::new(),
            palette_len: cfg.palette_len,
            master_seed: cfg.master_seed,
            shift_count: 0,
        };
        // Initial assignment so the coverage invariant holds from the first
        // tick of warmup onward.
        director.regenerate_all(0, mode, 0.0);
        director
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    fn assignment_rng(&self, epoch: u64) -> StdRng {
        StdRng::seed_from_u64(self.master_seed ^ epoch.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    /// A template is eligible for a group when the group declares its
    /// capability and the mode admits its intensity. Deployed or earned hype
    /// narrows the pool to high-intensity looks where the group has any; the
    /// never-repeat rule applies last and is relaxed rather than leaving a
    /// group uncovered.
    fn pick_for_group(
        &self,
        group: &FixtureGroup,
        mode: Mode,
        hype: f32,
        rng: &mut StdRng,
    ) -> Option<Interpreter> {
        let last_kind = self
            .history
            .get(&group.id)
            .and_then(|h| h.back())
            .copied();

        let mut eligible: Vec<&LookTemplate> = LOOK_TEMPLATES
            .iter()
            .filter(|t| group.has(t.requires))
            .filter(|t| !(mode == Mode::Twinkle && t.high_intensity))
            .collect();

        if hype >= HYPE_BIAS {
            let hot: Vec<&LookTemplate> = eligible
                .iter()
                .copied()
                .filter(|t| t.high_intensity)
                .collect();
            if !hot.is_empty() {
                eligible = hot;
            }
        }

        let fresh: Vec<&LookTemplate> = eligible
            .iter()
            .copied()
            .filter(|t| Some(t.kind) != last_kind)
            .collect();
        let pool = if fresh.is_empty() { eligible } else { fresh };

        if pool.is_empty() {
            return None;
        }
        let template = pool[rng.gen_range(0..pool.len())];
        log::debug!("[director] {} <- {}", group.id, template.name);
        Some((template.build)(rng, self.palette_len))
    }

    fn record_history(&mut self, group_id: &str, kind: InterpreterKind) {
        let history = self.history.entry(group_id.to_string()).or_default();
        history.push_back(kind);
        while history.len() > HISTORY_LEN {
            history.pop_front();
        }
    }

    /// Across the whole assignment the SignalDriven-claimed bands must cover
    /// every declared band; uncovered bands get an extra SignalDriven dimmer
    /// chained onto an eligible group.
    fn ensure_band_coverage(&mut self, rng: &mut StdRng) {
        let claimed = self.assignment.claimed_bands();
        for band in Band::ALL {
            if claimed.contains(&band) {
                continue;
            }
            let eligible: Vec<String> = self
                .groups
                .iter()
                .filter(|g| g.has(Capability::Dimmer))
                .map(|g| g.id.clone())
                .collect();
            if eligible.is_empty() {
                log::error!(
                    "[director] no dimmer-capable group to claim band '{}'",
                    band.name()
                );
                continue;
            }
            let group_id = &eligible[rng.gen_range(0..eligible.len())];
            let extra = Interpreter::SignalDriven(SignalDrivenInterpreter {
                band,
                target: Target::Dimmer,
                curve: Curve::Linear,
            });
            let entry = self.assignment.entries.remove(group_id);
            let combined = match entry {
                Some(Interpreter::Composite(mut chain)) => {
                    chain.push(extra);
                    Interpreter::Composite(chain)
                }
                Some(existing) => Interpreter::Composite(vec![existing, extra]),
                None => extra,
            };
            log::info!(
                "[director] band '{}' unclaimed, augmenting {}",
                band.name(),
                group_id
            );
            self.assignment.entries.insert(group_id.clone(), combined);
        }
    }

    fn validate(&self, entries: &HashMap<String, Interpreter>) -> Result<(), String> {
        for group in &self.groups {
            match entries.get(&group.id) {
                Some(interp) => interp
                    .validate_for_group(group)
                    .map_err(|e| e.to_string())?,
                None => return Err(format!("group '{}' has no interpreter", group.id)),
            }
        }
        Ok(())
    }

    fn regenerate_all(&mut self, epoch: u64, mode: Mode, hype: f32) {
        let mut rng = self.assignment_rng(epoch);
        let previous = std::mem::replace(
            &mut self.assignment,
            Assignment {
                epoch,
                entries: HashMap::new(),
            },
        );

        let mut picked: Vec<(String, Interpreter)> = Vec::new();
        for group in &self.groups {
            match self.pick_for_group(group, mode, hype, &mut rng) {
                Some(interp) => picked.push((group.id.clone(), interp)),
                None => {
                    log::error!(
                        "[director] no eligible look for group '{}', keeping previous",
                        group.id
                    );
                    if let Some(old) = previous.entries.get(&group.id) {
                        picked.push((group.id.clone(), old.clone()));
                    }
                }
            }
        }
        for (id, interp) in picked {
            self.record_history(&id, interp.kind());
            self.assignment.entries.insert(id, interp);
        }
        self.ensure_band_coverage(&mut rng);

        if let Err(e) = self.validate(&self.assignment.entries) {
            log::error!("[director] rejecting generated assignment: {}", e);
            self.assignment = Assignment {
                epoch,
                entries: previous.entries,
            };
        }
    }

    fn regenerate_one(&mut self, epoch: u64, mode: Mode, hype: f32) {
        let mut rng = self.assignment_rng(epoch);
        if self.groups.is_empty() {
            self.assignment.epoch = epoch;
            return;
        }
        let evicted = &self.groups[rng.gen_range(0..self.groups.len())];
        let group_id = evicted.id.clone();

        if let Some(interp) = self.pick_for_group(evicted, mode, hype, &mut rng) {
            if interp.validate_for_group(evicted).is_ok() {
                self.record_history(&group_id, interp.kind());
                self.assignment.entries.insert(group_id, interp);
            } else {
                log::error!(
                    "[director] rejected replacement for '{}', keeping previous",
                    group_id
                );
            }
        }
        self.assignment.epoch = epoch;
        self.ensure_band_coverage(&mut rng);
    }

    /// Apply a scheduler decision. NoChange leaves the assignment untouched;
    /// BlackoutNow re-tags it (interpreters already emit the zero vector in
    /// Blackout mode, and the structure must survive for resumption).
    pub fn on_scheduler_decision(
        &mut self,
        decision: &SceneDecision,
        state: &PerformanceState,
        _scheme: &ColorScheme,
    ) -> &Assignment {
        match decision.kind {
            DecisionKind::NoChange => {}
            DecisionKind::SoftShift => {
                self.shift_count += 1;
                self.regenerate_one(decision.epoch, state.mode, state.hype);
                log::info!(
                    "[director] shift #{} (soft) to {}: {}",
                    self.shift_count,
                    state.mode.name(),
                    self.describe()
                );
            }
            DecisionKind::HardShift => {
                self.shift_count += 1;
                self.regenerate_all(decision.epoch, state.mode, state.hype);
                log::info!(
                    "[director] shift #{} (hard) to {}: {}",
                    self.shift_count,
                    state.mode.name(),
                    self.describe()
                );
            }
            DecisionKind::BlackoutNow => {
                self.assignment.epoch = decision.epoch;
            }
        }
        &self.assignment
    }

    /// Evaluate the assignment for one tick. Never fails: an interpreter
    /// fault darkens its own group for this tick and is logged for cause
    /// analysis.
    pub fn tick(
        &mut self,
        snapshot: &SignalSnapshot,
        state: &PerformanceState,
        scheme: &ColorScheme,
    ) -> HashMap<String, GroupValues> {
        let mut out = HashMap::with_capacity(self.groups.len());
        for group in &self.groups {
            let values = match self.assignment.entries.get_mut(&group.id) {
                Some(interp) => match interp.eval(snapshot, state, scheme) {
                    Ok(values) => values,
                    Err(e) => {
                        log::error!("[director] interpreter fault on '{}': {}", group.id, e);
                        GroupValues::blackout()
                    }
                },
                None => GroupValues::blackout(),
            };
            out.insert(group.id.clone(), values);
        }
        out
    }

    /// One-line assignment summary for the shift logs.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self
            .groups
            .iter()
            .filter_map(|g| {
                self.assignment
                    .entries
                    .get(&g.id)
                    .map(|i| format!("{}={}", g.id, i.kind().name()))
            })
            .collect();
        parts.sort();
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{generate, Theme};

    fn groups() -> Vec<FixtureGroup> {
        vec![
            FixtureGroup {
                id: "pars".into(),
                fixtures: vec!["par-1".into(), "par-2".into()],
                capabilities: vec![Capability::Dimmer, Capability::Color],
            },
            FixtureGroup {
                id: "heads".into(),
                fixtures: vec!["mh-1".into()],
                capabilities: vec![
                    Capability::Dimmer,
                    Capability::Color,
                    Capability::Position,
                    Capability::Gobo,
                ],
            },
            FixtureGroup {
                id: "strobes".into(),
                fixtures: vec!["strobe-1".into()],
                capabilities: vec![Capability::Dimmer, Capability::Strobe],
            },
        ]
    }

    fn scheme() -> ColorScheme {
        let theme = Theme {
            id: "t".into(),
            allow_rainbows: true,
            hue_seeds: vec![0.3],
        };
        generate(&theme, 5, 11, 1)
    }

    fn state(mode: Mode) -> PerformanceState {
        PerformanceState {
            mode,
            theme: "t".into(),
            venue: "club".into(),
            hype: 0.0,
            manual_dimmer: None,
            epoch: 1,
        }
    }

    fn snapshot() -> SignalSnapshot {
        SignalSnapshot {
            bands: [0.7, 0.5, 0.3, 0.2],
            beat: false,
            tempo: 124.0,
            energy: 0.5,
            sustained: false,
        }
    }

    fn hard_shift(epoch: u64) -> SceneDecision {
        SceneDecision {
            epoch,
            kind: DecisionKind::HardShift,
        }
    }

    #[test]
    fn every_group_is_covered_from_construction() {
        let director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
        for g in groups() {
            assert!(
                director.assignment().entries.contains_key(&g.id),
                "group {} uncovered",
                g.id
            );
        }
    }

    #[test]
    fn claimed_bands_cover_the_full_declared_set() {
        let mut director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
        let sc = scheme();
        for epoch in 1..20u64 {
            director.on_scheduler_decision(&hard_shift(epoch), &state(Mode::Party), &sc);
            let claimed = director.assignment().claimed_bands();
            for band in Band::ALL {
                assert!(
                    claimed.contains(&band),
                    "band {} unclaimed at epoch {}",
                    band.name(),
                    epoch
                );
            }
        }
    }

    #[test]
    fn soft_shift_keeps_all_groups_and_band_coverage() {
        let mut director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
        let sc = scheme();

        director.on_scheduler_decision(
            &SceneDecision {
                epoch: 2,
                kind: DecisionKind::SoftShift,
            },
            &state(Mode::Party),
            &sc,
        );

        let after = director.assignment();
        assert_eq!(after.epoch, 2);
        for g in groups() {
            assert!(after.entries.contains_key(&g.id));
        }
        let claimed = after.claimed_bands();
        for band in Band::ALL {
            assert!(claimed.contains(&band), "band {} unclaimed", band.name());
        }
    }

    #[test]
    fn never_repeats_the_previous_kind_for_a_group() {
        let mut director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
        let sc = scheme();
        // "heads" has four capabilities, so its eligible pool always has
        // multiple kinds and the never-repeat rule must hold strictly.
        let mut last = director.assignment().entries["heads"].kind();
        for epoch in 1..30u64 {
            director.on_scheduler_decision(&hard_shift(epoch), &state(Mode::Party), &sc);
            let kind = director.assignment().entries["heads"].kind();
            // Coverage augmentation may wrap into a composite; the underlying
            // pick is what history tracks, so only compare raw picks.
            if kind != InterpreterKind::Composite || last != InterpreterKind::Composite {
                assert_ne!(kind, last, "epoch {} repeated {:?}", epoch, kind);
            }
            last = kind;
        }
    }

    #[test]
    fn deployed_hype_biases_toward_high_intensity_looks() {
        let mut director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
        let sc = scheme();
        let mut hot = state(Mode::Party);
        hot.hype = 1.0;
        // "strobes" has exactly one high-intensity template; at full hype it
        // must win the pick on every regeneration.
        for epoch in 1..10u64 {
            director.on_scheduler_decision(&hard_shift(epoch), &hot, &sc);
            let mut caps = HashSet::new();
            director.assignment().entries["strobes"].required_capabilities(&mut caps);
            assert!(
                caps.contains(&Capability::Strobe),
                "no strobe look at epoch {}",
                epoch
            );
        }
    }

    #[test]
    fn twinkle_mode_excludes_high_intensity_looks() {
        let mut director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Twinkle);
        let sc = scheme();
        let st = state(Mode::Twinkle);
        for epoch in 1..20u64 {
            director.on_scheduler_decision(&hard_shift(epoch), &st, &sc);
            // The strobe group only has one non-high-intensity template
            // (bass dimmer pulse via Dimmer); it must never get the burst.
            let mut caps = HashSet::new();
            director.assignment().entries["strobes"].required_capabilities(&mut caps);
            assert!(
                !caps.contains(&Capability::Strobe),
                "twinkle assigned a strobe look at epoch {}",
                epoch
            );
        }
    }

    #[test]
    fn regeneration_is_deterministic_for_a_fixed_seed() {
        let sc = scheme();
        let st = state(Mode::Party);
        let run = || {
            let mut director =
                LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
            let mut outputs = Vec::new();
            for epoch in 1..6u64 {
                director.on_scheduler_decision(&hard_shift(epoch), &st, &sc);
                for _ in 0..10 {
                    let values = director.tick(&snapshot(), &st, &sc);
                    let mut sorted: Vec<_> = values.into_iter().collect();
                    sorted.sort_by(|a, b| a.0.cmp(&b.0));
                    outputs.push(sorted);
                }
            }
            outputs
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn blackout_tick_darkens_every_group() {
        let mut director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
        let sc = scheme();
        let values = director.tick(&snapshot(), &state(Mode::Blackout), &sc);
        for (id, v) in values {
            assert_eq!(v, GroupValues::blackout(), "group {} not dark", id);
        }
    }

    #[test]
    fn blackout_decision_retags_without_restructuring() {
        let mut director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
        let sc = scheme();
        let before: Vec<String> = {
            let mut v: Vec<String> = director.assignment().entries.keys().cloned().collect();
            v.sort();
            v
        };
        let assignment = director.on_scheduler_decision(
            &SceneDecision {
                epoch: 9,
                kind: DecisionKind::BlackoutNow,
            },
            &state(Mode::Blackout),
            &sc,
        );
        assert_eq!(assignment.epoch, 9);
        let mut after: Vec<String> = assignment.entries.keys().cloned().collect();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn tick_never_fails_on_missing_entry() {
        let mut director = LightingDirector::new(groups(), &EngineConfig::default(), Mode::Party);
        director.assignment.entries.remove("pars");
        let values = director.tick(&snapshot(), &state(Mode::Party), &scheme());
        assert_eq!(values["pars"], GroupValues::blackout());
    }
}
