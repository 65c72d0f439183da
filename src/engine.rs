//! Direction engine
//!
//! Wires the scheduler, director, visual graph and sinks into the two
//! periodic loops that run a session: the lighting tick loop and the visual
//! render loop. Audio analysis runs upstream and feeds the [`SignalBus`];
//! both loops sample it independently at their own cadence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::color::{self, ColorScheme};
use crate::config::{EngineConfig, SessionConfig};
use crate::director::LightingDirector;
use crate::error::EngineError;
use crate::fixtures::engine::{assemble, ChannelFrame};
use crate::scheduler::{DecisionKind, SceneDecision, SceneScheduler};
use crate::signal::SignalBus;
use crate::state::StateStore;
use crate::vj::{FrameBuffer, VisualGraph};

/// Destination for assembled channel frames (Art-Net bridge, recorder, test
/// capture). Write failures are retried by the engine; only an exhausted
/// retry budget is fatal.
pub trait FixtureSink: Send {
    fn submit(&mut self, frame: &ChannelFrame) -> Result<(), String>;
}

/// Destination for composited video frames.
pub trait FrameSink: Send {
    fn submit(&mut self, frame: &FrameBuffer) -> Result<(), String>;
}

/// Cross-loop hand-off of a scheduler decision and the palette that goes with
/// it. The visual loop consumes each epoch at most once; re-reads of the same
/// epoch are no-ops.
#[derive(Clone)]
pub struct SceneChange {
    pub epoch: u64,
    pub kind: DecisionKind,
    pub scheme: Arc<ColorScheme>,
}

/// In-flight palette crossfade. Owned by the lighting loop, which republishes
/// the blended palette through the scene slot so both loops fade in step.
struct SchemeFade {
    from: Arc<ColorScheme>,
    to: Arc<ColorScheme>,
    started: Instant,
    duration: Duration,
}

impl SchemeFade {
    /// Blended palette at `now`, or `None` once the fade has completed.
    /// Identity fields follow the target throughout so the epoch tag never
    /// regresses mid-fade.
    fn at(&self, now: Instant) -> Option<Arc<ColorScheme>> {
        if self.duration.is_zero() {
            return None;
        }
        let t = now.saturating_duration_since(self.started).as_secs_f32()
            / self.duration.as_secs_f32();
        if t >= 1.0 {
            return None;
        }
        Some(Arc::new(ColorScheme {
            colors: color::transition(&self.from, &self.to, t).colors,
            rainbow: self.to.rainbow,
            theme_id: self.to.theme_id.clone(),
            epoch: self.to.epoch,
        }))
    }
}

#[derive(Default)]
pub struct EngineStats {
    /// Lighting ticks that overran their period.
    pub overrun_ticks: AtomicU64,
    pub frames_rendered: AtomicU64,
    pub ticks_run: AtomicU64,
}

struct Shared {
    cfg: EngineConfig,
    session: Arc<SessionConfig>,
    bus: SignalBus,
    store: StateStore,
    scheduler: Arc<Mutex<SceneScheduler>>,
    scene: Mutex<SceneChange>,
    running: AtomicBool,
    started: Instant,
    stats: EngineStats,
    fatal: Mutex<Option<EngineError>>,
}

impl Shared {
    fn fail(&self, err: EngineError) {
        log::error!("[engine] fatal: {}", err);
        *self.fatal.lock().expect("fatal slot poisoned") = Some(err);
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct DirectionEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DirectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectionEngine").finish_non_exhaustive()
    }
}

impl DirectionEngine {
    /// Validate the session inputs and prepare the initial scene. Loops do
    /// not run until [`DirectionEngine::start`].
    pub fn new(session: SessionConfig, cfg: EngineConfig) -> Result<Self, EngineError> {
        let theme = session
            .theme(&session.initial_theme)
            .ok_or_else(|| EngineError::UnknownResource {
                kind: "theme",
                id: session.initial_theme.clone(),
            })?;
        if session.fixture_groups.is_empty() {
            return Err(EngineError::Config("no fixture groups declared".into()));
        }

        let scheme = color::generate(theme, cfg.palette_len, cfg.master_seed, 0);
        let store = StateStore::new(
            session.initial_mode,
            session.initial_theme.clone(),
            session.venue.clone(),
        );
        let bus = SignalBus::new(
            Duration::from_millis(cfg.staleness_ms),
            Duration::from_millis(cfg.staleness_decay_ms),
        );

        Ok(Self {
            shared: Arc::new(Shared {
                scheduler: Arc::new(Mutex::new(SceneScheduler::new(&cfg))),
                scene: Mutex::new(SceneChange {
                    epoch: 0,
                    kind: DecisionKind::NoChange,
                    scheme: Arc::new(scheme),
                }),
                cfg,
                session: Arc::new(session),
                bus,
                store,
                running: AtomicBool::new(false),
                started: Instant::now(),
                stats: EngineStats::default(),
                fatal: Mutex::new(None),
            }),
        })
    }

    /// Handle for the audio analysis producer.
    pub fn signal_bus(&self) -> SignalBus {
        self.shared.bus.clone()
    }

    /// Handle for control-surface and UI readers.
    pub fn state_store(&self) -> StateStore {
        self.shared.store.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stale_reads(&self) -> u64 {
        self.shared.bus.stale_reads()
    }

    pub fn ticks_run(&self) -> u64 {
        self.shared.stats.ticks_run.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.stats.frames_rendered.load(Ordering::Relaxed)
    }

    /// The error that stopped the session, if any.
    pub fn fatal_error(&self) -> Option<EngineError> {
        self.shared
            .fatal
            .lock()
            .expect("fatal slot poisoned")
            .clone()
    }

    /// Operator-facing command handle.
    pub fn control_surface(&self) -> crate::control::ControlSurface {
        crate::control::ControlSurface::new(
            self.shared.store.clone(),
            self.shared.scheduler.clone(),
            self.shared.session.clone(),
            self.shared.cfg.clone(),
        )
    }

    /// Request both loops stop after their current iteration.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Spawn the lighting and visual loops. Both stop on [`stop`] or on a
    /// fatal sink error from either side.
    pub fn start(
        &self,
        fixture_sink: Box<dyn FixtureSink>,
        frame_sink: Box<dyn FrameSink>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        self.shared.running.store(true, Ordering::SeqCst);
        let lighting = tokio::spawn(lighting_loop(self.shared.clone(), fixture_sink));
        let visual = tokio::spawn(visual_loop(self.shared.clone(), frame_sink));
        (lighting, visual)
    }
}

/// Retry a sink write with fixed backoff; exhaustion escalates.
async fn submit_with_retry<F>(
    mut submit: F,
    sink: &'static str,
    max: u32,
    backoff: Duration,
) -> Result<(), EngineError>
where
    F: FnMut() -> Result<(), String>,
{
    let mut last_error = String::new();
    for attempt in 1..=max.max(1) {
        match submit() {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!("[engine] {} write failed (attempt {}): {}", sink, attempt, e);
                last_error = e;
                if attempt < max {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(EngineError::SinkExhausted {
        sink,
        attempts: max.max(1),
        last_error,
    })
}

async fn lighting_loop(shared: Arc<Shared>, mut sink: Box<dyn FixtureSink>) {
    let cfg = shared.cfg.clone();
    let groups = shared.session.fixture_groups.clone();
    let mut director =
        LightingDirector::new(groups.clone(), &cfg, shared.session.initial_mode);

    let period = Duration::from_secs_f32(1.0 / cfg.tick_hz.max(1.0));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let backoff = Duration::from_millis(cfg.sink_retry_backoff_ms);
    let fade_duration = Duration::from_secs_f32(cfg.scheme_fade_secs.max(0.0));
    let mut fade: Option<SchemeFade> = None;

    log::info!(
        "[engine] lighting loop started at {:.0} Hz over {} groups",
        cfg.tick_hz,
        groups.len()
    );

    let mut last_tick = Instant::now();
    while shared.running.load(Ordering::SeqCst) {
        interval.tick().await;
        let tick_start = Instant::now();
        let delta = tick_start.saturating_duration_since(last_tick);
        last_tick = tick_start;

        let state = shared.store.snapshot();
        let snapshot = shared.bus.sample(tick_start);

        let (decision, scale, hype) = {
            let mut scheduler = shared.scheduler.lock().expect("scheduler poisoned");
            let decision = scheduler.tick(&snapshot, delta, state.mode);
            (decision, scheduler.intensity_scale(), scheduler.hype())
        };
        shared.store.set_hype(hype);

        if decision.kind != DecisionKind::NoChange {
            let target = next_scheme(&shared, &decision, &state.theme);
            director.on_scheduler_decision(&decision, &state, &target);
            // Structural palette swaps crossfade; blackout snaps.
            fade = if !fade_duration.is_zero()
                && matches!(
                    decision.kind,
                    DecisionKind::HardShift | DecisionKind::SoftShift
                ) {
                let from = shared
                    .scene
                    .lock()
                    .expect("scene slot poisoned")
                    .scheme
                    .clone();
                Some(SchemeFade {
                    from,
                    to: target.clone(),
                    started: tick_start,
                    duration: fade_duration,
                })
            } else {
                None
            };
            *shared.scene.lock().expect("scene slot poisoned") = SceneChange {
                epoch: decision.epoch,
                kind: decision.kind,
                scheme: target,
            };
            shared.store.set_epoch(decision.epoch);
        }

        // The slot carries the live palette; while a fade runs the blend is
        // republished every tick so the visual loop picks it up per frame.
        let scheme = if let Some(f) = fade.take() {
            let scheme = match f.at(tick_start) {
                Some(mid) => {
                    fade = Some(f);
                    mid
                }
                None => f.to.clone(),
            };
            shared.scene.lock().expect("scene slot poisoned").scheme = scheme.clone();
            scheme
        } else {
            shared
                .scene
                .lock()
                .expect("scene slot poisoned")
                .scheme
                .clone()
        };

        // Warmup ramp scales the input rather than the output so curves and
        // gates see the damped signal too.
        let values = director.tick(&snapshot.scaled(scale), &state, &scheme);
        let frame = assemble(&values, &groups, cfg.universe_size, state.manual_dimmer);

        if let Err(err) = submit_with_retry(
            || sink.submit(&frame),
            "fixture",
            cfg.sink_retry_max,
            backoff,
        )
        .await
        {
            shared.fail(err);
            return;
        }

        shared.stats.ticks_run.fetch_add(1, Ordering::Relaxed);
        if tick_start.elapsed() > period {
            shared.stats.overrun_ticks.fetch_add(1, Ordering::Relaxed);
        }
    }
    log::info!("[engine] lighting loop stopped");
}

async fn visual_loop(shared: Arc<Shared>, mut sink: Box<dyn FrameSink>) {
    let cfg = shared.cfg.clone();
    let mut graph = VisualGraph::new(&cfg, shared.session.initial_mode);
    let mut applied_epoch = 0u64;

    let period = Duration::from_secs_f32(1.0 / cfg.frame_hz.max(1.0));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let backoff = Duration::from_millis(cfg.sink_retry_backoff_ms);

    log::info!("[engine] visual loop started at {:.0} Hz", cfg.frame_hz);

    while shared.running.load(Ordering::SeqCst) {
        interval.tick().await;
        let now = Instant::now();

        let state = shared.store.snapshot();
        let snapshot = shared.bus.sample(now);

        // Consume the scene change at most once per epoch; the slot may be
        // re-read many frames before the next decision lands.
        let change = shared.scene.lock().expect("scene slot poisoned").clone();
        if change.epoch > applied_epoch {
            graph.on_scheduler_decision(
                &SceneDecision {
                    epoch: change.epoch,
                    kind: change.kind,
                },
                &state,
            );
            applied_epoch = change.epoch;
        }

        let scale = shared
            .scheduler
            .lock()
            .expect("scheduler poisoned")
            .intensity_scale();
        let t = shared.started.elapsed().as_secs_f32();
        let frame = graph.render(&snapshot.scaled(scale), &state, &change.scheme, t);

        if let Err(err) =
            submit_with_retry(|| sink.submit(&frame), "frame", cfg.sink_retry_max, backoff).await
        {
            shared.fail(err);
            return;
        }
        shared.stats.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }
    log::info!("[engine] visual loop stopped");
}

/// Build the palette for a fresh decision. Soft shifts replace one slot of
/// the current palette; hard shifts regenerate it from the theme. Blackout
/// keeps the palette so resumption picks up where the show left off.
fn next_scheme(shared: &Shared, decision: &SceneDecision, theme_id: &str) -> Arc<ColorScheme> {
    let current = shared
        .scene
        .lock()
        .expect("scene slot poisoned")
        .scheme
        .clone();
    let Some(theme) = shared.session.theme(theme_id) else {
        log::error!("[engine] theme '{}' missing, keeping current palette", theme_id);
        return current;
    };
    let seed = shared.cfg.master_seed ^ decision.epoch;
    match decision.kind {
        DecisionKind::HardShift => Arc::new(color::generate(
            theme,
            shared.cfg.palette_len,
            seed,
            decision.epoch,
        )),
        DecisionKind::SoftShift => {
            Arc::new(color::shift_one(&current, theme, seed, decision.epoch))
        }
        // Palette survives a blackout but still tracks the decision epoch.
        DecisionKind::BlackoutNow => Arc::new(ColorScheme {
            epoch: decision.epoch,
            ..(*current).clone()
        }),
        DecisionKind::NoChange => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Theme;
    use crate::fixtures::models::{Capability, FixtureGroup};
    use crate::state::Mode;

    fn session() -> SessionConfig {
        SessionConfig {
            venue: "club".into(),
            fixture_groups: vec![FixtureGroup {
                id: "pars".into(),
                fixtures: vec!["par-1".into()],
                capabilities: vec![Capability::Dimmer, Capability::Color],
            }],
            themes: vec![Theme {
                id: "ember".into(),
                allow_rainbows: false,
                hue_seeds: vec![0.02, 0.08],
            }],
            initial_mode: Mode::Party,
            initial_theme: "ember".into(),
        }
    }

    #[test]
    fn scheme_fade_blends_between_the_endpoints() {
        let theme = session().themes.remove(0);
        let from = Arc::new(color::generate(&theme, 5, 1, 1));
        let to = Arc::new(color::generate(&theme, 5, 2, 2));
        let fade = SchemeFade {
            from: from.clone(),
            to: to.clone(),
            started: Instant::now() - Duration::from_secs(2),
            duration: Duration::from_secs(4),
        };

        let mid = fade.at(Instant::now()).expect("fade still live");
        assert_ne!(mid.colors, from.colors);
        assert_ne!(mid.colors, to.colors);
        // The tag follows the target for the whole fade.
        assert_eq!(mid.epoch, to.epoch);
    }

    #[test]
    fn scheme_fade_ends_after_its_duration() {
        let theme = session().themes.remove(0);
        let fade = SchemeFade {
            from: Arc::new(color::generate(&theme, 5, 1, 1)),
            to: Arc::new(color::generate(&theme, 5, 2, 2)),
            started: Instant::now() - Duration::from_secs(5),
            duration: Duration::from_secs(4),
        };
        assert!(fade.at(Instant::now()).is_none());
    }

    #[test]
    fn unknown_initial_theme_is_rejected() {
        let mut s = session();
        s.initial_theme = "missing".into();
        let err = DirectionEngine::new(s, EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownResource { kind: "theme", .. }));
    }

    #[test]
    fn empty_patch_is_rejected() {
        let mut s = session();
        s.fixture_groups.clear();
        let err = DirectionEngine::new(s, EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn retry_succeeds_before_the_budget_runs_out() {
        let mut attempts = 0;
        let result = submit_with_retry(
            || {
                attempts += 1;
                if attempts < 3 {
                    Err("transient".into())
                } else {
                    Ok(())
                }
            },
            "fixture",
            5,
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_the_sink_and_attempt_count() {
        let err = submit_with_retry(
            || Err("link down".to_string()),
            "frame",
            3,
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
        match err {
            EngineError::SinkExhausted {
                sink,
                attempts,
                last_error,
            } => {
                assert_eq!(sink, "frame");
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "link down");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
