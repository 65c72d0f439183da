use serde::Deserialize;

use crate::color::Theme;
use crate::fixtures::models::FixtureGroup;
use crate::state::Mode;

/// Tuning constants for the direction engine. All thresholds that shape the
/// generative policy live here rather than as hard-coded values; the defaults
/// match what we run at shows.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds of no structural shift before a quiet-period SoftShift fires.
    pub quiet_period_secs: f32,
    /// Overall energy above this suppresses structural shifts (drop guard).
    pub peak_energy: f32,
    /// Quiet-period shifts only fire while energy is below this.
    pub mid_energy: f32,
    /// A beat pulse within this window also arms the drop guard.
    pub beat_guard_ms: u64,
    /// Hype accumulator level that escalates to a HardShift.
    pub hype_threshold: f32,
    /// Hype gained per second of sustained peak energy.
    pub hype_charge_rate: f32,
    /// Exponential decay rate applied to hype when energy subsides (per second).
    pub hype_decay_rate: f32,
    /// Seconds of warmup ramp after session start.
    pub warmup_secs: f32,
    /// Intensity floor at the very start of warmup (ramps linearly to 1.0).
    pub warmup_floor: f32,
    /// Snapshot older than this is substituted with a decayed synthetic one.
    pub staleness_ms: u64,
    /// Window over which a stale snapshot's energy decays linearly to silence.
    pub staleness_decay_ms: u64,
    /// Lighting control rate in Hz, independent of audio and video cadence.
    pub tick_hz: f32,
    /// Visual render rate in Hz.
    pub frame_hz: f32,
    /// Number of colors in a generated palette.
    pub palette_len: usize,
    /// Seconds over which a structural palette swap crossfades into the new
    /// scheme. Zero snaps immediately.
    pub scheme_fade_secs: f32,
    /// DMX universe size; total patched channels are clamped to this.
    pub universe_size: usize,
    /// Output frame resolution (fixed for the whole session).
    pub frame_width: usize,
    pub frame_height: usize,
    /// Sink write retry budget before escalating to a fatal session error.
    pub sink_retry_max: u32,
    pub sink_retry_backoff_ms: u64,
    /// Duration of a manually deployed hype boost.
    pub hype_deploy_secs: f32,
    /// Master seed for all generative choices. Fixed seed -> reproducible show.
    pub master_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiet_period_secs: 60.0,
            peak_energy: 0.85,
            mid_energy: 0.4,
            beat_guard_ms: 250,
            hype_threshold: 1.0,
            hype_charge_rate: 0.12,
            hype_decay_rate: 0.5,
            warmup_secs: 30.0,
            warmup_floor: 0.15,
            staleness_ms: 500,
            staleness_decay_ms: 2000,
            tick_hz: 40.0,
            frame_hz: 60.0,
            palette_len: 5,
            scheme_fade_secs: 4.0,
            universe_size: 512,
            frame_width: 192,
            frame_height: 108,
            sink_retry_max: 5,
            sink_retry_backoff_ms: 50,
            hype_deploy_secs: 8.0,
            master_seed: 0x6d61_6361,
        }
    }
}

/// Static session inputs: the venue patch, the theme catalog and the opening
/// mode. Consumed by the engine at construction, never mutated mid-session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub venue: String,
    pub fixture_groups: Vec<FixtureGroup>,
    pub themes: Vec<Theme>,
    pub initial_mode: Mode,
    pub initial_theme: String,
}

impl SessionConfig {
    pub fn from_json(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| format!("Failed to parse session config: {}", e))
    }

    pub fn theme(&self, id: &str) -> Option<&Theme> {
        self.themes.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.quiet_period_secs, 60.0);
        assert!(cfg.mid_energy < cfg.peak_energy);
        assert_eq!(cfg.universe_size, 512);
    }

    #[test]
    fn session_config_parses_from_json() {
        let raw = r#"{
            "venue": "mtn_lotus",
            "fixture_groups": [
                {"id": "pars", "fixtures": ["par-1", "par-2"], "capabilities": ["dimmer", "color"]}
            ],
            "themes": [{"id": "ember", "allowRainbows": false, "hueSeeds": [0.02, 0.08]}],
            "initial_mode": "party",
            "initial_theme": "ember"
        }"#;
        let session = SessionConfig::from_json(raw).expect("valid session config");
        assert_eq!(session.fixture_groups.len(), 1);
        assert!(session.theme("ember").is_some());
        assert!(session.theme("missing").is_none());
    }
}
