//! Signal Snapshot Source interface
//!
//! The audio analyzer is an external producer. It publishes one
//! [`SignalSnapshot`] per audio frame into a single-slot [`SignalBus`];
//! publishing overwrites, never queues. Staleness is acceptable on the read
//! side, blocking the producer is not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Audio frequency bands the analyzer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Bass,
    Mid,
    Treble,
    Presence,
}

impl Band {
    pub const ALL: [Band; 4] = [Band::Bass, Band::Mid, Band::Treble, Band::Presence];

    pub fn index(self) -> usize {
        match self {
            Band::Bass => 0,
            Band::Mid => 1,
            Band::Treble => 2,
            Band::Presence => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Band::Bass => "bass",
            Band::Mid => "mid",
            Band::Treble => "treble",
            Band::Presence => "presence",
        }
    }
}

/// One periodic sample of audio-derived metrics. Immutable once published.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    /// Normalized per-band intensity, indexed by [`Band::index`].
    pub bands: [f32; 4],
    /// Beat pulse detected in this audio frame.
    pub beat: bool,
    /// Tempo estimate in BPM.
    pub tempo: f32,
    /// Overall energy, 0.0 - 1.0.
    pub energy: f32,
    /// Sustained high-signal flag (e.g. held bass, build-ups).
    pub sustained: bool,
}

impl SignalSnapshot {
    pub fn silence() -> Self {
        Self {
            bands: [0.0; 4],
            beat: false,
            tempo: 0.0,
            energy: 0.0,
            sustained: false,
        }
    }

    pub fn band(&self, band: Band) -> f32 {
        self.bands[band.index()]
    }

    /// Uniformly scale intensities. Used by the warmup ramp so the whole rig
    /// comes up from a low floor instead of slamming to full range.
    pub fn scaled(mut self, factor: f32) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        for b in &mut self.bands {
            *b *= factor;
        }
        self.energy *= factor;
        self
    }
}

struct BusSlot {
    latest: SignalSnapshot,
    published_at: Option<Instant>,
}

/// Single-slot, overwrite-on-publish holder for the latest snapshot.
///
/// The producer side never blocks beyond the slot swap; readers copy the
/// snapshot out. A reader that observes a snapshot past the staleness
/// threshold gets a synthetic one whose energy decays linearly to silence,
/// so the rig fades down instead of freezing on the last loud frame.
#[derive(Clone)]
pub struct SignalBus {
    slot: Arc<Mutex<BusSlot>>,
    stale_reads: Arc<AtomicU64>,
    staleness: Duration,
    decay_window: Duration,
}

impl SignalBus {
    pub fn new(staleness: Duration, decay_window: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(BusSlot {
                latest: SignalSnapshot::silence(),
                published_at: None,
            })),
            stale_reads: Arc::new(AtomicU64::new(0)),
            staleness,
            decay_window,
        }
    }

    pub fn publish(&self, snapshot: SignalSnapshot) {
        let mut slot = self.slot.lock().expect("signal bus poisoned");
        slot.latest = snapshot;
        slot.published_at = Some(Instant::now());
    }

    /// Latest snapshot, with staleness substitution applied at `now`.
    pub fn sample(&self, now: Instant) -> SignalSnapshot {
        let (snapshot, published_at) = {
            let slot = self.slot.lock().expect("signal bus poisoned");
            (slot.latest, slot.published_at)
        };

        let Some(published_at) = published_at else {
            // Nothing published yet; warmup starts from silence anyway.
            return SignalSnapshot::silence();
        };

        let age = now.saturating_duration_since(published_at);
        if age <= self.staleness {
            return snapshot;
        }

        // Recovered condition, not fatal. Tracked as a latency-health metric.
        self.stale_reads.fetch_add(1, Ordering::Relaxed);

        let overdue = age - self.staleness;
        if overdue >= self.decay_window || self.decay_window.is_zero() {
            return SignalSnapshot::silence();
        }
        let keep = 1.0 - overdue.as_secs_f32() / self.decay_window.as_secs_f32();
        let mut decayed = snapshot.scaled(keep);
        decayed.beat = false;
        decayed.sustained = false;
        decayed
    }

    /// Number of reads that hit the staleness substitution path.
    pub fn stale_reads(&self) -> u64 {
        self.stale_reads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(energy: f32) -> SignalSnapshot {
        SignalSnapshot {
            bands: [energy, energy, energy, energy],
            beat: true,
            tempo: 128.0,
            energy,
            sustained: true,
        }
    }

    #[test]
    fn fresh_snapshot_passes_through_unchanged() {
        let bus = SignalBus::new(Duration::from_millis(500), Duration::from_secs(2));
        bus.publish(snapshot(0.8));
        let read = bus.sample(Instant::now());
        assert_eq!(read.energy, 0.8);
        assert!(read.beat);
        assert_eq!(bus.stale_reads(), 0);
    }

    #[test]
    fn stale_snapshot_decays_linearly_toward_silence() {
        let bus = SignalBus::new(Duration::from_millis(500), Duration::from_secs(2));
        bus.publish(snapshot(1.0));
        let published = Instant::now();

        // Halfway through the decay window: half energy, pulses cleared.
        let read = bus.sample(published + Duration::from_millis(1500));
        assert!(read.energy > 0.4 && read.energy < 0.6, "energy={}", read.energy);
        assert!(!read.beat);
        assert!(!read.sustained);

        // Past the window: full silence.
        let read = bus.sample(published + Duration::from_secs(10));
        assert_eq!(read.energy, 0.0);
        assert_eq!(bus.stale_reads(), 2);
    }

    #[test]
    fn empty_bus_reads_silence() {
        let bus = SignalBus::new(Duration::from_millis(500), Duration::from_secs(2));
        let read = bus.sample(Instant::now());
        assert_eq!(read.energy, 0.0);
        assert!(!read.beat);
    }

    #[test]
    fn warmup_scaling_clamps_factor() {
        let s = snapshot(0.5).scaled(2.0);
        assert_eq!(s.energy, 0.5);
        let s = snapshot(0.5).scaled(0.5);
        assert_eq!(s.energy, 0.25);
    }
}
