//! Visual node catalog
//!
//! Each node is one transform over the working frame buffer. Source nodes
//! paint, filter nodes rework what is already there; the graph orders them by
//! stage before a layer runs.

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::ColorScheme;
use crate::signal::{Band, SignalSnapshot};
use crate::state::PerformanceState;
use crate::vj::FrameBuffer;

/// Execution stage within a layer chain. Sources must run before filters,
/// post effects last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Source,
    Filter,
    Post,
}

#[derive(Debug, Clone)]
pub enum VjNode {
    /// Paints the frame with palette colors banded across the width.
    PaletteWash { slot_offset: usize },
    /// Scales brightness with band energy.
    Pulse { band: Band, floor: f32 },
    /// Whites out the frame on beats above an energy gate.
    StrobeFlash { gate: f32 },
    /// Rotates hue over time.
    HueRotate { rate: f32 },
    /// Quantizes channels to a few levels.
    Posterize { levels: u32 },
    /// Displaces horizontal runs of pixels, seeded for reproducibility.
    Datamosh { amount: f32, seed: u64 },
    /// Darkens toward the frame edges.
    Vignette { strength: f32 },
}

impl VjNode {
    pub fn name(&self) -> &'static str {
        match self {
            VjNode::PaletteWash { .. } => "palette_wash",
            VjNode::Pulse { .. } => "pulse",
            VjNode::StrobeFlash { .. } => "strobe_flash",
            VjNode::HueRotate { .. } => "hue_rotate",
            VjNode::Posterize { .. } => "posterize",
            VjNode::Datamosh { .. } => "datamosh",
            VjNode::Vignette { .. } => "vignette",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            VjNode::PaletteWash { .. } => Stage::Source,
            VjNode::Pulse { .. } | VjNode::HueRotate { .. } | VjNode::Datamosh { .. } => {
                Stage::Filter
            }
            VjNode::StrobeFlash { .. } | VjNode::Posterize { .. } | VjNode::Vignette { .. } => {
                Stage::Post
            }
        }
    }

    /// Flashy nodes are kept out of gentle modes.
    pub fn high_intensity(&self) -> bool {
        matches!(
            self,
            VjNode::StrobeFlash { .. } | VjNode::Datamosh { .. }
        )
    }

    /// Re-roll tunable parameters without changing the node's identity.
    /// Sticky layers use this on soft shifts.
    pub fn refresh_params(&mut self, rng: &mut StdRng) {
        match self {
            VjNode::PaletteWash { slot_offset } => *slot_offset = rng.gen_range(0..5),
            VjNode::Pulse { floor, .. } => *floor = rng.gen_range(0.05..0.3),
            VjNode::StrobeFlash { gate } => *gate = rng.gen_range(0.5..0.8),
            VjNode::HueRotate { rate } => *rate = rng.gen_range(0.02..0.2),
            VjNode::Posterize { levels } => *levels = rng.gen_range(3..8),
            VjNode::Datamosh { amount, seed } => {
                *amount = rng.gen_range(0.1..0.5);
                *seed = rng.gen();
            }
            VjNode::Vignette { strength } => *strength = rng.gen_range(0.3..0.8),
        }
    }

    /// Apply this node to the working buffer for one frame. `t` is seconds
    /// since session start.
    pub fn transform(
        &self,
        frame: &mut FrameBuffer,
        snapshot: &SignalSnapshot,
        _state: &PerformanceState,
        scheme: &ColorScheme,
        t: f32,
    ) -> Result<(), String> {
        match self {
            VjNode::PaletteWash { slot_offset } => {
                if scheme.colors.is_empty() {
                    return Err("palette_wash with empty color scheme".into());
                }
                let bands = scheme.colors.len();
                for y in 0..frame.height {
                    for x in 0..frame.width {
                        let slot = (x * bands / frame.width.max(1) + slot_offset) % bands;
                        *frame.pixel_mut(x, y) = scheme.color(slot).rgb();
                    }
                }
                Ok(())
            }
            VjNode::Pulse { band, floor } => {
                let level = floor + (1.0 - floor) * snapshot.band(*band).clamp(0.0, 1.0);
                for px in frame.data.iter_mut() {
                    for c in px.iter_mut() {
                        *c *= level;
                    }
                }
                Ok(())
            }
            VjNode::StrobeFlash { gate } => {
                if snapshot.beat && snapshot.energy >= *gate {
                    for px in frame.data.iter_mut() {
                        *px = [1.0, 1.0, 1.0];
                    }
                }
                Ok(())
            }
            VjNode::HueRotate { rate } => {
                // Non-rainbow themes keep their palette hues untouched.
                if !scheme.rainbow {
                    return Ok(());
                }
                let shift = (t * rate).fract();
                for px in frame.data.iter_mut() {
                    *px = rotate_hue(*px, shift);
                }
                Ok(())
            }
            VjNode::Posterize { levels } => {
                if *levels < 2 {
                    return Err(format!("posterize needs >= 2 levels, got {}", levels));
                }
                let steps = (*levels - 1) as f32;
                for px in frame.data.iter_mut() {
                    for c in px.iter_mut() {
                        *c = (*c * steps).round() / steps;
                    }
                }
                Ok(())
            }
            VjNode::Datamosh { amount, seed } => {
                // Seed mixes in the frame clock so the smear crawls over time
                // but stays reproducible for a fixed seed and clock.
                let mut rng = StdRng::seed_from_u64(seed ^ (t * 30.0) as u64);
                let max_shift = ((frame.width as f32) * amount) as usize;
                if max_shift == 0 {
                    return Ok(());
                }
                for y in 0..frame.height {
                    if rng.gen_bool(0.3) {
                        let shift = rng.gen_range(0..=max_shift);
                        frame.rotate_row(y, shift);
                    }
                }
                Ok(())
            }
            VjNode::Vignette { strength } => {
                let cx = frame.width as f32 / 2.0;
                let cy = frame.height as f32 / 2.0;
                let max_d = (cx * cx + cy * cy).sqrt().max(1.0);
                for y in 0..frame.height {
                    for x in 0..frame.width {
                        let dx = x as f32 - cx;
                        let dy = y as f32 - cy;
                        let d = (dx * dx + dy * dy).sqrt() / max_d;
                        let dim = 1.0 - strength * d;
                        for c in frame.pixel_mut(x, y).iter_mut() {
                            *c *= dim.clamp(0.0, 1.0);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn rotate_hue(rgb: [f32; 3], shift: f32) -> [f32; 3] {
    let (h, s, v) = rgb_to_hsv(rgb);
    crate::color::Color::from_hsv((h + shift).rem_euclid(1.0), s, v).rgb()
}

fn rgb_to_hsv([r, g, b]: [f32; 3]) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let h = if delta <= f32::EPSILON {
        0.0
    } else if (max - r).abs() <= f32::EPSILON {
        (((g - b) / delta).rem_euclid(6.0)) / 6.0
    } else if (max - g).abs() <= f32::EPSILON {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max <= f32::EPSILON { 0.0 } else { delta / max };
    (h, s, max)
}

/// One catalog entry the graph draws from when building layers.
pub struct NodeSpec {
    pub name: &'static str,
    pub stage: Stage,
    pub high_intensity: bool,
    pub build: fn(&mut StdRng) -> VjNode,
}

pub static NODE_CATALOG: Lazy<Vec<NodeSpec>> = Lazy::new(|| {
    vec![
        NodeSpec {
            name: "palette_wash",
            stage: Stage::Source,
            high_intensity: false,
            build: |rng| VjNode::PaletteWash {
                slot_offset: rng.gen_range(0..5),
            },
        },
        NodeSpec {
            name: "pulse",
            stage: Stage::Filter,
            high_intensity: false,
            build: |rng| VjNode::Pulse {
                band: Band::ALL[rng.gen_range(0..Band::ALL.len())],
                floor: rng.gen_range(0.05..0.3),
            },
        },
        NodeSpec {
            name: "hue_rotate",
            stage: Stage::Filter,
            high_intensity: false,
            build: |rng| VjNode::HueRotate {
                rate: rng.gen_range(0.02..0.2),
            },
        },
        NodeSpec {
            name: "datamosh",
            stage: Stage::Filter,
            high_intensity: true,
            build: |rng| VjNode::Datamosh {
                amount: rng.gen_range(0.1..0.5),
                seed: rng.gen(),
            },
        },
        NodeSpec {
            name: "strobe_flash",
            stage: Stage::Post,
            high_intensity: true,
            build: |rng| VjNode::StrobeFlash {
                gate: rng.gen_range(0.5..0.8),
            },
        },
        NodeSpec {
            name: "posterize",
            stage: Stage::Post,
            high_intensity: false,
            build: |rng| VjNode::Posterize {
                levels: rng.gen_range(3..8),
            },
        },
        NodeSpec {
            name: "vignette",
            stage: Stage::Post,
            high_intensity: false,
            build: |rng| VjNode::Vignette {
                strength: rng.gen_range(0.3..0.8),
            },
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Theme;
    use crate::state::Mode;

    fn frame() -> FrameBuffer {
        FrameBuffer::black(8, 4)
    }

    fn scheme() -> ColorScheme {
        let theme = Theme {
            id: "t".into(),
            allow_rainbows: false,
            hue_seeds: vec![0.6],
        };
        crate::color::generate(&theme, 5, 3, 1)
    }

    fn state() -> PerformanceState {
        PerformanceState {
            mode: Mode::Party,
            theme: "t".into(),
            venue: "club".into(),
            hype: 0.0,
            manual_dimmer: None,
            epoch: 1,
        }
    }

    fn quiet() -> SignalSnapshot {
        SignalSnapshot::silence()
    }

    #[test]
    fn palette_wash_paints_only_scheme_colors() {
        let mut f = frame();
        let sc = scheme();
        VjNode::PaletteWash { slot_offset: 1 }
            .transform(&mut f, &quiet(), &state(), &sc, 0.0)
            .unwrap();
        let allowed: Vec<[f32; 3]> = sc.colors.iter().map(|c| c.rgb()).collect();
        for px in &f.data {
            assert!(allowed.contains(px));
        }
    }

    #[test]
    fn palette_wash_rejects_empty_scheme() {
        let mut f = frame();
        let empty = ColorScheme {
            colors: vec![],
            rainbow: false,
            theme_id: "t".into(),
            epoch: 1,
        };
        let err = VjNode::PaletteWash { slot_offset: 0 }
            .transform(&mut f, &quiet(), &state(), &empty, 0.0)
            .unwrap_err();
        assert!(err.contains("empty"));
    }

    #[test]
    fn pulse_darkens_to_floor_in_silence() {
        let mut f = frame();
        f.data.fill([1.0, 1.0, 1.0]);
        VjNode::Pulse {
            band: Band::Bass,
            floor: 0.2,
        }
        .transform(&mut f, &quiet(), &state(), &scheme(), 0.0)
        .unwrap();
        for px in &f.data {
            assert!((px[0] - 0.2).abs() < 1e-6);
        }
    }

    #[test]
    fn strobe_flash_fires_only_on_gated_beats() {
        let sc = scheme();
        let node = VjNode::StrobeFlash { gate: 0.6 };

        let mut f = frame();
        let mut soft_beat = quiet();
        soft_beat.beat = true;
        soft_beat.energy = 0.3;
        node.transform(&mut f, &soft_beat, &state(), &sc, 0.0).unwrap();
        assert_eq!(f.data[0], [0.0, 0.0, 0.0]);

        let mut hard_beat = soft_beat;
        hard_beat.energy = 0.9;
        node.transform(&mut f, &hard_beat, &state(), &sc, 0.0).unwrap();
        assert_eq!(f.data[0], [1.0, 1.0, 1.0]);
    }

    #[test]
    fn datamosh_is_reproducible_for_a_fixed_seed_and_clock() {
        let sc = scheme();
        let node = VjNode::Datamosh {
            amount: 0.4,
            seed: 77,
        };
        let run = || {
            let mut f = frame();
            VjNode::PaletteWash { slot_offset: 0 }
                .transform(&mut f, &quiet(), &state(), &sc, 0.0)
                .unwrap();
            node.transform(&mut f, &quiet(), &state(), &sc, 2.5).unwrap();
            f.data.clone()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn hue_rotate_preserves_brightness() {
        let rainbow = ColorScheme {
            rainbow: true,
            ..scheme()
        };
        let mut f = frame();
        f.data.fill([0.8, 0.2, 0.1]);
        VjNode::HueRotate { rate: 0.5 }
            .transform(&mut f, &quiet(), &state(), &rainbow, 1.0)
            .unwrap();
        for px in &f.data {
            let max = px[0].max(px[1]).max(px[2]);
            assert!((max - 0.8).abs() < 1e-3);
        }
    }

    #[test]
    fn hue_rotate_is_inert_for_non_rainbow_themes() {
        let mut f = frame();
        f.data.fill([0.8, 0.2, 0.1]);
        VjNode::HueRotate { rate: 0.5 }
            .transform(&mut f, &quiet(), &state(), &scheme(), 1.0)
            .unwrap();
        assert!(f.data.iter().all(|px| *px == [0.8, 0.2, 0.1]));
    }

    #[test]
    fn catalog_stages_cover_a_full_chain() {
        assert!(NODE_CATALOG.iter().any(|s| s.stage == Stage::Source));
        assert!(NODE_CATALOG.iter().any(|s| s.stage == Stage::Filter));
        assert!(NODE_CATALOG.iter().any(|s| s.stage == Stage::Post));
    }
}
