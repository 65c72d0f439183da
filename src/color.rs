//! Color Scheme Generator
//!
//! Pure palette construction and crossfade over an injected seed. A scheme is
//! immutable once generated; directors swap the active reference, never
//! mutate in place.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Theme catalog entry. Themes seed palette hues and gate rainbow looks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: String,
    pub allow_rainbows: bool,
    /// Candidate base hues, 0.0 - 1.0 on the hue wheel.
    pub hue_seeds: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0 };

    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        let h = h.rem_euclid(1.0) * 6.0;
        let i = h.floor();
        let f = h - i;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        let (r, g, b) = match i as u32 % 6 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };
        Color { r, g, b }
    }

    pub fn lerp(a: Color, b: Color, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        Color {
            r: a.r + (b.r - a.r) * t,
            g: a.g + (b.g - a.g) * t,
            b: a.b + (b.b - a.b) * t,
        }
    }

    pub fn rgb(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

/// Ordered palette derived from a theme. Tagged with the epoch of the
/// structural generation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorScheme {
    pub colors: Vec<Color>,
    pub rainbow: bool,
    pub theme_id: String,
    pub epoch: u64,
}

impl ColorScheme {
    /// Palette slot, wrapping past the end so callers can index freely.
    pub fn color(&self, slot: usize) -> Color {
        if self.colors.is_empty() {
            return Color::BLACK;
        }
        self.colors[slot % self.colors.len()]
    }
}

/// Deterministic-given-seed palette construction: a base hue from the theme's
/// seeds plus complementary and analogous offsets, cycled to `palette_len`.
pub fn generate(theme: &Theme, palette_len: usize, seed: u64, epoch: u64) -> ColorScheme {
    let mut rng = StdRng::seed_from_u64(seed);

    let base_hue = if theme.hue_seeds.is_empty() {
        rng.gen::<f32>()
    } else {
        theme.hue_seeds[rng.gen_range(0..theme.hue_seeds.len())]
    };

    // Complementary anchor plus analogous neighbors around the base.
    let offsets = [0.0, 0.5, 1.0 / 12.0, -1.0 / 12.0, 0.25];
    let mut colors = Vec::with_capacity(palette_len);
    for i in 0..palette_len {
        let hue = base_hue + offsets[i % offsets.len()];
        let sat = rng.gen_range(0.75..1.0);
        let val = rng.gen_range(0.85..1.0);
        colors.push(Color::from_hsv(hue, sat, val));
    }

    ColorScheme {
        colors,
        rainbow: theme.allow_rainbows,
        theme_id: theme.id.clone(),
        epoch,
    }
}

/// Interpolated palette for a smooth crossfade: `t=0` returns `old`,
/// `t=1` returns `new`.
pub fn transition(old: &ColorScheme, new: &ColorScheme, t: f32) -> ColorScheme {
    let t = t.clamp(0.0, 1.0);
    if t <= 0.0 {
        return old.clone();
    }
    if t >= 1.0 {
        return new.clone();
    }
    let len = old.colors.len().max(new.colors.len());
    let colors = (0..len)
        .map(|i| Color::lerp(old.color(i), new.color(i), t))
        .collect();
    ColorScheme {
        colors,
        rainbow: new.rainbow,
        theme_id: new.theme_id.clone(),
        epoch: new.epoch,
    }
}

/// Accent shift: replace a single palette slot with a freshly drawn color.
/// Keeps the rest of the scheme so a SoftShift changes flavor, not identity.
pub fn shift_one(scheme: &ColorScheme, theme: &Theme, seed: u64, epoch: u64) -> ColorScheme {
    let fresh = generate(theme, scheme.colors.len().max(1), seed, epoch);
    let mut colors = scheme.colors.clone();
    if colors.is_empty() {
        return fresh;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let slot = rng.gen_range(0..colors.len());
    colors[slot] = fresh.color(slot);
    ColorScheme {
        colors,
        rainbow: scheme.rainbow,
        theme_id: scheme.theme_id.clone(),
        epoch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme() -> Theme {
        Theme {
            id: "ember".into(),
            allow_rainbows: false,
            hue_seeds: vec![0.02, 0.08],
        }
    }

    #[test]
    fn generation_is_deterministic_for_a_fixed_seed() {
        let a = generate(&theme(), 5, 42, 1);
        let b = generate(&theme(), 5, 42, 1);
        assert_eq!(a, b);

        let c = generate(&theme(), 5, 43, 1);
        assert_ne!(a.colors, c.colors);
    }

    #[test]
    fn transition_boundaries_are_identities() {
        let a = generate(&theme(), 5, 1, 1);
        let b = generate(&theme(), 5, 2, 2);
        assert_eq!(transition(&a, &b, 0.0), a);
        assert_eq!(transition(&a, &b, 1.0), b);

        // Midway is neither endpoint.
        let mid = transition(&a, &b, 0.5);
        assert_ne!(mid.colors, a.colors);
        assert_ne!(mid.colors, b.colors);
    }

    #[test]
    fn shift_one_replaces_exactly_one_slot() {
        let a = generate(&theme(), 5, 7, 1);
        let shifted = shift_one(&a, &theme(), 99, 2);
        let changed = a
            .colors
            .iter()
            .zip(&shifted.colors)
            .filter(|(x, y)| x != y)
            .count();
        assert_eq!(changed, 1);
        assert_eq!(shifted.epoch, 2);
    }

    #[test]
    fn rainbow_flag_follows_theme() {
        let mut t = theme();
        t.allow_rainbows = true;
        assert!(generate(&t, 5, 1, 1).rainbow);
        t.allow_rainbows = false;
        assert!(!generate(&t, 5, 1, 1).rainbow);
    }

    #[test]
    fn empty_palette_indexes_to_black() {
        let scheme = ColorScheme {
            colors: vec![],
            rainbow: false,
            theme_id: "x".into(),
            epoch: 0,
        };
        assert_eq!(scheme.color(3), Color::BLACK);
    }
}
