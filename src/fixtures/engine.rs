//! Channel frame assembly
//!
//! Turns the per-group parameter values a tick produced into the per-fixture
//! channel vectors the fixture sink consumes. Values are clamped to the DMX
//! range and the total channel count is bounded by the universe size; the
//! engine clamps, it never exceeds.

use std::collections::HashMap;

use crate::fixtures::models::{ChannelParam, FixtureGroup, GroupValues};

/// One control frame for the fixture sink: fixture id -> channel vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFrame {
    pub channels: HashMap<String, Vec<u8>>,
}

impl ChannelFrame {
    pub fn total_channels(&self) -> usize {
        self.channels.values().map(|v| v.len()).sum()
    }
}

/// Clamp a 0.0-1.0 parameter into the 0-255 DMX range. NaN reads as 0 so a
/// faulty upstream value darkens a channel instead of poisoning the frame.
pub fn dmx_clamp(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

fn channel_value(param: ChannelParam, values: &GroupValues, manual_dimmer: Option<f32>) -> u8 {
    let v = match param {
        ChannelParam::Dimmer => {
            let d = values.dimmer.unwrap_or(0.0);
            match manual_dimmer {
                Some(m) => d * m,
                None => d,
            }
        }
        ChannelParam::Red => values.color.map(|c| c[0]).unwrap_or(0.0),
        ChannelParam::Green => values.color.map(|c| c[1]).unwrap_or(0.0),
        ChannelParam::Blue => values.color.map(|c| c[2]).unwrap_or(0.0),
        ChannelParam::Pan => values.position.map(|p| p[0]).unwrap_or(0.5),
        ChannelParam::Tilt => values.position.map(|p| p[1]).unwrap_or(0.5),
        ChannelParam::Strobe => values.strobe.unwrap_or(0.0),
        ChannelParam::Gobo => values.gobo.unwrap_or(0.0),
    };
    dmx_clamp(v)
}

/// Assemble the channel frame for one tick. Fixtures that would push the
/// frame past `universe_size` channels are dropped dark with a warning;
/// patch layout mistakes must not overrun the hardware limit.
pub fn assemble(
    values: &HashMap<String, GroupValues>,
    groups: &[FixtureGroup],
    universe_size: usize,
    manual_dimmer: Option<f32>,
) -> ChannelFrame {
    let mut channels = HashMap::new();
    let mut used = 0usize;

    for group in groups {
        let layout = group.channel_layout();
        let group_values = values.get(&group.id).copied().unwrap_or_default();

        for fixture_id in &group.fixtures {
            if used + layout.len() > universe_size {
                log::warn!(
                    "[fixtures] universe full ({}ch), dropping {} and later fixtures",
                    universe_size,
                    fixture_id
                );
                return ChannelFrame { channels };
            }
            let vector: Vec<u8> = layout
                .iter()
                .map(|&param| channel_value(param, &group_values, manual_dimmer))
                .collect();
            used += vector.len();
            channels.insert(fixture_id.clone(), vector);
        }
    }

    ChannelFrame { channels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::models::Capability;

    fn par_group(id: &str, fixtures: &[&str]) -> FixtureGroup {
        FixtureGroup {
            id: id.into(),
            fixtures: fixtures.iter().map(|s| s.to_string()).collect(),
            capabilities: vec![Capability::Dimmer, Capability::Color],
        }
    }

    #[test]
    fn dmx_clamp_bounds_and_rejects_nan() {
        assert_eq!(dmx_clamp(f32::NAN), 0);
        assert_eq!(dmx_clamp(-0.5), 0);
        assert_eq!(dmx_clamp(2.0), 255);
        assert_eq!(dmx_clamp(1.0), 255);
        assert_eq!(dmx_clamp(0.5), 127);
    }

    #[test]
    fn assemble_emits_layout_ordered_vectors() {
        let groups = vec![par_group("pars", &["par-1"])];
        let mut values = HashMap::new();
        values.insert(
            "pars".to_string(),
            GroupValues {
                dimmer: Some(1.0),
                color: Some([1.0, 0.5, 0.0]),
                ..Default::default()
            },
        );
        let frame = assemble(&values, &groups, 512, None);
        assert_eq!(frame.channels["par-1"], vec![255, 255, 127, 0]);
    }

    #[test]
    fn manual_dimmer_scales_dimmer_channel_only() {
        let groups = vec![par_group("pars", &["par-1"])];
        let mut values = HashMap::new();
        values.insert(
            "pars".to_string(),
            GroupValues {
                dimmer: Some(1.0),
                color: Some([1.0, 1.0, 1.0]),
                ..Default::default()
            },
        );
        let frame = assemble(&values, &groups, 512, Some(0.5));
        assert_eq!(frame.channels["par-1"][0], 127);
        assert_eq!(frame.channels["par-1"][1], 255);
    }

    #[test]
    fn universe_bound_is_never_exceeded() {
        // 4 channels per fixture, 3 fixtures, but room for only 2.
        let groups = vec![par_group("pars", &["a", "b", "c"])];
        let frame = assemble(&HashMap::new(), &groups, 9, None);
        assert_eq!(frame.channels.len(), 2);
        assert!(frame.total_channels() <= 9);
    }

    #[test]
    fn missing_group_values_render_dark() {
        let groups = vec![par_group("pars", &["par-1"])];
        let frame = assemble(&HashMap::new(), &groups, 512, None);
        assert_eq!(frame.channels["par-1"], vec![0, 0, 0, 0]);
    }
}
