use serde::{Deserialize, Serialize};

/// Capability tags declared by the venue patch for a fixture group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Dimmer,
    Color,
    Position,
    Strobe,
    Gobo,
}

/// A logical channel within a fixture's control vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelParam {
    Dimmer,
    Red,
    Green,
    Blue,
    Pan,
    Tilt,
    Strobe,
    Gobo,
}

/// A set of identically patched fixtures driven by one interpreter.
/// Static for a session; defined by the external patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureGroup {
    pub id: String,
    /// Ordered member fixture ids.
    pub fixtures: Vec<String>,
    pub capabilities: Vec<Capability>,
}

impl FixtureGroup {
    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Fixed per-fixture channel layout, derived from capability tags.
    /// The order is stable so channel frames are reproducible.
    pub fn channel_layout(&self) -> Vec<ChannelParam> {
        let mut layout = Vec::new();
        if self.has(Capability::Dimmer) {
            layout.push(ChannelParam::Dimmer);
        }
        if self.has(Capability::Color) {
            layout.push(ChannelParam::Red);
            layout.push(ChannelParam::Green);
            layout.push(ChannelParam::Blue);
        }
        if self.has(Capability::Position) {
            layout.push(ChannelParam::Pan);
            layout.push(ChannelParam::Tilt);
        }
        if self.has(Capability::Strobe) {
            layout.push(ChannelParam::Strobe);
        }
        if self.has(Capability::Gobo) {
            layout.push(ChannelParam::Gobo);
        }
        layout
    }

    pub fn channels_per_fixture(&self) -> usize {
        self.channel_layout().len()
    }
}

/// Normalized parameter values an interpreter computed for a group this tick.
/// `None` means the interpreter did not touch that parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GroupValues {
    pub dimmer: Option<f32>,
    pub color: Option<[f32; 3]>,
    pub position: Option<[f32; 2]>,
    pub strobe: Option<f32>,
    pub gobo: Option<f32>,
}

impl GroupValues {
    /// The zero channel vector: everything dark, shutters closed.
    pub fn blackout() -> Self {
        Self {
            dimmer: Some(0.0),
            color: Some([0.0, 0.0, 0.0]),
            position: None,
            strobe: Some(0.0),
            gobo: Some(0.0),
        }
    }

    /// Blend a later chain member over this one. Dimmers accumulate
    /// additively, strobe keeps the hotter value, color and the rest are
    /// override channels: later children win.
    pub fn blend_over(&mut self, later: &GroupValues) {
        if let Some(d) = later.dimmer {
            self.dimmer = Some(match self.dimmer {
                Some(existing) => (existing + d).clamp(0.0, 1.0),
                None => d,
            });
        }
        if later.color.is_some() {
            self.color = later.color;
        }
        if later.position.is_some() {
            self.position = later.position;
        }
        if let Some(s) = later.strobe {
            self.strobe = Some(match self.strobe {
                Some(existing) => existing.max(s),
                None => s,
            });
        }
        if later.gobo.is_some() {
            self.gobo = later.gobo;
        }
    }

    /// Capabilities a group must declare for these values to be renderable.
    pub fn required_capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.dimmer.is_some() {
            caps.push(Capability::Dimmer);
        }
        if self.color.is_some() {
            caps.push(Capability::Color);
        }
        if self.position.is_some() {
            caps.push(Capability::Position);
        }
        if self.strobe.is_some() {
            caps.push(Capability::Strobe);
        }
        if self.gobo.is_some() {
            caps.push(Capability::Gobo);
        }
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_layout_is_stable_and_capability_driven() {
        let group = FixtureGroup {
            id: "heads".into(),
            fixtures: vec!["mh-1".into()],
            capabilities: vec![Capability::Color, Capability::Dimmer, Capability::Position],
        };
        assert_eq!(
            group.channel_layout(),
            vec![
                ChannelParam::Dimmer,
                ChannelParam::Red,
                ChannelParam::Green,
                ChannelParam::Blue,
                ChannelParam::Pan,
                ChannelParam::Tilt,
            ]
        );
        assert_eq!(group.channels_per_fixture(), 6);
    }

    #[test]
    fn dimmer_blends_additively_and_color_overrides() {
        let mut base = GroupValues {
            dimmer: Some(0.6),
            color: Some([1.0, 0.0, 0.0]),
            ..Default::default()
        };
        base.blend_over(&GroupValues {
            dimmer: Some(0.7),
            color: Some([0.0, 0.0, 1.0]),
            ..Default::default()
        });
        assert_eq!(base.dimmer, Some(1.0)); // additive, clamped
        assert_eq!(base.color, Some([0.0, 0.0, 1.0])); // later wins
    }

    #[test]
    fn strobe_keeps_the_hotter_value() {
        let mut base = GroupValues {
            strobe: Some(0.8),
            ..Default::default()
        };
        base.blend_over(&GroupValues {
            strobe: Some(0.3),
            ..Default::default()
        });
        assert_eq!(base.strobe, Some(0.8));
    }
}
