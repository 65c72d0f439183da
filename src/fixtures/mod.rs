pub mod engine;
pub mod models;

pub use models::{Capability, ChannelParam, FixtureGroup, GroupValues};
