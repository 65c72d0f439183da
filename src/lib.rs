pub mod color;
pub mod config;
pub mod control;
pub mod director;
pub mod engine;
pub mod error;
pub mod fixtures;
pub mod interpreters;
pub mod scheduler;
pub mod signal;
pub mod state;
pub mod vj;

pub use config::{EngineConfig, SessionConfig};
pub use control::{Ack, ControlCommand, ControlSurface};
pub use engine::{DirectionEngine, FixtureSink, FrameSink};
pub use error::EngineError;
pub use scheduler::{DecisionKind, SceneDecision};
pub use signal::{Band, SignalBus, SignalSnapshot};
pub use state::{Mode, PerformanceState, StateStore};
