//! Visual graph
//!
//! Owns the layer stack that renders the composited video frame for each
//! visual tick. Layers hold node chains ordered by stage through a petgraph
//! toposort; the stack regenerates on scheduler decisions in lockstep with
//! the lighting assignment.

pub mod nodes;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::ColorScheme;
use crate::config::EngineConfig;
use crate::scheduler::{DecisionKind, SceneDecision};
use crate::signal::SignalSnapshot;
use crate::state::{Mode, PerformanceState};

pub use nodes::{NodeSpec, Stage, VjNode, NODE_CATALOG};

/// RGB float frame, row-major, values nominally 0.0-1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<[f32; 3]>,
}

impl FrameBuffer {
    pub fn black(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![[0.0, 0.0, 0.0]; width * height],
        }
    }

    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [f32; 3] {
        &mut self.data[y * self.width + x]
    }

    /// Rotate one row right by `shift` pixels, wrapping.
    pub fn rotate_row(&mut self, y: usize, shift: usize) {
        if self.width == 0 {
            return;
        }
        let start = y * self.width;
        let row = &mut self.data[start..start + self.width];
        row.rotate_right(shift % row.len());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Additive,
    Multiply,
}

/// One compositing layer: an ordered node chain plus how its output lands on
/// the frame below. Sticky layers survive soft shifts with only a parameter
/// refresh.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub blend: BlendMode,
    pub opacity: f32,
    pub sticky: bool,
    pub chain: Vec<VjNode>,
}

#[derive(Debug, Clone)]
pub struct LayerStack {
    pub epoch: u64,
    pub layers: Vec<Layer>,
}

/// Order a freshly picked node set by stage. The chain is a DAG with one
/// edge per stage boundary; toposort gives the execution order.
fn order_chain(picked: Vec<VjNode>) -> Vec<VjNode> {
    let mut graph: DiGraph<VjNode, ()> = DiGraph::new();
    let indices: Vec<_> = picked.into_iter().map(|n| graph.add_node(n)).collect();
    for &a in &indices {
        for &b in &indices {
            if a != b && graph[a].stage() < graph[b].stage() {
                graph.add_edge(a, b, ());
            }
        }
    }
    match toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|ix| graph[ix].clone()).collect(),
        // Stage ordering is a partial order, cycles cannot occur.
        Err(_) => indices.into_iter().map(|ix| graph[ix].clone()).collect(),
    }
}

pub struct VisualGraph {
    width: usize,
    height: usize,
    master_seed: u64,
    stack: LayerStack,
}

impl VisualGraph {
    pub fn new(cfg: &EngineConfig, mode: Mode) -> Self {
        let mut graph = Self {
            width: cfg.frame_width,
            height: cfg.frame_height,
            master_seed: cfg.master_seed,
            stack: LayerStack {
                epoch: 0,
                layers: Vec::new(),
            },
        };
        graph.regenerate_full(0, mode);
        graph
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    fn stack_rng(&self, epoch: u64) -> StdRng {
        StdRng::seed_from_u64(self.master_seed ^ epoch.wrapping_mul(0xd1b5_4a32_d192_ed03))
    }

    fn pick_nodes(rng: &mut StdRng, mode: Mode, stage: Stage, count: usize) -> Vec<VjNode> {
        let pool: Vec<&NodeSpec> = NODE_CATALOG
            .iter()
            .filter(|s| s.stage == stage)
            .filter(|s| !(mode == Mode::Twinkle && s.high_intensity))
            .collect();
        let mut out = Vec::new();
        for _ in 0..count {
            if pool.is_empty() {
                break;
            }
            let spec = pool[rng.gen_range(0..pool.len())];
            out.push((spec.build)(rng));
        }
        out
    }

    fn build_layer(rng: &mut StdRng, mode: Mode, name: &str, sticky: bool) -> Layer {
        let filters = rng.gen_range(1..=2);
        let posts = rng.gen_range(0..=2);
        let mut picked = Self::pick_nodes(rng, mode, Stage::Source, 1);
        picked.extend(Self::pick_nodes(rng, mode, Stage::Filter, filters));
        picked.extend(Self::pick_nodes(rng, mode, Stage::Post, posts));
        Layer {
            name: name.to_string(),
            blend: if sticky {
                BlendMode::Normal
            } else {
                [BlendMode::Normal, BlendMode::Additive, BlendMode::Multiply]
                    [rng.gen_range(0..3)]
            },
            opacity: if sticky { 1.0 } else { rng.gen_range(0.4..0.9) },
            sticky,
            chain: order_chain(picked),
        }
    }

    fn regenerate_full(&mut self, epoch: u64, mode: Mode) {
        let mut rng = self.stack_rng(epoch);
        let mut layers = vec![Self::build_layer(&mut rng, mode, "background", true)];
        for i in 0..rng.gen_range(1..=2usize) {
            layers.push(Self::build_layer(
                &mut rng,
                mode,
                &format!("foreground-{}", i),
                false,
            ));
        }
        self.stack = LayerStack { epoch, layers };
        log::info!("[vj] stack rebuilt for epoch {}: {}", epoch, self.describe());
    }

    /// Soft shift: sticky layers keep their node chains and only re-roll
    /// parameters; non-sticky layers rebuild.
    fn regenerate_partial(&mut self, epoch: u64, mode: Mode) {
        let mut rng = self.stack_rng(epoch);
        for layer in &mut self.stack.layers {
            if layer.sticky {
                for node in &mut layer.chain {
                    node.refresh_params(&mut rng);
                }
            } else {
                *layer = Self::build_layer(&mut rng, mode, &layer.name.clone(), false);
            }
        }
        self.stack.epoch = epoch;
        log::info!("[vj] stack shifted for epoch {}: {}", epoch, self.describe());
    }

    pub fn on_scheduler_decision(&mut self, decision: &SceneDecision, state: &PerformanceState) {
        match decision.kind {
            DecisionKind::NoChange => {}
            DecisionKind::SoftShift => self.regenerate_partial(decision.epoch, state.mode),
            DecisionKind::HardShift => self.regenerate_full(decision.epoch, state.mode),
            DecisionKind::BlackoutNow => self.stack.epoch = decision.epoch,
        }
    }

    /// Render one composited frame. A faulting node is skipped with its input
    /// passed through; a faulting layer never takes the frame down.
    pub fn render(
        &mut self,
        snapshot: &SignalSnapshot,
        state: &PerformanceState,
        scheme: &ColorScheme,
        t: f32,
    ) -> FrameBuffer {
        let mut out = FrameBuffer::black(self.width, self.height);
        if state.mode == Mode::Blackout {
            return out;
        }

        for layer in &self.stack.layers {
            let mut work = FrameBuffer::black(self.width, self.height);
            for node in &layer.chain {
                if let Err(e) = node.transform(&mut work, snapshot, state, scheme, t) {
                    log::error!("[vj] node '{}' in layer '{}' failed: {}", node.name(), layer.name, e);
                }
            }
            composite(&mut out, &work, layer.blend, layer.opacity);
        }
        out
    }

    pub fn describe(&self) -> String {
        self.stack
            .layers
            .iter()
            .map(|l| {
                let chain: Vec<&str> = l.chain.iter().map(|n| n.name()).collect();
                format!("{}[{}]", l.name, chain.join(">"))
            })
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

fn composite(out: &mut FrameBuffer, layer: &FrameBuffer, blend: BlendMode, opacity: f32) {
    let a = opacity.clamp(0.0, 1.0);
    for (dst, src) in out.data.iter_mut().zip(layer.data.iter()) {
        for c in 0..3 {
            let blended = match blend {
                BlendMode::Normal => dst[c] * (1.0 - a) + src[c] * a,
                BlendMode::Additive => dst[c] + src[c] * a,
                BlendMode::Multiply => dst[c] * (1.0 - a + src[c] * a),
            };
            dst[c] = blended.clamp(0.0, 1.0);
        }
    }
}
