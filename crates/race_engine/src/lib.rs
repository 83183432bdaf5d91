pub mod engine;
pub mod normalise;
pub mod pace;
pub mod reliability;
pub mod summary;
pub mod weights;

pub use engine::SimulationEngine;
pub use normalise::MetricDescriptor;
pub use pace::{base_score, FieldNorms};
pub use reliability::{finish_probability, reliability_amplifier};
pub use weights::ContextWeights;
