//! Load engine - batching, writers, and the run state machine

pub mod accumulator;
pub mod load_engine;
pub mod worker;

pub use accumulator::{Batch, BatchAccumulator};
pub use load_engine::{
    EngineConfig, EngineConfigBuilder, EngineState, LoadEngine, LoadSummary, MalformedPolicy,
    PipelineConfig,
};
