//! Write pipeline: ingest, batching, flush and writer workers

pub mod buffer;
pub mod pipeline;

pub use buffer::{BatchBuffer, WritableBatch};
pub use pipeline::{PipelineClosed, PipelineOptions, WritePipeline};
