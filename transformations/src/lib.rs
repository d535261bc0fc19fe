//! Declarative image operation chains.
//!
//! A request body describing one operation or an ordered pipeline is turned
//! into a [`Chain`] of [`OperationNode`]s by the [`ChainBuilder`], evaluated
//! root to tail by the [`Coordinator`] against an [`ImageCodec`], and
//! encoded back to bytes. Events along the way go to a [`LogSink`].

pub mod builder;
pub mod codec;
pub mod error;
pub mod executor;
pub mod logging;
pub mod node;
pub mod params;
pub mod registry;
pub mod rust_codec;

pub use builder::{ChainBuilder, UnknownOperationPolicy, DEFAULT_MAX_OPERATIONS};
pub use codec::{CropPosition, FitMode, ImageCodec, OutputFormat, Region, WorkingImage};
pub use error::{Result, TransformationError};
pub use executor::{
    ChainOutput, Coordinator, FailurePolicy, RequestContext, StepFailure, StepOutcome,
};
pub use logging::{
    ConsoleSink, FanoutSink, FileSink, LogEvent, LogLevel, LogResult, LogSink, MemorySink,
};
pub use node::{Chain, NodeId, NodeInput, OperationNode};
pub use params::OperationParams;
pub use registry::{OperationKind, TransformFn};
pub use rust_codec::RustCodec;

pub use tokio_util::sync::CancellationToken;
