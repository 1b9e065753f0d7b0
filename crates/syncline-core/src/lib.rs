//! Core abstractions for the Syncline integration agent.
//!
//! Change events ingested from external systems flow through a chain of
//! [`processor::Processor`] stages and end at a [`sink::Sink`]. Processors
//! can be builtin transformations or externally supplied plugins, hosted
//! either in-process (dynamic library) or out-of-process (child process
//! speaking stdio RPC) — see [`plugin`].

pub mod event;
pub mod pipeline;
pub mod plugin;
pub mod processor;
pub mod sink;

pub use event::{Event, EventError, Operation, PipelineEvent, PkField, PkFields};
pub use pipeline::{Pipeline, PipelineError, PipelineOutcome};
pub use plugin::{PluginError, BoxedProcessor, PLUGIN_ABI_VERSION};
pub use processor::{build_processor, Processor, ProcessorConfig, ProcessorError};
pub use sink::{MemorySink, Sink, SinkError};

/// Re-exports commonly used together.
pub mod prelude {
    pub use crate::event::{Event, Operation, PipelineEvent, PkField, PkFields};
    pub use crate::pipeline::{Pipeline, PipelineOutcome};
    pub use crate::plugin::PluginError;
    pub use crate::processor::{Processor, ProcessorConfig, ProcessorError};
    pub use crate::sink::{Sink, SinkError};
}
