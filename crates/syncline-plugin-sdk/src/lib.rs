//! Syncline Plugin SDK
//!
//! Tools for building processor plugins for the Syncline integration agent.
//! A plugin implements [`PluginProcessor`] and is packaged one of two ways:
//!
//! - **Out-of-process**: a binary whose `main` is generated by
//!   [`plugin_main!`]. The agent spawns it as a child process and talks to
//!   it over stdio; a crash in the plugin never takes the agent down.
//! - **In-process**: a `cdylib` exporting the symbols generated by
//!   [`export_processor!`]. The agent loads it with zero serialization
//!   overhead but also zero isolation — only load modules you compiled
//!   yourself, with the same toolchain and SDK version as the host.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use syncline_plugin_sdk::prelude::*;
//!
//! struct Redactor;
//!
//! #[async_trait]
//! impl Processor for Redactor {
//!     async fn process(
//!         &self,
//!         event: Box<dyn PipelineEvent>,
//!     ) -> Result<Option<Box<dyn PipelineEvent>>, ProcessorError> {
//!         // transform and return the event, or Ok(None) to discard it
//!         Ok(Some(event))
//!     }
//! }
//!
//! impl PluginProcessor for Redactor {}
//!
//! syncline_plugin_sdk::plugin_main!(Redactor);
//! ```

pub mod log;
#[macro_use]
pub mod macros;
mod serve;

pub use serve::{serve, serve_connection, PluginProcessor, ServeError};

// Contract types shared with the host.
pub use syncline_core::event::{Event, EventError, Operation, PipelineEvent, PkField, PkFields};
pub use syncline_core::plugin::rpc::protocol::{
    Handshake, LogLevel, LogRecord, Request, Response, WireEvent, MAGIC_COOKIE_KEY,
    MAGIC_COOKIE_VALUE, METHOD_DISPENSE, METHOD_INIT, METHOD_PROCESS, PROCESSOR_SERVICE,
    PROTOCOL_VERSION,
};
pub use syncline_core::plugin::{BoxedProcessor, PLUGIN_ABI_VERSION};
pub use syncline_core::processor::{Processor, ProcessorError};

// Re-exported for the generated code in `plugin_main!` / `export_processor!`.
#[doc(hidden)]
pub use serde_json;
#[doc(hidden)]
pub use tokio;

/// Common imports for plugin authors.
pub mod prelude {
    pub use crate::log;
    pub use crate::serve::{serve, PluginProcessor};
    pub use crate::{Event, Operation, PipelineEvent, PkField, PkFields};
    pub use crate::{Processor, ProcessorError};
    pub use async_trait::async_trait;
    pub use serde_json::{Map, Value};
}
