//! The processor extension contract.
//!
//! A [`Processor`] transforms one pipeline event into another. The pipeline
//! orchestrator calls each configured processor in sequence, feeding the
//! event returned by one stage into the next. Processors are stateless from
//! the orchestrator's point of view: every call is independent, and any
//! internal state (client handles, plugin connections) is owned by the
//! instance and created once at pipeline setup.
//!
//! Implementations come in three flavors, selected by configuration:
//! builtin transformations ([`mapper::Mapper`]), in-process dynamic-library
//! plugins ([`crate::plugin::native`]), and out-of-process RPC plugins
//! ([`crate::plugin::rpc`]).

pub mod mapper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::{EventError, PipelineEvent};
use crate::plugin::native::NativePluginProcessor;
use crate::plugin::rpc::{RpcPluginConfig, RpcPluginHost};
use crate::plugin::PluginError;

/// Per-call processor errors. These are scoped to a single event and never
/// fatal to the host process or to the plugin connection.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Application-level failure reported by the processor or plugin guest.
    #[error("processing failed: {0}")]
    Execution(String),

    /// The event payload or a wire frame could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure talking to an out-of-process plugin.
    #[error("plugin rpc error: {0}")]
    Rpc(String),

    /// The per-call deadline elapsed. Retryable.
    #[error("processor call timed out")]
    Timeout,

    #[error(transparent)]
    Event(#[from] EventError),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

impl std::fmt::Debug for dyn Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Processor").finish_non_exhaustive()
    }
}

/// A pipeline transformation stage.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Transform `event` into the event handed to the next stage.
    ///
    /// Returns `Ok(None)` to discard: the pipeline stops forwarding this
    /// event without treating it as a failure. Errors abort forwarding for
    /// this event only.
    async fn process(
        &self,
        event: Box<dyn PipelineEvent>,
    ) -> Result<Option<Box<dyn PipelineEvent>>>;

    /// Release resources owned by this processor. Called exactly once per
    /// instance during pipeline shutdown; implementations must tolerate
    /// repeated calls.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Processor configuration, keyed on the `type` strategy field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProcessorConfig {
    /// Builtin template mapper.
    Mapper {
        #[serde(rename = "outputEvent")]
        output_event: Value,
    },

    /// In-process dynamic-library plugin.
    NativePlugin {
        #[serde(rename = "modulePath")]
        module_path: std::path::PathBuf,
        #[serde(default, rename = "initOptions")]
        init_options: Map<String, Value>,
    },

    /// Out-of-process RPC plugin.
    RpcPlugin {
        #[serde(rename = "modulePath")]
        module_path: std::path::PathBuf,
        #[serde(default, rename = "initOptions")]
        init_options: Map<String, Value>,
        /// Per-call deadline in milliseconds. Defaults to 30s.
        #[serde(default, rename = "callTimeoutMs")]
        call_timeout_ms: Option<u64>,
    },
}

/// Build a ready processor from its configuration.
///
/// Setup-time failures (load, spawn, handshake, init) are fatal to the
/// owning integration and surface as [`PluginError`].
pub async fn build_processor(
    config: ProcessorConfig,
) -> std::result::Result<Box<dyn Processor>, PluginError> {
    match config {
        ProcessorConfig::Mapper { output_event } => {
            Ok(Box::new(mapper::Mapper::new(output_event)))
        }
        ProcessorConfig::NativePlugin {
            module_path,
            init_options,
        } => {
            let plugin = NativePluginProcessor::load(&module_path, &init_options)?;
            Ok(Box::new(plugin))
        }
        ProcessorConfig::RpcPlugin {
            module_path,
            init_options,
            call_timeout_ms,
        } => {
            let mut plugin_config =
                RpcPluginConfig::new(module_path).with_init_options(init_options);
            if let Some(ms) = call_timeout_ms {
                plugin_config = plugin_config.with_call_timeout(std::time::Duration::from_millis(ms));
            }
            let host = RpcPluginHost::new(plugin_config).await?;
            Ok(Box::new(host))
        }
    }
}
