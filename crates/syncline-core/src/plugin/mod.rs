//! Plugin hosting for externally supplied processors.
//!
//! Two strategies are supported, selected by configuration:
//!
//! - [`native`] loads a dynamic library into the host process. Zero
//!   serialization overhead, zero isolation: a panic inside the module
//!   brings down the host. Only load modules compiled with the same
//!   toolchain against the same SDK version as the host.
//! - [`rpc`] runs the plugin as a child process speaking a line-delimited
//!   JSON protocol over stdio. Full crash isolation at the cost of
//!   serializing every event across the process boundary.
//!
//! Both present the plugin as an ordinary [`Processor`](crate::processor::Processor).

pub mod native;
pub mod rpc;

use crate::processor::Processor;

/// ABI version for in-process plugins. Incremented on breaking changes to
/// the [`Processor`] contract or the event model.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Exported symbol reporting the ABI version a module was built against.
pub const ABI_VERSION_SYMBOL: &[u8] = b"syncline_plugin_abi_version";

/// Exported symbol creating the module's processor from serialized init
/// options. Returns null when initialization fails.
pub const CREATE_SYMBOL: &[u8] = b"syncline_plugin_create";

/// Boxed processor handed across the dynamic-library boundary.
pub type BoxedProcessor = Box<dyn Processor>;

/// Setup-time plugin errors. All of these abort bringing the processor
/// online and must prevent the owning integration from starting.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The module could not be opened, or a required symbol is missing.
    #[error("plugin load failed: {0}")]
    LoadFailed(String),

    /// The module's exported symbols do not match the host's ABI.
    #[error("invalid plugin signature: {0}")]
    InvalidSignature(String),

    /// The service handle could not be obtained from an otherwise-healthy
    /// plugin connection.
    #[error("plugin dispense failed: {0}")]
    Dispense(String),

    /// The plugin process failed to start, the handshake failed, or the
    /// guest's init call returned an error.
    #[error("plugin initialization failed: {0}")]
    Initialization(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;
