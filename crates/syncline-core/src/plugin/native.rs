//! In-process plugin loading via dynamic libraries.
//!
//! A native plugin is a `cdylib` built against `syncline-plugin-sdk`; its
//! `export_processor!` invocation produces the symbols resolved here. The
//! returned processor runs directly in the caller's task — there is no
//! isolation, and unloading is not supported.

use std::path::Path;

use async_trait::async_trait;
use libloading::{Library, Symbol};
use serde_json::{Map, Value};
use tracing::info;

use super::{
    BoxedProcessor, PluginError, Result, ABI_VERSION_SYMBOL, CREATE_SYMBOL, PLUGIN_ABI_VERSION,
};
use crate::event::PipelineEvent;
use crate::processor::{self, Processor};

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type CreateFn = unsafe extern "C" fn(*const u8, usize) -> *mut BoxedProcessor;

/// A processor loaded from a dynamic library.
pub struct NativePluginProcessor {
    processor: BoxedProcessor,
    // Dropped after `processor`: the module must stay mapped while any code
    // or vtable from it can still run.
    _library: Library,
}

impl std::fmt::Debug for NativePluginProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePluginProcessor")
            .finish_non_exhaustive()
    }
}

impl NativePluginProcessor {
    /// Load a module from `path` and create its processor with the given
    /// init options (serialized to JSON bytes).
    ///
    /// The ABI version gate runs before the initializer is resolved:
    /// calling through a mismatched signature is undefined behavior, so a
    /// module reporting a foreign version is rejected without ever being
    /// invoked.
    pub fn load(path: &Path, init_options: &Map<String, Value>) -> Result<Self> {
        let library = unsafe { Library::new(path) }.map_err(|e| {
            PluginError::LoadFailed(format!("failed to open module {}: {e}", path.display()))
        })?;

        let version = {
            let abi_version: Symbol<'_, AbiVersionFn> = unsafe { library.get(ABI_VERSION_SYMBOL) }
                .map_err(|e| {
                    PluginError::LoadFailed(format!(
                        "module {} has no ABI version symbol: {e}",
                        path.display()
                    ))
                })?;
            unsafe { abi_version() }
        };
        if version != PLUGIN_ABI_VERSION {
            return Err(PluginError::InvalidSignature(format!(
                "module {} was built against ABI version {version}, host expects {PLUGIN_ABI_VERSION}",
                path.display()
            )));
        }

        let options = serde_json::to_vec(init_options).map_err(|e| {
            PluginError::Initialization(format!("init options are not serializable: {e}"))
        })?;
        let raw = {
            let create: Symbol<'_, CreateFn> =
                unsafe { library.get(CREATE_SYMBOL) }.map_err(|e| {
                    PluginError::LoadFailed(format!(
                        "module {} has no create symbol: {e}",
                        path.display()
                    ))
                })?;
            unsafe { create(options.as_ptr(), options.len()) }
        };
        if raw.is_null() {
            return Err(PluginError::Initialization(format!(
                "module {} initializer rejected the configuration",
                path.display()
            )));
        }
        let processor = *unsafe { Box::from_raw(raw) };

        info!(module = %path.display(), "loaded native plugin");
        Ok(Self {
            processor,
            _library: library,
        })
    }
}

#[async_trait]
impl Processor for NativePluginProcessor {
    async fn process(
        &self,
        event: Box<dyn PipelineEvent>,
    ) -> processor::Result<Option<Box<dyn PipelineEvent>>> {
        self.processor.process(event).await
    }

    async fn close(&self) -> processor::Result<()> {
        self.processor.close().await
    }
}
