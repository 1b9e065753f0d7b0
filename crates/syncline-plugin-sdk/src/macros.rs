//! Macros for packaging a processor as a plugin.

/// Generate the `main` of an out-of-process plugin binary.
///
/// The generated entry point performs the stdio handshake and serves the
/// processor until the host closes the connection. A failed handshake (for
/// example, running the binary by hand) exits non-zero with a diagnostic.
///
/// # Example
///
/// ```rust,ignore
/// use syncline_plugin_sdk::prelude::*;
///
/// struct Enricher;
/// // ... impl Processor and PluginProcessor for Enricher ...
///
/// syncline_plugin_sdk::plugin_main!(Enricher);
/// ```
#[macro_export]
macro_rules! plugin_main {
    ($processor:expr) => {
        fn main() {
            let runtime = match $crate::tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("failed to start plugin runtime: {e}");
                    ::std::process::exit(1);
                }
            };
            if let Err(e) = runtime.block_on($crate::serve($processor)) {
                eprintln!("{e}");
                ::std::process::exit(1);
            }
        }
    };
}

/// Generate the FFI exports of an in-process plugin `cdylib`.
///
/// Takes a factory `fn(Map<String, Value>) -> Result<BoxedProcessor, E>`
/// that receives the deserialized init options. The generated
/// `syncline_plugin_create` returns null when the options are malformed or
/// the factory errors; the host reports that as an initialization failure.
///
/// # Example
///
/// ```rust,ignore
/// use syncline_plugin_sdk::prelude::*;
/// use syncline_plugin_sdk::BoxedProcessor;
///
/// struct Enricher;
/// // ... impl Processor for Enricher ...
///
/// fn create(options: Map<String, Value>) -> Result<BoxedProcessor, ProcessorError> {
///     let _ = options;
///     Ok(Box::new(Enricher))
/// }
///
/// syncline_plugin_sdk::export_processor!(create);
/// ```
#[macro_export]
macro_rules! export_processor {
    ($create:expr) => {
        #[no_mangle]
        pub extern "C" fn syncline_plugin_abi_version() -> u32 {
            $crate::PLUGIN_ABI_VERSION
        }

        /// # Safety
        /// `options_json` must point to `options_len` valid bytes, or be
        /// null with `options_len == 0`.
        #[no_mangle]
        pub unsafe extern "C" fn syncline_plugin_create(
            options_json: *const u8,
            options_len: usize,
        ) -> *mut $crate::BoxedProcessor {
            let options = if options_json.is_null() || options_len == 0 {
                $crate::serde_json::Map::new()
            } else {
                let bytes = unsafe { ::std::slice::from_raw_parts(options_json, options_len) };
                match $crate::serde_json::from_slice(bytes) {
                    Ok(options) => options,
                    Err(_) => return ::std::ptr::null_mut(),
                }
            };
            match $create(options) {
                Ok(processor) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(processor)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }

        /// # Safety
        /// `processor` must be a pointer previously returned by
        /// `syncline_plugin_create`, passed at most once.
        #[no_mangle]
        pub unsafe extern "C" fn syncline_plugin_destroy(
            processor: *mut $crate::BoxedProcessor,
        ) {
            if !processor.is_null() {
                drop(unsafe { ::std::boxed::Box::from_raw(processor) });
            }
        }
    };
}
