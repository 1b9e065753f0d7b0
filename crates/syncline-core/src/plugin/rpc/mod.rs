//! Out-of-process plugin hosting over stdio RPC.

mod host;
mod logger;
pub mod protocol;

pub use host::{RpcPluginConfig, RpcPluginHost};
pub use logger::LogBridge;
pub use protocol::{
    Handshake, LogLevel, LogRecord, Request, Response, WireEvent, MAGIC_COOKIE_KEY,
    MAGIC_COOKIE_VALUE, METHOD_DISPENSE, METHOD_INIT, METHOD_PROCESS, PROCESSOR_SERVICE,
    PROTOCOL_VERSION,
};
