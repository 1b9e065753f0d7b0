//! Guest side of the stdio RPC protocol.
//!
//! [`serve`] is called exactly once at process start (usually via
//! [`plugin_main!`](crate::plugin_main)): it verifies the magic cookie from
//! the environment, writes the handshake line on stdout before anything
//! else, then answers frames from stdin until the host closes the pipe.
//! There is no graceful reconfiguration — a config change means a new
//! child process.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use syncline_core::event::{Event, PipelineEvent};
use syncline_core::plugin::rpc::protocol::{
    Handshake, Request, Response, WireEvent, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE,
    METHOD_DISPENSE, METHOD_INIT, METHOD_PROCESS, PROCESSOR_SERVICE,
};
use syncline_core::processor::{self, Processor};

/// Errors that terminate the serving loop.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The environment does not carry the host's magic cookie.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The contract a plugin implements on top of [`Processor`].
///
/// `init` is invoked at most once, before any `Process` call, and only when
/// the host was configured with non-empty init options. The default accepts
/// any options.
#[async_trait]
pub trait PluginProcessor: Processor {
    async fn init(&self, options: &Map<String, Value>) -> processor::Result<()> {
        let _ = options;
        Ok(())
    }
}

/// Handshake and serve on the process's stdio. Returns when the host closes
/// the connection.
pub async fn serve<P: PluginProcessor>(processor: P) -> Result<(), ServeError> {
    match std::env::var(MAGIC_COOKIE_KEY) {
        Ok(value) if value == MAGIC_COOKIE_VALUE => {}
        _ => {
            return Err(ServeError::Handshake(
                "this binary is a syncline plugin and is not meant to be executed directly"
                    .to_string(),
            ))
        }
    }
    serve_connection(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), processor).await
}

/// Transport-agnostic serving loop; [`serve`] binds it to stdio.
pub async fn serve_connection<R, W, P>(
    reader: R,
    mut writer: W,
    processor: P,
) -> Result<(), ServeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    P: PluginProcessor,
{
    // The handshake goes out before any other byte on this stream.
    write_line(&mut writer, &serde_json::to_string(&Handshake::current())?).await?;

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => dispatch(&processor, request).await,
            // Without a parseable frame there is no request id to echo.
            Err(e) => Response::err(0, format!("malformed request: {e}")),
        };
        write_line(&mut writer, &serde_json::to_string(&response)?).await?;
    }
    Ok(())
}

async fn dispatch<P: PluginProcessor>(processor: &P, request: Request) -> Response {
    if request.service != PROCESSOR_SERVICE {
        return Response::err(request.id, format!("unknown service: {}", request.service));
    }
    match request.method.as_str() {
        METHOD_DISPENSE => {
            let requested = request
                .params
                .get("service")
                .and_then(Value::as_str)
                .unwrap_or(PROCESSOR_SERVICE);
            if requested == PROCESSOR_SERVICE {
                Response::ok(request.id, Value::String(PROCESSOR_SERVICE.to_string()))
            } else {
                Response::err(request.id, format!("unknown service: {requested}"))
            }
        }
        METHOD_INIT => match request.params {
            Value::Object(options) => match processor.init(&options).await {
                Ok(()) => Response::ok(request.id, Value::Null),
                Err(e) => Response::err(request.id, format!("init failed: {e}")),
            },
            _ => Response::err(request.id, "init options must be an object".to_string()),
        },
        METHOD_PROCESS => {
            let wire: WireEvent = match serde_json::from_value(request.params) {
                Ok(wire) => wire,
                Err(e) => return Response::err(request.id, format!("malformed event: {e}")),
            };
            let event: Box<dyn PipelineEvent> = Box::new(wire.into_event());
            match processor.process(event).await {
                // Only the concrete Event type crosses the wire; returning
                // any other PipelineEvent implementation is a plugin bug
                // and is reported instead of coerced.
                Ok(Some(result)) => match result.as_any().downcast_ref::<Event>() {
                    Some(event) => match serde_json::to_value(WireEvent::from_event(event)) {
                        Ok(value) => Response::ok(request.id, value),
                        Err(e) => {
                            Response::err(request.id, format!("event encoding failed: {e}"))
                        }
                    },
                    None => Response::err(
                        request.id,
                        "processor returned an unsupported event type; plugins must return \
                         the concrete Event"
                            .to_string(),
                    ),
                },
                Ok(None) => Response::ok(request.id, Value::Null),
                Err(e) => Response::err(request.id, e.to_string()),
            }
        }
        other => Response::err(request.id, format!("unknown method: {other}")),
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
