//! Pipeline orchestration.
//!
//! One logical worker drives each incoming event through the configured
//! processor chain and into the sink. Processors are invoked synchronously
//! from the worker's point of view: each call blocks the worker until the
//! stage returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::event::PipelineEvent;
use crate::processor::{Processor, ProcessorError};
use crate::sink::{Sink, SinkError};

/// Errors that abort forwarding of a single event. Never fatal to the
/// pipeline or the host process.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// How an event left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The event passed every stage and reached the sink.
    Delivered,
    /// A processor discarded the event; this is a normal skip, not a
    /// failure.
    Discarded,
}

/// An ordered processor chain feeding a sink.
pub struct Pipeline {
    processors: Vec<Box<dyn Processor>>,
    sink: Arc<dyn Sink>,
    closed: AtomicBool,
}

impl Pipeline {
    pub fn new(processors: Vec<Box<dyn Processor>>, sink: Arc<dyn Sink>) -> Self {
        Self {
            processors,
            sink,
            closed: AtomicBool::new(false),
        }
    }

    /// Run one event through the chain and, unless it was discarded,
    /// forward it to the sink.
    pub async fn handle(
        &self,
        mut event: Box<dyn PipelineEvent>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let execution_id = uuid::Uuid::new_v4();
        // Captured up front: the event is consumed stage by stage, but
        // failures must still be reported with enough context for triage.
        let event_type = event.event_type().to_string();
        let primary_keys = format!("{:?}", event.primary_keys());

        for processor in &self.processors {
            match processor.process(event).await {
                Ok(Some(next)) => event = next,
                Ok(None) => {
                    debug!(%execution_id, %event_type, "event discarded by processor");
                    return Ok(PipelineOutcome::Discarded);
                }
                Err(e) => {
                    error!(
                        %execution_id,
                        %event_type,
                        %primary_keys,
                        error = %e,
                        "processor failed, dropping event"
                    );
                    return Err(e.into());
                }
            }
        }

        let sink_result = match event.operation() {
            crate::event::Operation::Write => self.sink.write_data(event.as_ref()).await,
            crate::event::Operation::Delete => self.sink.delete(event.as_ref()).await,
        };
        if let Err(e) = sink_result {
            error!(
                %execution_id,
                event_type = event.event_type(),
                primary_keys = ?event.primary_keys(),
                error = %e,
                "sink rejected event"
            );
            return Err(e.into());
        }

        Ok(PipelineOutcome::Delivered)
    }

    /// Close every processor. Runs the teardown at most once; later calls
    /// return immediately. Call after workers have stopped submitting
    /// events so no connection is closed mid-call.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for processor in &self.processors {
            if let Err(e) = processor.close().await {
                warn!(error = %e, "processor close failed");
            }
        }
    }
}
