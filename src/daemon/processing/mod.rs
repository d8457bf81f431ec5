use anyhow::Result;
use module::EventProcessor;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info, info_span, Instrument};

use super::session::ClosedSession;

pub mod broadcaster;
pub mod module;
pub mod persister;

/// Persistence worker. Receives closed sessions from the tracking loop and hands them to the
/// processor one at a time. Stops once every sender is dropped and the queue is drained.
pub struct ProcessingModule<Processor> {
    receiver: Receiver<ClosedSession>,
    processor: Processor,
}

impl<P: EventProcessor> ProcessingModule<P> {
    pub fn new(receiver: Receiver<ClosedSession>, processor: P) -> Self {
        Self {
            receiver,
            processor,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(session) = self.receiver.recv().await {
            debug!("Processing session {:?}", session);
            let app_name = session.app_name.clone();
            let start_time = session.start_time;
            let span = info_span!("Processing closed session");
            match self.processor.process_next(session).instrument(span).await {
                Ok(_) => {
                    info!("Persisted session of {app_name} started at {start_time}")
                }
                Err(e) => {
                    error!("Dropping session of {app_name} started at {start_time}: {e:?}")
                }
            }
        }

        let result = self.processor.finalize().await;
        self.receiver.close();
        result
    }
}
