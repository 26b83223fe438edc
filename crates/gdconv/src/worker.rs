//! # Worker Context
//!
//! Runs a `Dispatcher` behind a transport, the way an isolated worker runs
//! behind its message port.
//!
//! Every inbound frame is dispatched on its own task, so a slow
//! `initialize_engine` does not hold up requests that arrive after it.
//! Replies are written back as they complete, in whatever order that is.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;

use crate::dispatcher::Dispatcher;
use crate::engine::Bootstrap;
use crate::transport::Transport;

/// A running worker.
///
/// Dropping the handle stops the receive loop. Requests already being
/// dispatched run to completion.
pub struct Worker<B: Bootstrap> {
    name: String,
    dispatcher: Arc<Dispatcher<B>>,
    task: JoinHandle<()>,
}

impl<B: Bootstrap> Worker<B> {
    /// Spawns the receive loop on the current tokio runtime.
    pub fn spawn(name: impl Into<String>, transport: Box<dyn Transport>, bootstrap: B) -> Self {
        let name = name.into();
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let dispatcher = Arc::new(Dispatcher::new(bootstrap));

        let span = info_span!("worker", worker = %name);
        let task = tokio::spawn(Self::run(transport, dispatcher.clone()).instrument(span));

        Self { name, dispatcher, task }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<B>> {
        &self.dispatcher
    }

    /// Whether the receive loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the receive loop.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits for the receive loop to exit on its own.
    pub async fn join(mut self) {
        let _ = (&mut self.task).await;
    }

    async fn run(transport: Arc<dyn Transport>, dispatcher: Arc<Dispatcher<B>>) {
        info!("worker started");
        loop {
            match transport.recv().await {
                Ok(Some(frame)) => {
                    let transport = transport.clone();
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(
                        async move {
                            let Some(reply) = dispatcher.dispatch(&frame).await else {
                                return;
                            };
                            if let Err(e) = transport.send(&reply).await {
                                debug!(error = %e, "reply not delivered");
                            }
                        }
                        .in_current_span(),
                    );
                }
                Ok(None) => {
                    info!("controller hung up, worker stopping");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "transport failed, worker stopping");
                    break;
                }
            }
        }
    }
}

impl<B: Bootstrap> Drop for Worker<B> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gdrpc::Response;

    use super::*;
    use crate::channel::ChannelTransport;
    use crate::mock::MockBootstrap;

    async fn answer(controller: &ChannelTransport) -> Response {
        let frame = controller.recv().await.unwrap().unwrap();
        Response::decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_worker_answers_and_stops_on_hang_up() {
        let (controller, worker_end) = ChannelTransport::pair();
        let worker = Worker::spawn("w1", Box::new(worker_end), MockBootstrap::new());
        assert_eq!(worker.name(), "w1");

        controller
            .send(br#"{ "type": "initialize_engine", "promise_id": 0, "args": [] }"#)
            .await
            .unwrap();
        let response = answer(&controller).await;
        assert_eq!(response.promise_id, 0);
        assert!(response.success);

        drop(controller);
        worker.join().await;
    }

    #[tokio::test]
    async fn test_slow_bootstrap_does_not_block_other_requests() {
        let (controller, worker_end) = ChannelTransport::pair();
        let bootstrap = MockBootstrap::new().with_delay(Duration::from_millis(200));
        let worker = Worker::spawn("w2", Box::new(worker_end), bootstrap);

        controller
            .send(br#"{ "type": "initialize_engine", "promise_id": 0, "args": [] }"#)
            .await
            .unwrap();
        controller
            .send(br#"{ "type": "get_version", "promise_id": 1, "args": [] }"#)
            .await
            .unwrap();

        // the version request is answered while bootstrap is still running
        let first = answer(&controller).await;
        assert_eq!(first.promise_id, 1);
        assert!(!first.success);

        let second = answer(&controller).await;
        assert_eq!(second.promise_id, 0);
        assert!(second.success);
        assert!(!worker.is_finished());

        worker.abort();
    }
}
