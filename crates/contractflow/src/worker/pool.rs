use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::Pipeline;
use crate::worker::job::{JobInput, ProcessingResult};

/// Runs many jobs concurrently, one task per worker. Stages within a job
/// stay sequential. Shutdown cancels in-flight jobs through a shared token.
pub struct WorkerPool {
    job_sender: mpsc::Sender<JobInput>,
    result_receiver: mpsc::UnboundedReceiver<ProcessingResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Starts `worker_count` workers (at least one) on the current runtime.
    pub fn new(pipeline: Arc<Pipeline>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = mpsc::channel::<JobInput>(worker_count * 2);
        let (result_sender, result_receiver) = mpsc::unbounded_channel();
        let job_receiver = Arc::new(Mutex::new(job_receiver));
        let shutdown = CancellationToken::new();

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&job_receiver),
                    result_sender.clone(),
                    shutdown.clone(),
                    Arc::clone(&pipeline),
                ))
            })
            .collect();

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub async fn submit(&self, input: JobInput) -> Result<(), WorkerError> {
        if self.shutdown.is_cancelled() {
            return Err(WorkerError::ChannelClosed);
        }
        self.job_sender
            .send(input)
            .await
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Next finished job; `None` once every worker has stopped and all
    /// results were taken.
    pub async fn recv_result(&mut self) -> Option<ProcessingResult> {
        self.result_receiver.recv().await
    }

    /// Stops taking jobs and cancels the ones in flight.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled on shutdown, for wiring to signal handlers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Closes the queue, lets workers drain it and waits for them. Results
    /// not yet received are returned.
    pub async fn wait(self) -> Vec<ProcessingResult> {
        let Self {
            job_sender,
            mut result_receiver,
            workers,
            ..
        } = self;
        drop(job_sender);

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let mut remaining = Vec::new();
        while let Ok(result) = result_receiver.try_recv() {
            remaining.push(result);
        }
        info!("All workers have stopped");
        remaining
    }
}

async fn run_worker(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<JobInput>>>,
    results: mpsc::UnboundedSender<ProcessingResult>,
    shutdown: CancellationToken,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let next = {
            let mut receiver = jobs.lock().await;
            tokio::select! {
                job = receiver.recv() => job,
                _ = shutdown.cancelled() => None,
            }
        };
        let Some(input) = next else {
            break;
        };

        debug!("Worker {} processing document {}", worker_id, input.document_id);
        let result = pipeline.process_document(input, &shutdown).await;
        if results.send(result).is_err() {
            error!("Worker {} failed to send result: receiver dropped", worker_id);
            break;
        }
    }

    debug!("Worker {} stopped", worker_id);
}
