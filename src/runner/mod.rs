//! Bounded worker pool dispatching one pipeline per target function.
//!
//! Workers share a single job receiver. Cancellation stops dispatch at once;
//! workers finish their in-flight pipeline, which checks the flag between
//! stages, and jobs still queued are reported as not dispatched.

use crate::output::OutputWriter;
use crate::pipeline::model::FunctionInfo;
use crate::pipeline::{process_function, FunctionOutcome, FunctionStatus, PipelineEnv};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};

/// Run-level cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            tracing::info!("Cancellation requested, finishing in-flight functions");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
pub struct Progress {
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    pub failed: AtomicUsize,
}

/// Everything a run produced, in catalogue order.
#[derive(Debug, Default)]
pub struct RunResults {
    pub outcomes: Vec<FunctionOutcome>,
    /// Targets never handed to a worker because the run was cancelled.
    pub not_dispatched: Vec<FunctionInfo>,
}

pub struct Runner {
    env: PipelineEnv,
    writer: Arc<OutputWriter>,
    workers: usize,
    progress: Arc<Progress>,
}

impl Runner {
    pub fn new(env: PipelineEnv, writer: Arc<OutputWriter>, workers: usize) -> Self {
        Self {
            env,
            writer,
            workers: workers.max(1),
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub async fn run(&self, targets: Vec<FunctionInfo>) -> RunResults {
        let total = targets.len();
        let (tx, rx) = mpsc::channel::<FunctionInfo>(self.workers);
        let rx = Arc::new(TokioMutex::new(rx));

        let mut worker_handles = Vec::new();
        for id in 0..self.workers.min(total.max(1)) {
            let worker_rx = Arc::clone(&rx);
            let env = self.env.clone();
            let writer = Arc::clone(&self.writer);
            let progress = Arc::clone(&self.progress);

            let handle = tokio::spawn(async move {
                pipeline_worker(id, worker_rx, env, writer, progress, total).await
            });
            worker_handles.push(handle);
        }

        let cancel = &self.env.cancel;
        let mut not_dispatched = Vec::new();
        let mut pending = targets.into_iter();
        for function in pending.by_ref() {
            if cancel.is_cancelled() {
                not_dispatched.push(function);
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    not_dispatched.push(function);
                    break;
                }
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit.send(function),
                    Err(_) => {
                        not_dispatched.push(function);
                        break;
                    }
                },
            }
        }
        not_dispatched.extend(pending);
        drop(tx);

        let mut outcomes = Vec::new();
        for handle in worker_handles {
            match handle.await {
                Ok(done) => outcomes.extend(done),
                Err(e) => tracing::warn!("Pipeline worker failed: {}", e),
            }
        }

        // Jobs queued when the workers stopped.
        {
            let mut rx = rx.lock().await;
            while let Ok(function) = rx.try_recv() {
                not_dispatched.push(function);
            }
        }

        let catalog = &self.env.catalog;
        outcomes.sort_by_key(|o| catalog.position(&o.function.path));
        not_dispatched.sort_by_key(|f| catalog.position(&f.path));
        if !not_dispatched.is_empty() {
            tracing::info!("{} function(s) were not dispatched", not_dispatched.len());
        }

        RunResults {
            outcomes,
            not_dispatched,
        }
    }
}

/// Pulls functions off the shared queue until it closes or the run is cancelled.
async fn pipeline_worker(
    id: usize,
    receiver: Arc<TokioMutex<mpsc::Receiver<FunctionInfo>>>,
    env: PipelineEnv,
    writer: Arc<OutputWriter>,
    progress: Arc<Progress>,
    total: usize,
) -> Vec<FunctionOutcome> {
    let mut done = Vec::new();
    loop {
        if env.cancel.is_cancelled() {
            break;
        }

        let function = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                _ = env.cancel.cancelled() => break,
                function = rx.recv() => function,
            }
        };
        let Some(function) = function else {
            break;
        };

        let started = progress.started.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Worker {} picked up {} ({}/{})", id, function.path, started, total);

        let mut outcome = process_function(&function, &env).await;

        match writer.write_outcome(&outcome) {
            Ok(path) => outcome.output = path,
            Err(e) => {
                tracing::warn!(function = %function.path, "Failed to write artifact: {:#}", e)
            }
        }

        if outcome.degraded() {
            let stages: Vec<String> = outcome
                .notes
                .iter()
                .filter(|n| n.is_degradation())
                .map(|n| n.to_string())
                .collect();
            tracing::info!(
                function = %function.path,
                "Context degraded: {}",
                stages.join("; ")
            );
        }

        let finished = progress.finished.fetch_add(1, Ordering::SeqCst) + 1;
        match outcome.status {
            FunctionStatus::Final => tracing::info!(
                function = %function.path,
                "[{}/{}] FINAL at version {}",
                finished,
                total,
                outcome.artifact.as_ref().map_or(0, |a| a.version)
            ),
            FunctionStatus::Failed => {
                progress.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    function = %function.path,
                    "[{}/{}] FAILED: {}",
                    finished,
                    total,
                    outcome
                        .reason()
                        .map_or_else(|| "unknown".to_string(), |r| r.to_string())
                );
            }
            FunctionStatus::Cancelled => {
                tracing::info!(function = %function.path, "[{}/{}] cancelled", finished, total)
            }
        }
        done.push(outcome);
    }
    done
}
