// THEORY:
// The orchestrator hands work units to a pool of worker ranks and collects their
// results, "first idle, first served". Rank 0 runs the `Orchestrator`; every other
// rank runs `run_as_worker`. They only ever exchange tagged messages through their
// `Endpoint`s, so the same protocol works whether the ranks are tasks or processes.
//
// Key architectural principles:
// 1.  **One Unit In Flight Per Worker**: A worker receives its next unit only after
//     it reported the previous one, which keeps every worker busy without queueing
//     work behind a slow peer.
// 2.  **Explicit Shutdown**: `Stop` is its own message variant, never a sentinel
//     value, and every worker receives exactly one, including workers that never
//     got any work. `orchestrate` returns only after all of them were sent.
// 3.  **Fail Fast**: A failing handler ends its worker and is reported back, and the
//     orchestrator stops the remaining workers and aborts the run. There are no
//     retries and no partial results.

use crate::error::{BoxError, Error, Result};
use crate::transport::{Cluster, Endpoint, ORCHESTRATOR_RANK, Rank, Tag};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    /// Units are still being handed out.
    Dispatching,
    /// Every unit was handed out; waiting for the last results.
    Draining,
    Stopped,
}

/// Messages sent to a worker, tagged WORK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkMessage<U> {
    Work(U),
    Stop,
}

/// Messages sent back to the orchestrator, tagged DONE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DoneMessage<R> {
    Done(R),
    Failed(String),
}

/// A handler result together with the rank that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkResult<R> {
    pub rank: Rank,
    pub value: R,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub rank: Rank,
    pub units_processed: usize,
}

/// Per-run bookkeeping, indexed by rank.
struct Roster {
    /// The rank holds a unit it has not reported yet.
    active: Vec<bool>,
    /// The rank received at least one unit.
    used: Vec<bool>,
    stopped: Vec<bool>,
    active_workers: usize,
}

impl Roster {
    fn new(size: usize) -> Self {
        Self {
            active: vec![false; size],
            used: vec![false; size],
            stopped: vec![false; size],
            active_workers: 0,
        }
    }
}

pub struct Orchestrator {
    endpoint: Endpoint,
    state: OrchestratorState,
}

impl Orchestrator {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        if endpoint.rank() != ORCHESTRATOR_RANK {
            return Err(Error::Configuration(format!(
                "the orchestrator must run on rank {ORCHESTRATOR_RANK}, got rank {}",
                endpoint.rank()
            )));
        }
        Ok(Self {
            endpoint,
            state: OrchestratorState::Idle,
        })
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn num_workers(&self) -> usize {
        self.endpoint.size() - 1
    }

    /// Runs every unit on some worker and stops all workers. Results arrive in
    /// completion order.
    pub async fn orchestrate<U, R, I>(&mut self, work_units: I) -> Result<Vec<WorkResult<R>>>
    where
        U: Serialize,
        R: DeserializeOwned,
        I: IntoIterator<Item = U>,
    {
        let mut roster = Roster::new(self.endpoint.size());
        let mut results = Vec::new();
        let outcome = self.dispatch(work_units, &mut roster, &mut results).await;

        // Every rank gets its STOP, whatever happened above.
        for rank in 1..self.endpoint.size() {
            if !roster.stopped[rank] {
                if let Err(err) = self.send_stop(rank, &mut roster) {
                    warn!("Could not stop rank {rank}: {err}");
                }
            }
        }
        self.state = OrchestratorState::Stopped;

        outcome.map(|()| {
            info!(
                "Orchestrated {} unit(s) over {} worker(s)",
                results.len(),
                self.num_workers()
            );
            results
        })
    }

    async fn dispatch<U, R, I>(
        &mut self,
        work_units: I,
        roster: &mut Roster,
        results: &mut Vec<WorkResult<R>>,
    ) -> Result<()>
    where
        U: Serialize,
        R: DeserializeOwned,
        I: IntoIterator<Item = U>,
    {
        let mut units = work_units.into_iter();
        self.state = OrchestratorState::Dispatching;

        for rank in 1..self.endpoint.size() {
            match units.next() {
                Some(unit) => self.send_work(rank, unit, roster)?,
                None => {
                    self.state = OrchestratorState::Draining;
                    break;
                }
            }
        }

        while roster.active_workers > 0 {
            let (rank, message): (Rank, DoneMessage<R>) =
                self.endpoint.recv_message(Tag::Done).await?;
            if !roster.active.get(rank).copied().unwrap_or(false) {
                return Err(Error::Transport(format!(
                    "rank {rank} reported a result it was never asked for"
                )));
            }
            roster.active[rank] = false;
            roster.active_workers -= 1;

            match message {
                DoneMessage::Done(value) => results.push(WorkResult { rank, value }),
                DoneMessage::Failed(reason) => {
                    // The failed worker has already left its loop.
                    roster.stopped[rank] = true;
                    warn!("Rank {rank} failed, aborting the run: {reason}");
                    return Err(Error::WorkerFailure {
                        rank,
                        source: BoxError::from(reason),
                    });
                }
            }

            match units.next() {
                Some(unit) => self.send_work(rank, unit, roster)?,
                None => {
                    self.state = OrchestratorState::Draining;
                    self.send_stop(rank, roster)?;
                }
            }
        }
        Ok(())
    }

    fn send_work<U: Serialize>(&self, rank: Rank, unit: U, roster: &mut Roster) -> Result<()> {
        debug_assert!(!roster.active[rank], "rank {rank} already holds a unit");
        self.endpoint
            .send_message(rank, Tag::Work, &WorkMessage::Work(unit))?;
        roster.active[rank] = true;
        roster.used[rank] = true;
        roster.active_workers += 1;
        Ok(())
    }

    fn send_stop(&self, rank: Rank, roster: &mut Roster) -> Result<()> {
        roster.stopped[rank] = true;
        if !roster.used[rank] {
            debug!("Rank {rank} never received work");
        }
        self.endpoint
            .send_message(rank, Tag::Work, &WorkMessage::<()>::Stop)
    }
}

/// Worker loop: handle WORK messages until STOP arrives. A handler error or an
/// undecodable unit is reported to the orchestrator and ends the loop.
pub async fn run_as_worker<U, R, E, H>(mut endpoint: Endpoint, handler: Arc<H>) -> Result<WorkerSummary>
where
    U: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    H: Fn(U, Rank) -> std::result::Result<R, E> + Send + Sync + 'static,
{
    let rank = endpoint.rank();
    let mut units_processed = 0;

    loop {
        let envelope = endpoint.recv(Tag::Work).await?;
        // An undecodable unit is reported like a handler failure.
        let outcome: std::result::Result<R, BoxError> =
            match serde_json::from_slice::<WorkMessage<U>>(&envelope.payload) {
                Ok(WorkMessage::Stop) => break,
                Ok(WorkMessage::Work(unit)) => {
                    let task_handler = Arc::clone(&handler);
                    match tokio::task::spawn_blocking(move || task_handler(unit, rank)).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(err)) => Err(Box::new(err)),
                        Err(join_err) => Err(Box::new(join_err)),
                    }
                }
                Err(err) => {
                    warn!("Rank {rank} received an undecodable work unit: {err}");
                    Err(Box::new(err))
                }
            };

        match outcome {
            Ok(value) => {
                endpoint.send_message(ORCHESTRATOR_RANK, Tag::Done, &DoneMessage::Done(value))?;
                units_processed += 1;
            }
            Err(source) => {
                let report = DoneMessage::<R>::Failed(source.to_string());
                if let Err(err) = endpoint.send_message(ORCHESTRATOR_RANK, Tag::Done, &report) {
                    warn!("Rank {rank} could not report its failure: {err}");
                }
                return Err(Error::WorkerFailure { rank, source });
            }
        }
    }

    debug!("Rank {rank} stopped after {units_processed} unit(s)");
    Ok(WorkerSummary {
        rank,
        units_processed,
    })
}

/// Runs `handler` over `work_units` on `num_processes - 1` in-process workers.
/// When a worker fails, its own error is returned.
pub async fn run_local<U, R, E, H, I>(
    num_processes: usize,
    work_units: I,
    handler: H,
) -> Result<Vec<WorkResult<R>>>
where
    U: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    H: Fn(U, Rank) -> std::result::Result<R, E> + Send + Sync + 'static,
    I: IntoIterator<Item = U>,
{
    let mut endpoints = Cluster::local(num_processes)?.into_iter();
    let orchestrator_endpoint = endpoints
        .next()
        .ok_or_else(|| Error::Configuration("cluster has no orchestrator rank".into()))?;

    let handler = Arc::new(handler);
    let workers: Vec<JoinHandle<Result<WorkerSummary>>> = endpoints
        .map(|endpoint| tokio::spawn(run_as_worker(endpoint, Arc::clone(&handler))))
        .collect();

    let mut orchestrator = Orchestrator::new(orchestrator_endpoint)?;
    let outcome = orchestrator.orchestrate(work_units).await;

    let mut worker_error = None;
    for (index, joined) in futures::future::join_all(workers).await.into_iter().enumerate() {
        match joined {
            Ok(Ok(summary)) => debug!(
                "Worker {} finished with {} unit(s)",
                summary.rank, summary.units_processed
            ),
            Ok(Err(err)) => {
                worker_error.get_or_insert(err);
            }
            Err(join_err) => {
                worker_error.get_or_insert(Error::WorkerFailure {
                    rank: index + 1,
                    source: Box::new(join_err),
                });
            }
        }
    }

    match worker_error {
        Some(err) => Err(err),
        None => outcome,
    }
}
