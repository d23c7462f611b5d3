mod common;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tilewise::orchestrator::{DoneMessage, WorkMessage};
use tilewise::{
    Cluster, Endpoint, Error, ORCHESTRATOR_RANK, Orchestrator, OrchestratorState, Rank, Region,
    Tag, WorkResult, run_as_worker, run_local,
};

const DEADLINE: Duration = Duration::from_secs(5);

/// Encodes like a `u32`, but 13 cannot be decoded on the worker side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
struct Unlucky(u32);

impl TryFrom<u32> for Unlucky {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, String> {
        if value == 13 {
            Err("13 is refused".into())
        } else {
            Ok(Unlucky(value))
        }
    }
}

impl From<Unlucky> for u32 {
    fn from(unit: Unlucky) -> u32 {
        unit.0
    }
}

/// A hand-written worker that doubles units and records every STOP it sees.
async fn doubling_worker(mut endpoint: Endpoint) -> (Endpoint, usize, usize) {
    let mut processed = 0;
    let mut stops = 0;
    loop {
        let (source, message): (Rank, WorkMessage<u64>) =
            endpoint.recv_message(Tag::Work).await.expect("orchestrator alive");
        assert_eq!(source, ORCHESTRATOR_RANK);
        match message {
            WorkMessage::Work(unit) => {
                processed += 1;
                endpoint
                    .send_message(ORCHESTRATOR_RANK, Tag::Done, &DoneMessage::Done(unit * 2))
                    .expect("orchestrator alive");
            }
            WorkMessage::Stop => {
                stops += 1;
                break;
            }
        }
    }
    (endpoint, processed, stops)
}

#[tokio::test]
async fn three_workers_seven_units() {
    common::init_logging();
    let mut endpoints = Cluster::local(4).unwrap();
    let workers: Vec<_> = endpoints
        .drain(1..)
        .map(|endpoint| tokio::spawn(doubling_worker(endpoint)))
        .collect();

    let mut orchestrator = Orchestrator::new(endpoints.remove(0)).unwrap();
    let results: Vec<WorkResult<u64>> = orchestrator.orchestrate(0u64..7).await.unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);

    let values: BTreeSet<u64> = results.iter().map(|result| result.value).collect();
    assert_eq!(values, (0u64..7).map(|unit| unit * 2).collect());
    assert_eq!(results.len(), 7);

    let mut total = 0;
    for worker in workers {
        let (mut endpoint, processed, stops) = worker.await.unwrap();
        assert_eq!(stops, 1);
        assert!(endpoint.try_recv(Tag::Work).is_none(), "no second STOP");
        assert!(processed >= 1);
        total += processed;
    }
    assert_eq!(total, 7);
}

#[tokio::test]
async fn idle_workers_are_still_stopped() {
    common::init_logging();
    let mut endpoints = Cluster::local(6).unwrap();
    let handler = Arc::new(|unit: u64, _rank: Rank| Ok::<_, std::io::Error>(unit + 1));
    let workers: Vec<_> = endpoints
        .drain(1..)
        .map(|endpoint| tokio::spawn(run_as_worker(endpoint, Arc::clone(&handler))))
        .collect();

    let mut orchestrator = Orchestrator::new(endpoints.remove(0)).unwrap();
    let results: Vec<WorkResult<u64>> = orchestrator.orchestrate(vec![10u64, 20]).await.unwrap();
    let values: BTreeSet<u64> = results.iter().map(|result| result.value).collect();
    assert_eq!(values, BTreeSet::from([11, 21]));

    let mut processed: Vec<usize> = Vec::new();
    for worker in workers {
        processed.push(worker.await.unwrap().unwrap().units_processed);
    }
    processed.sort_unstable();
    assert_eq!(processed, vec![0, 0, 0, 1, 1]);
}

#[tokio::test]
async fn every_unit_runs_exactly_once() {
    common::init_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let results = run_local(4, 0u32..50, move |unit: u32, rank: Rank| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, std::io::Error>((unit, rank))
    })
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 50);
    let units: BTreeSet<u32> = results.iter().map(|result| result.value.0).collect();
    assert_eq!(units.len(), 50);
    for result in &results {
        assert_eq!(result.rank, result.value.1);
        assert!((1..4).contains(&result.rank));
    }
}

#[tokio::test]
async fn a_failing_handler_aborts_the_run() {
    common::init_logging();
    let result = run_local(3, 0u32..20, |unit: u32, _rank: Rank| {
        if unit == 3 {
            Err(std::io::Error::other("unit 3 is poisoned"))
        } else {
            Ok(unit)
        }
    })
    .await;

    match result {
        Err(Error::WorkerFailure { rank, source }) => {
            assert!((1..3).contains(&rank));
            assert!(source.to_string().contains("unit 3 is poisoned"));
            assert!(source.downcast_ref::<std::io::Error>().is_some());
        }
        other => panic!("expected a worker failure, got {other:?}"),
    }
}

#[tokio::test]
async fn an_undecodable_unit_fails_the_run_instead_of_hanging() {
    common::init_logging();
    let units: Vec<Unlucky> = (10..16).map(Unlucky).collect();
    let run = run_local(3, units, |unit: Unlucky, _rank: Rank| Ok::<_, std::io::Error>(unit.0));
    let result = tokio::time::timeout(DEADLINE, run)
        .await
        .expect("the run must finish");

    match result {
        Err(Error::WorkerFailure { rank, source }) => {
            assert!((1..3).contains(&rank));
            assert!(source.to_string().contains("13 is refused"));
        }
        other => panic!("expected a worker failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unbounded_regions_travel_as_work_units() {
    common::init_logging();
    let run = run_local(2, vec![Region::all()], |region: Region, _rank: Rank| {
        Ok::<_, std::io::Error>((region.is_defined(), region))
    });
    let results: Vec<WorkResult<(bool, Region)>> = tokio::time::timeout(DEADLINE, run)
        .await
        .expect("the run must finish")
        .unwrap();

    assert_eq!(results.len(), 1);
    let (defined, echoed) = results[0].value;
    assert!(!defined);
    assert_eq!(echoed, Region::all());
}

#[tokio::test]
async fn too_few_processes_is_a_configuration_error() {
    let result = run_local(1, 0u32..3, |unit: u32, _rank: Rank| Ok::<_, std::io::Error>(unit)).await;
    assert!(matches!(result, Err(Error::Configuration(_))));
}
