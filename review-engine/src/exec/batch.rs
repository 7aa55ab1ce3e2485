//! Bounded-concurrency execution of independent async units
//!
//! Both the intent-analysis and expert-execution stages fan out over many
//! independent external calls. This module is the single substrate for that:
//! it schedules every submitted unit under a global in-flight cap, collects
//! one outcome per unit, and never lets a failing unit abort its siblings.

use futures::{stream::FuturesUnordered, Future, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};

use crate::error::EngineError;

/// The result of one submitted unit. Exactly one of value or error,
/// modeled as `Result`; produced for every unit, never silently dropped.
#[derive(Debug)]
pub struct ExecutionOutcome<T> {
    pub unit_key: String,
    pub result: Result<T, EngineError>,
}

/// Run all units with at most `max_concurrency` in flight at once.
///
/// Each unit's operation is invoked at most once; retry, if any, lives
/// inside the operation itself. Results are returned in completion order,
/// keyed, with the same length as the input. A unit still queued or in
/// flight when `deadline` passes resolves to a `TimeoutExceeded` outcome
/// rather than being dropped.
pub async fn run_all<T, Fut>(
    units: Vec<(String, Fut)>,
    max_concurrency: usize,
    deadline: Option<Instant>,
) -> Vec<ExecutionOutcome<T>>
where
    T: Send,
    Fut: Future<Output = Result<T, EngineError>> + Send,
{
    let sem = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = FuturesUnordered::new();

    for (key, op) in units {
        let sem = sem.clone();
        tasks.push(async move {
            let work = async {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|_| EngineError::Transport("executor semaphore closed".into()))?;
                op.await
            };

            let result = match deadline {
                Some(at) => match timeout_at(at, work).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::TimeoutExceeded),
                },
                None => work.await,
            };

            ExecutionOutcome {
                unit_key: key,
                result,
            }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(outcome) = tasks.next().await {
        outcomes.push(outcome);
    }

    outcomes
}
