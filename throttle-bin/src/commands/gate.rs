use std::sync::Arc;

use anyhow::Result;
use log::debug;
use throttle_lib::{CancelSignal, ErrorKind, Gate};
use tokio::task::JoinSet;

use super::{Completion, Job};

/// Spawn one task per request and let a gate of `concurrency` permits decide
/// how many of them run at once.
pub(crate) async fn gate(
    job: Arc<Job>,
    total: usize,
    concurrency: usize,
    signal: &CancelSignal,
) -> Result<Completion> {
    let gate = Gate::new(concurrency)?;

    let mut tasks = JoinSet::new();
    for index in 0..total {
        let gate = gate.clone();
        let job = Arc::clone(&job);
        let signal = signal.clone();
        tasks.spawn(async move {
            gate.run(
                |signal| async move { job.run(index, &signal).await },
                &signal,
            )
            .await
        });
    }

    let mut canceled = 0_usize;
    while let Some(result) = tasks.join_next().await {
        if let Err(ErrorKind::Canceled) = result? {
            canceled += 1;
        }
    }

    if canceled > 0 {
        debug!("{canceled} of {total} requests were canceled");
    }
    Ok(job.completion(total))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use test_utils::{delayed_mock_server, mock_server};
    use throttle_lib::{CancelSignal, ClientBuilder};

    use super::gate;
    use crate::commands::{Completion, Job};

    fn job(template: String) -> Arc<Job> {
        Arc::new(Job::new(ClientBuilder::default().client().unwrap(), template))
    }

    #[tokio::test]
    async fn test_gate_caps_concurrency() {
        let server = delayed_mock_server!(StatusCode::OK, Duration::from_millis(30));
        let job = job(format!("{}/{{i}}", server.uri()));

        let completion = gate(Arc::clone(&job), 20, 3, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(completion, Completion::Finished);
        let tally = job.tally.snapshot();
        assert_eq!(tally.succeeded, 20);
        assert!(tally.max_in_flight <= 3, "{tally:?}");
        assert!(tally.max_in_flight >= 1);
    }

    #[tokio::test]
    async fn test_gate_counts_failures() {
        let server = mock_server!(StatusCode::BAD_GATEWAY);
        let job = job(server.uri());

        let completion = gate(Arc::clone(&job), 5, 2, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(completion, Completion::Finished);
        assert_eq!(job.tally.snapshot().failed, 5);
    }

    #[tokio::test]
    async fn test_gate_deadline_cancels_run() {
        let server = delayed_mock_server!(StatusCode::OK, Duration::from_secs(10));
        let job = job(server.uri());
        let signal = CancelSignal::with_deadline(Duration::from_millis(100));

        let completion = gate(Arc::clone(&job), 10, 2, &signal).await.unwrap();

        assert_eq!(completion, Completion::Canceled);
        let tally = job.tally.snapshot();
        assert_eq!(tally.completed(), 0);
        assert_eq!(tally.max_in_flight, 2);
    }

    #[tokio::test]
    async fn test_gate_rejects_zero_concurrency() {
        let job = job("http://localhost/{i}".to_string());
        assert!(gate(job, 1, 0, &CancelSignal::new()).await.is_err());
    }
}
