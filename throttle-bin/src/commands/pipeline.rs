use std::sync::Arc;

use anyhow::Result;
use log::debug;
use throttle_lib::{CancelSignal, Pipeline};

use super::{Completion, Job};

/// Feed request indices through a bounded queue into a fixed pool of
/// consumers.
///
/// The producer waits whenever `capacity` indices are queued. Once every index
/// was submitted the queue is closed, so the consumers drain what is left and
/// exit.
pub(crate) async fn pipeline(
    job: Arc<Job>,
    total: usize,
    capacity: usize,
    consumers: usize,
    signal: &CancelSignal,
) -> Result<Completion> {
    let pipeline = Pipeline::new(capacity, consumers)?;

    let workers = pipeline.spawn_consumers(
        {
            let job = Arc::clone(&job);
            move |index, signal| {
                let job = Arc::clone(&job);
                async move {
                    // Outcomes are accounted for by the job itself
                    let _ = job.run(index, &signal).await;
                }
            }
        },
        signal,
    );

    for index in 0..total {
        if let Err(e) = pipeline.submit(index, signal).await {
            debug!("Stopped submitting at request {index}: {e}");
            break;
        }
    }
    pipeline.close();

    for report in workers.join().await {
        debug!(
            "Consumer {} handled {} requests{}",
            report.worker,
            report.processed,
            if report.canceled { " before it was canceled" } else { "" }
        );
    }

    Ok(job.completion(total))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use test_utils::delayed_mock_server;
    use throttle_lib::{CancelSignal, ClientBuilder};

    use super::pipeline;
    use crate::commands::{Completion, Job};

    fn job(template: String) -> Arc<Job> {
        Arc::new(Job::new(ClientBuilder::default().client().unwrap(), template))
    }

    #[tokio::test]
    async fn test_pipeline_processes_everything() {
        let server = delayed_mock_server!(StatusCode::OK, Duration::from_millis(10));
        let job = job(format!("{}/{{i}}", server.uri()));

        let completion = pipeline(Arc::clone(&job), 25, 2, 4, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(completion, Completion::Finished);
        let tally = job.tally.snapshot();
        assert_eq!(tally.succeeded, 25);
        assert!(tally.max_in_flight <= 4, "{tally:?}");
    }

    #[tokio::test]
    async fn test_pipeline_deadline_cancels_run() {
        let server = delayed_mock_server!(StatusCode::OK, Duration::from_secs(10));
        let job = job(server.uri());
        let signal = CancelSignal::with_deadline(Duration::from_millis(100));

        let completion = pipeline(Arc::clone(&job), 50, 3, 2, &signal)
            .await
            .unwrap();

        assert_eq!(completion, Completion::Canceled);
        assert_eq!(job.tally.snapshot().completed(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_cancel_after_last_request_is_finished() {
        let job = job("http://localhost/{i}".to_string());
        let signal = CancelSignal::new();
        signal.fire();

        // Consumers see the fired signal before the end of the stream,
        // but no request was left without an outcome
        let completion = pipeline(job, 0, 1, 2, &signal).await.unwrap();
        assert_eq!(completion, Completion::Finished);
    }

    #[tokio::test]
    async fn test_pipeline_rejects_zero_capacity() {
        let job = job("http://localhost/{i}".to_string());
        assert!(pipeline(job, 1, 0, 1, &CancelSignal::new()).await.is_err());
    }
}
