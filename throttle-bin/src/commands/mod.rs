pub(crate) mod gate;
pub(crate) mod pipeline;

pub(crate) use gate::gate;
pub(crate) use pipeline::pipeline;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use throttle_lib::{
    CancelSignal, Client, ErrorKind, Fetched, KeyedLocks, Result, SnapshotCache, Tally,
    expand_template,
};

use crate::options::load_targets;
use crate::stats::Latencies;

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Every request ran to completion
    Finished,
    /// The run signal fired before all requests completed
    Canceled,
}

/// Everything a single request needs, shared by all workers of a run
#[derive(Debug)]
pub(crate) struct Job {
    client: Client,
    template: String,
    targets: SnapshotCache<usize, String>,
    host_locks: Option<KeyedLocks<String>>,
    pub(crate) tally: Tally,
    pub(crate) latencies: Latencies,
}

impl Job {
    pub(crate) fn new(client: Client, template: String) -> Self {
        Self {
            client,
            template,
            targets: SnapshotCache::new(),
            host_locks: None,
            tally: Tally::new(),
            latencies: Latencies::new(),
        }
    }

    /// Serialize requests to the same host
    pub(crate) fn per_host(mut self, per_host: bool) -> Self {
        self.host_locks = per_host.then(KeyedLocks::new);
        self
    }

    /// Replace the URL template for some request indices
    pub(crate) fn targets(self, targets: impl IntoIterator<Item = (usize, String)>) -> Self {
        self.targets.refresh(targets.into_iter().collect::<HashMap<_, _>>());
        self
    }

    /// Send request `index` and account for its outcome.
    ///
    /// A canceled request counts neither as success nor as failure.
    pub(crate) async fn run(&self, index: usize, signal: &CancelSignal) -> Result<Fetched> {
        let (result, elapsed) = self.execute(index, signal).await;
        match &result {
            Ok(fetched) => {
                debug!("[{index}] {} in {:?}", fetched.status, elapsed);
                self.tally.record_success();
                self.latencies.record(elapsed);
            }
            Err(ErrorKind::Canceled) => debug!("[{index}] canceled"),
            Err(e) => {
                match e.details() {
                    Some(details) => warn!("[{index}] {e} ({details})"),
                    None => warn!("[{index}] {e}"),
                }
                self.tally.record_failure();
                self.latencies.record(elapsed);
            }
        }
        result
    }

    /// How the run went for `total` requests.
    ///
    /// Only requests without an outcome make a run canceled. A signal firing
    /// after the last request finished does not.
    pub(crate) fn completion(&self, total: usize) -> Completion {
        let total = u64::try_from(total).unwrap_or(u64::MAX);
        if self.tally.snapshot().completed() < total {
            Completion::Canceled
        } else {
            Completion::Finished
        }
    }

    async fn execute(&self, index: usize, signal: &CancelSignal) -> (Result<Fetched>, Duration) {
        let template = self
            .targets
            .get(&index)
            .unwrap_or_else(|| self.template.clone());
        let url = match expand_template(&template, index) {
            Ok(url) => url,
            Err(e) => return (Err(e), Duration::ZERO),
        };

        let _host = match &self.host_locks {
            Some(locks) => {
                let host = url.host_str().unwrap_or_default().to_string();
                match locks.acquire(host, signal).await {
                    Ok(guard) => Some(guard),
                    Err(e) => return (Err(e), Duration::ZERO),
                }
            }
            None => None,
        };

        let _in_flight = self.tally.enter();
        let start = Instant::now();
        let result = self.client.fetch(&url, signal).await;
        (result, start.elapsed())
    }

    /// Re-read `path` every `interval` and swap the result in as the new
    /// targets, until `signal` fires.
    ///
    /// A file which cannot be read keeps the previous targets in place.
    pub(crate) async fn refresh_targets(
        self: Arc<Self>,
        path: PathBuf,
        interval: Duration,
        signal: CancelSignal,
    ) {
        loop {
            tokio::select! {
                () = signal.fired() => return,
                () = tokio::time::sleep(interval) => {}
            }
            let loaded = tokio::task::spawn_blocking({
                let path = path.clone();
                move || load_targets(&path)
            })
            .await;
            match loaded {
                Ok(Ok(targets)) => {
                    let count = targets.len();
                    self.targets.refresh(targets);
                    info!("Reloaded {count} targets from `{}`", path.display());
                }
                Ok(Err(e)) => warn!("Keeping previous targets: {e:#}"),
                Err(e) => warn!("Keeping previous targets, reload task failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use test_utils::{delayed_mock_server, mock_server};
    use throttle_lib::{CancelSignal, ClientBuilder, ErrorKind};

    use super::{Completion, Job};

    fn job(template: String) -> Job {
        Job::new(ClientBuilder::default().client().unwrap(), template)
    }

    #[tokio::test]
    async fn test_run_counts_outcomes() {
        let ok = mock_server!(StatusCode::OK);
        let broken = mock_server!(StatusCode::INTERNAL_SERVER_ERROR);
        let job = job(format!("{}/{{i}}", ok.uri()))
            .targets([(1, format!("{}/broken", broken.uri()))]);
        let signal = CancelSignal::new();

        assert!(job.run(0, &signal).await.is_ok());
        assert_eq!(
            job.run(1, &signal).await.unwrap_err(),
            ErrorKind::RejectedStatusCode(StatusCode::INTERNAL_SERVER_ERROR)
        );

        let tally = job.tally.snapshot();
        assert_eq!((tally.succeeded, tally.failed), (1, 1));
        assert_eq!(tally.max_in_flight, 1);
    }

    #[tokio::test]
    async fn test_canceled_request_is_not_a_failure() {
        let slow = delayed_mock_server!(StatusCode::OK, Duration::from_secs(10));
        let job = job(slow.uri());
        let signal = CancelSignal::with_deadline(Duration::from_millis(50));

        assert_eq!(job.run(0, &signal).await, Err(ErrorKind::Canceled));
        let tally = job.tally.snapshot();
        assert_eq!((tally.succeeded, tally.failed, tally.in_flight), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_completion_ignores_late_cancel() {
        let ok = mock_server!(StatusCode::OK);
        let broken = mock_server!(StatusCode::NOT_FOUND);
        let job = job(ok.uri()).targets([(1, broken.uri())]);
        let signal = CancelSignal::new();

        assert!(job.run(0, &signal).await.is_ok());
        assert!(job.run(1, &signal).await.is_err());
        signal.fire();

        assert_eq!(job.completion(2), Completion::Finished);
        assert_eq!(job.completion(3), Completion::Canceled);
    }

    #[tokio::test]
    async fn test_per_host_serializes_requests() {
        let slow = delayed_mock_server!(StatusCode::OK, Duration::from_millis(50));
        let job = Arc::new(job(format!("{}/{{i}}", slow.uri())).per_host(true));
        let signal = CancelSignal::new();

        let mut tasks = tokio::task::JoinSet::new();
        for index in 0..4 {
            let job = Arc::clone(&job);
            let signal = signal.clone();
            tasks.spawn(async move { job.run(index, &signal).await.map(|_| ()) });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap(), Ok(()));
        }

        assert_eq!(job.tally.snapshot().max_in_flight, 1);
    }

    #[tokio::test]
    async fn test_refresh_targets() {
        let ok = mock_server!(StatusCode::OK);
        let broken = mock_server!(StatusCode::NOT_FOUND);
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), format!("0 = \"{}/gone\"", broken.uri())).unwrap();

        let job = Arc::new(job(ok.uri()));
        let signal = CancelSignal::new();
        let refresher = tokio::spawn(Arc::clone(&job).refresh_targets(
            file.path().to_path_buf(),
            Duration::from_millis(200),
            signal.clone(),
        ));

        assert!(job.run(0, &signal).await.is_ok());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(
            job.run(0, &signal).await.unwrap_err(),
            ErrorKind::RejectedStatusCode(StatusCode::NOT_FOUND)
        );

        signal.fire();
        refresher.await.unwrap();
        assert_eq!(job.targets.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_keeps_targets_of_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let job = Arc::new(job("http://localhost/{i}".to_string()).targets([(
            7,
            "http://localhost/seven".to_string(),
        )]));
        let signal = CancelSignal::new();
        let refresher = tokio::spawn(Arc::clone(&job).refresh_targets(
            dir.path().join("missing.toml"),
            Duration::from_millis(20),
            signal.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        signal.fire();
        refresher.await.unwrap();

        assert_eq!(
            job.targets.get(&7).as_deref(),
            Some("http://localhost/seven")
        );
    }
}
