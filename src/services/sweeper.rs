use crate::config::RelayConfig;
use crate::services::staging::{StagingStore, SweepReport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

pub struct StagingSweeper {
    staging: Arc<StagingStore>,
    interval: Duration,
    max_age: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StagingSweeper {
    pub fn new(
        staging: Arc<StagingStore>,
        interval: Duration,
        max_age: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            staging,
            interval,
            max_age,
            shutdown,
        }
    }

    pub fn from_config(
        staging: Arc<StagingStore>,
        config: &RelayConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::new(staging, config.sweep_interval, config.staging_ttl, shutdown)
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🚀 Staging sweeper started (every {:?}, ttl {:?})",
            self.interval,
            self.max_age
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One sweep cycle; failures are logged, never surfaced
    pub async fn sweep_once(&self) -> Option<SweepReport> {
        tracing::info!("🧹 Sweeping staged files older than {:?}...", self.max_age);

        match self.staging.sweep(self.max_age).await {
            Ok(report) => {
                tracing::info!(
                    "✅ Sweep completed: scanned={}, removed={}, failed={}",
                    report.scanned,
                    report.removed,
                    report.failed
                );
                Some(report)
            }
            Err(e) => {
                tracing::error!("❌ Sweep failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    async fn stage(staging: &StagingStore, name: &str) -> std::path::PathBuf {
        staging
            .accept(name, Some("application/pdf"), &b"%PDF-1.4"[..])
            .await
            .unwrap()
            .path
    }

    fn backdate(path: &std::path::Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn test_sweep_once_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = Arc::new(StagingStore::new(tmp.path(), 1024));
        let stale = stage(&staging, "stale.pdf").await;
        backdate(&stale, Duration::from_secs(31 * 60));
        let fresh = stage(&staging, "fresh.pdf").await;

        let (_tx, rx) = watch::channel(false);
        let sweeper = StagingSweeper::new(
            staging.clone(),
            Duration::from_secs(30 * 60),
            Duration::from_secs(30 * 60),
            rx,
        );

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_sweep_once_survives_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = Arc::new(StagingStore::new(tmp.path().join("gone"), 1024));
        let (_tx, rx) = watch::channel(false);
        let sweeper = StagingSweeper::new(staging, Duration::from_secs(1), Duration::from_secs(1), rx);

        assert!(sweeper.sweep_once().await.is_none());
    }

    #[tokio::test]
    async fn test_run_sweeps_on_interval_and_stops_on_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = Arc::new(StagingStore::new(tmp.path(), 1024));
        let stale = stage(&staging, "stale.pdf").await;
        backdate(&stale, Duration::from_secs(3600));

        let (tx, rx) = watch::channel(false);
        let sweeper = StagingSweeper::new(
            staging.clone(),
            Duration::from_millis(20),
            Duration::from_secs(30 * 60),
            rx,
        );
        let handle = tokio::spawn(sweeper.run());

        for _ in 0..100 {
            if !stale.exists() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(!stale.exists());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
