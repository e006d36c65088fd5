//! Process memory sampler (C1): polls the current process's RSS on a fixed
//! interval while an upload/analysis is in flight and reports the observed
//! peak in the final `complete` event (§4.1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tokio::task::JoinHandle;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// A running sampler. Dropping the handle without calling [`stop`] leaks the
/// background task until the process exits; callers should always stop it,
/// including on error paths.
pub struct MemorySampler {
    peak_bytes: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl MemorySampler {
    /// Spawn a background task that samples this process's RSS every 100ms
    /// and keeps a running maximum.
    pub fn start() -> Self {
        let peak_bytes = Arc::new(AtomicU64::new(0));
        let pid = Pid::from_u32(std::process::id());

        let handle = {
            let peak_bytes = Arc::clone(&peak_bytes);
            tokio::spawn(async move {
                let refresh = RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing().with_memory());
                let mut system = System::new_with_specifics(refresh);
                loop {
                    system.refresh_processes_specifics(
                        sysinfo::ProcessesToUpdate::Some(&[pid]),
                        true,
                        ProcessRefreshKind::nothing().with_memory(),
                    );
                    if let Some(process) = system.process(pid) {
                        let rss = process.memory();
                        peak_bytes.fetch_max(rss, Ordering::Relaxed);
                    }
                    tokio::time::sleep(SAMPLE_INTERVAL).await;
                }
            })
        };

        Self { peak_bytes, handle }
    }

    /// Current observed peak, in megabytes (1 MB = 1_048_576 bytes),
    /// monotonically non-decreasing for the lifetime of the sampler.
    pub fn peak_mb(&self) -> f64 {
        self.peak_bytes.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0)
    }

    /// Stop sampling and return the final peak, in megabytes.
    pub fn stop(self) -> f64 {
        self.handle.abort();
        self.peak_mb()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn peak_is_non_negative_and_non_decreasing_over_time() {
        let sampler = MemorySampler::start();
        let first = sampler.peak_mb();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = sampler.peak_mb();
        assert!(first >= 0.0);
        assert!(second >= first);
        let final_peak = sampler.stop();
        assert!(final_peak >= second);
    }
}
