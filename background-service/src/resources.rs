use mindfeed_core::{CoreError, PressurePolicy, SyncConfig};
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Resident memory of the current process.
pub trait MemoryProbe: Send + Sync {
    fn resident_mb(&self) -> Option<u64>;
}

pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_mb(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        system.process(pid).map(|p| p.memory() / BYTES_PER_MB)
    }
}

/// Sleeps for `duration` unless cancelled first.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), CoreError> {
    if duration.is_zero() {
        return if cancel.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Memory and load discipline shared by every stage of a run.
pub struct ResourceGovernor {
    probe: Box<dyn MemoryProbe>,
    threshold_mb: u64,
    policy: PressurePolicy,
    pressure_cooldown: Duration,
    cooldown: Duration,
    check_interval: usize,
}

impl ResourceGovernor {
    pub fn new(probe: Box<dyn MemoryProbe>, config: &SyncConfig) -> Self {
        Self {
            probe,
            threshold_mb: config.memory_threshold_mb,
            policy: config.pressure_policy,
            pressure_cooldown: Duration::from_secs(config.pressure_cooldown_secs),
            cooldown: Duration::from_millis(config.cooldown_ms),
            check_interval: config.memory_check_interval.max(1),
        }
    }

    pub fn under_pressure(&self) -> bool {
        match self.probe.resident_mb() {
            Some(used) if used > self.threshold_mb => {
                warn!(
                    "Memory usage {} MB above threshold {} MB",
                    used, self.threshold_mb
                );
                true
            }
            _ => false,
        }
    }

    /// Applies the pressure policy when memory is high. Resumes at the same point afterwards.
    pub async fn relieve(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        if !self.under_pressure() {
            return Ok(());
        }
        match self.policy {
            PressurePolicy::Continue => {
                tokio::task::yield_now().await;
                Ok(())
            }
            PressurePolicy::Suspend => {
                warn!("Suspending for {:?} to relieve memory pressure", self.pressure_cooldown);
                pause(self.pressure_cooldown, cancel).await
            }
        }
    }

    /// Periodic check: every `memory_check_interval` batches.
    pub async fn checkpoint(&self, batch_index: usize, cancel: &CancellationToken) -> Result<(), CoreError> {
        if batch_index % self.check_interval == 0 {
            debug!("Memory checkpoint at batch {}", batch_index);
            self.relieve(cancel).await?;
        }
        Ok(())
    }

    /// Fixed delay between pages and batches.
    pub async fn cooldown(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        pause(self.cooldown, cancel).await
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::MemoryProbe;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Reports whatever the test last stored.
    #[derive(Clone, Default)]
    pub struct FixedProbe(pub Arc<AtomicU64>);

    impl FixedProbe {
        pub fn new(mb: u64) -> Self {
            Self(Arc::new(AtomicU64::new(mb)))
        }

        pub fn set(&self, mb: u64) {
            self.0.store(mb, Ordering::SeqCst);
        }
    }

    impl MemoryProbe for FixedProbe {
        fn resident_mb(&self) -> Option<u64> {
            Some(self.0.load(Ordering::SeqCst))
        }
    }
}
