use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStage {
    Starting,
    Connecting,
    FetchingTimeline,
    FetchingDiscovery,
    PullingLikes,
    ProcessingPosts,
    UpdatingStore,
    Complete,
    Failed,
}

impl SyncStage {
    pub fn display_name(&self) -> &'static str {
        match self {
            SyncStage::Starting => "Starting sync...",
            SyncStage::Connecting => "Connecting...",
            SyncStage::FetchingTimeline => "Fetching timeline feed...",
            SyncStage::FetchingDiscovery => "Fetching discovery feed...",
            SyncStage::PullingLikes => "Syncing your likes...",
            SyncStage::ProcessingPosts => "Processing posts...",
            SyncStage::UpdatingStore => "Finalizing and updating database...",
            SyncStage::Complete => "Sync complete.",
            SyncStage::Failed => "Sync failed.",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStage::Complete | SyncStage::Failed)
    }
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: SyncStage,
    /// 0..=100
    pub percent: u8,
    pub indeterminate: bool,
}

impl ProgressEvent {
    pub fn new(stage: SyncStage, percent: u8, indeterminate: bool) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            indeterminate,
        }
    }
}

/// Receives progress from a running sync. Rendering is up to the host.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl ProgressObserver for mpsc::UnboundedSender<ProgressEvent> {
    fn on_progress(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is watching
        let _ = self.send(event);
    }
}

/// Logs stage transitions at info and in-stage updates at debug.
#[derive(Debug, Default)]
pub struct TracingObserver {
    last_stage: Mutex<Option<SyncStage>>,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, event: ProgressEvent) {
        let changed = match self.last_stage.lock() {
            Ok(mut last) => last.replace(event.stage) != Some(event.stage),
            Err(_) => true,
        };

        if changed {
            info!("{}", event.stage);
        } else if event.indeterminate {
            debug!("{}", event.stage);
        } else {
            debug!("{} ({}%)", event.stage, event.percent);
        }
    }
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Integer percentage of `done` out of `total`, capped at 100. An empty total is complete.
pub fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.saturating_mul(100)) / total).min(100) as u8
}

/// Throttles in-stage updates to one per `interval` per stage; `enter` always goes through.
///
/// Stages that run side by side (fetching and pulling likes) share one reporter, so
/// the window is tracked per stage rather than for the last stage seen.
pub struct ProgressReporter<'a> {
    observer: &'a dyn ProgressObserver,
    interval: Duration,
    last_emit: Mutex<HashMap<SyncStage, Instant>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(observer: &'a dyn ProgressObserver, interval: Duration) -> Self {
        Self {
            observer,
            interval,
            last_emit: Mutex::new(HashMap::new()),
        }
    }

    /// Unthrottled. Use for stage boundaries.
    pub fn enter(&self, stage: SyncStage, percent: u8, indeterminate: bool) {
        if let Ok(mut last_emit) = self.last_emit.lock() {
            last_emit.insert(stage, Instant::now());
        }
        self.observer
            .on_progress(ProgressEvent::new(stage, percent, indeterminate));
    }

    /// Throttled within a stage.
    pub fn report(&self, stage: SyncStage, percent: u8) {
        let should_emit = match self.last_emit.lock() {
            Ok(mut last_emit) => {
                let now = Instant::now();
                let due = last_emit
                    .get(&stage)
                    .map_or(true, |at| now.duration_since(*at) >= self.interval);
                if due {
                    last_emit.insert(stage, now);
                }
                due
            }
            Err(_) => true,
        };

        if should_emit {
            self.observer
                .on_progress(ProgressEvent::new(stage, percent, false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 10), 0);
        assert_eq!(percent_of(5, 10), 50);
        assert_eq!(percent_of(30, 10), 100);
        assert_eq!(percent_of(0, 0), 100);
    }

    #[test]
    fn test_event_percent_is_clamped() {
        assert_eq!(ProgressEvent::new(SyncStage::Starting, 250, false).percent, 100);
    }

    #[test]
    fn test_in_stage_reports_are_throttled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(&tx, Duration::from_secs(3600));

        reporter.enter(SyncStage::ProcessingPosts, 0, false);
        for percent in 1..50 {
            reporter.report(SyncStage::ProcessingPosts, percent);
        }
        reporter.report(SyncStage::UpdatingStore, 0);
        reporter.enter(SyncStage::Complete, 100, false);

        let events = collect(&mut rx);
        let stages: Vec<_> = events.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                SyncStage::ProcessingPosts,
                SyncStage::UpdatingStore,
                SyncStage::Complete
            ]
        );
    }

    #[test]
    fn test_interleaved_stages_are_each_throttled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(&tx, Duration::from_secs(3600));

        reporter.enter(SyncStage::FetchingTimeline, 0, false);
        reporter.enter(SyncStage::PullingLikes, 0, false);
        for percent in 1..=50 {
            reporter.report(SyncStage::FetchingTimeline, percent);
            reporter.report(SyncStage::PullingLikes, percent);
        }
        reporter.enter(SyncStage::PullingLikes, 100, false);

        let events = collect(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.percent == 0 || e.percent == 100));
    }

    #[test]
    fn test_first_report_of_unentered_stage_goes_through() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(&tx, Duration::from_secs(3600));
        reporter.report(SyncStage::FetchingDiscovery, 10);
        reporter.report(SyncStage::FetchingDiscovery, 20);
        assert_eq!(collect(&mut rx).len(), 1);
    }

    #[test]
    fn test_zero_interval_passes_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(&tx, Duration::ZERO);
        for percent in [10, 20, 30] {
            reporter.report(SyncStage::PullingLikes, percent);
        }
        assert_eq!(collect(&mut rx).len(), 3);
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel::<ProgressEvent>();
        drop(rx);
        tx.on_progress(ProgressEvent::new(SyncStage::Failed, 0, false));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(SyncStage::PullingLikes.to_string(), "Syncing your likes...");
        assert!(SyncStage::Failed.is_terminal());
        assert!(!SyncStage::Connecting.is_terminal());
    }
}
