pub mod fetcher;
pub mod harvester;
pub mod orchestrator;
pub mod pagination;
pub mod progress;
pub mod resources;
pub mod scheduler;


pub use fetcher::{FeedFetcher, FetchTargets};
pub use harvester::{Harvest, LikeHarvester};
pub use orchestrator::{FailureReason, SyncOrchestrator, SyncOutcome, SyncReport};
pub use progress::{
    NoopObserver, ProgressEvent, ProgressObserver, ProgressReporter, SyncStage, TracingObserver,
};
pub use resources::{MemoryProbe, ProcessMemoryProbe, ResourceGovernor};
pub use scheduler::BackgroundService;
