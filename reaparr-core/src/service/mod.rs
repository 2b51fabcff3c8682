pub mod analyzer;
pub mod decision;
pub mod matching;
pub mod movies;
pub mod orchestrator;
pub mod queue;
pub mod redownload;
pub mod sync;
pub mod velocity;

pub use analyzer::{AnalyzerRunSummary, AnalyzerService, SnapshotLoader};
pub use decision::{
    buffer_zone, days_until_needed, decide_episode, grace_protection, redownload_need,
    BufferSource, BufferZone, EpisodeState, EpisodeVerdict, GraceEntry, GraceInput, ShowSnapshot,
    ViewerState,
};
pub use matching::{normalize_title, resolve_tmdb_id, TitleCandidate};
pub use movies::{movie_deletion_reason, MovieCleanupService, MovieCleanupSummary};
pub use orchestrator::{JobGroup, JobOutcome, JobStatus, Orchestrator, StatusFlags, StatusReport};
pub use queue::{EpisodeFetchRequest, RedownloadQueue};
pub use redownload::{QueueProcessSummary, RedownloadRunSummary, RedownloadService, SeriesIndex};
pub use sync::{DeltaSynchronizer, SyncOutcome, SyncSummary};
pub use velocity::{VelocityCleanupSummary, VelocityMonitorSummary, VelocityService};
