pub mod episode_stats;
pub mod library;
pub mod lifecycle;
pub mod protection;
pub mod settings;
pub mod users;
pub mod velocity;
pub mod watch_history;
pub mod watchlist;

pub use episode_stats::EpisodeStatsRepository;
pub use library::LibraryItemRepository;
pub use lifecycle::LifecycleRepository;
pub use protection::ProtectionRepository;
pub use settings::SettingsRepository;
pub use users::MediaUserRepository;
pub use velocity::{UserVelocityRepository, VelocitySnapshotRepository};
pub use watch_history::WatchEventRepository;
pub use watchlist::{MediaRequestRepository, WatchlistRepository};
