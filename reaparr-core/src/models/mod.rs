pub mod episode;
pub mod library;
pub mod lifecycle;
pub mod protection;
pub mod settings;
pub mod user;
pub mod velocity;
pub mod watch;
pub mod watchlist;

pub use episode::EpisodeStats;
pub use library::{ExternalIds, LibraryItem, MediaType};
pub use lifecycle::{LifecycleRecord, LifecycleStatus};
pub use protection::{ExclusionKind, ProtectionExclusion};
pub use settings::{LifecycleSettings, VelocityChangeAction};
pub use user::MediaUser;
pub use velocity::{resolve_show_key, Position, ShowKey, UserVelocity, VelocitySnapshot};
pub use watch::WatchEvent;
pub use watchlist::{MediaRequest, RequestStatus, WatchlistEntry};
