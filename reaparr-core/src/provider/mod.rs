// Adapters over the external media server and downloader services.
//
// Each adapter is a trait describing a capability set; backends are thin
// reqwest clients with DTOs per endpoint and tolerant decoding. Adapters
// hold no state beyond their HTTP client and credentials.

pub mod error;
pub mod http;
pub mod jellyfin;
pub mod plex;
pub mod radarr;
pub mod sonarr;
pub mod traits;

pub use error::{ProviderError, Result};
pub use jellyfin::JellyfinServer;
pub use plex::PlexServer;
pub use radarr::RadarrClient;
pub use sonarr::SonarrClient;
pub use traits::{
    HistoryEvent, MediaServer, MovieDownloader, RemoteLibrary, RemoteMovie, RemoteSeries,
    RemoteSeriesEpisode, RemoteUser, TvDownloader,
};

#[cfg(test)]
pub use traits::{MockMediaServer, MockMovieDownloader, MockTvDownloader};
