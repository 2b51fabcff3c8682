//! Service initialization and dependency injection

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::info;

use crate::clock::Clock;
use crate::config::{Config, MediaServerBackend};
use crate::provider::{
    JellyfinServer, MediaServer, MovieDownloader, PlexServer, RadarrClient, SonarrClient,
    TvDownloader,
};
use crate::repository::{
    EpisodeStatsRepository, LibraryItemRepository, LifecycleRepository, MediaRequestRepository,
    MediaUserRepository, ProtectionRepository, SettingsRepository, UserVelocityRepository,
    VelocitySnapshotRepository, WatchEventRepository, WatchlistRepository,
};
use crate::service::{
    AnalyzerService, DeltaSynchronizer, MovieCleanupService, Orchestrator, RedownloadQueue,
    RedownloadService, SnapshotLoader, VelocityService,
};
use crate::{Error, Result};

/// Container for all initialized services
pub struct Services {
    pub pool: PgPool,
    pub orchestrator: Arc<Orchestrator>,
    pub sync: Arc<DeltaSynchronizer>,
}

/// Initialize adapters, repositories, services and the orchestrator.
pub fn init_services(config: &Config, pool: PgPool) -> Result<Services> {
    let clock = Clock::System;
    let pacing = Duration::from_millis(config.scheduler.pacing_delay_ms);
    let timezone = config
        .scheduler
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|e| Error::Configuration(format!("invalid timezone: {e}")))?;

    // Adapters
    let media_server: Arc<dyn MediaServer> = match config.media_server.backend {
        MediaServerBackend::Plex => Arc::new(PlexServer::new(
            config.media_server.url.clone(),
            config.media_server.token.clone(),
        )),
        MediaServerBackend::Jellyfin => Arc::new(JellyfinServer::new(
            config.media_server.url.clone(),
            config.media_server.token.clone(),
        )),
    };
    let tv: Option<Arc<dyn TvDownloader>> = config.sonarr.enabled.then(|| {
        Arc::new(SonarrClient::new(
            config.sonarr.url.clone(),
            config.sonarr.api_key.clone(),
        )) as Arc<dyn TvDownloader>
    });
    let movies_downloader: Option<Arc<dyn MovieDownloader>> = config.radarr.enabled.then(|| {
        Arc::new(RadarrClient::new(
            config.radarr.url.clone(),
            config.radarr.api_key.clone(),
        )) as Arc<dyn MovieDownloader>
    });

    // Repositories
    let library = LibraryItemRepository::new(pool.clone());
    let users = MediaUserRepository::new(pool.clone());
    let watch_events = WatchEventRepository::new(pool.clone());
    let velocities = UserVelocityRepository::new(pool.clone());
    let snapshots = VelocitySnapshotRepository::new(pool.clone());
    let stats = EpisodeStatsRepository::new(pool.clone());
    let lifecycle = LifecycleRepository::new(pool.clone());
    let requests = MediaRequestRepository::new(pool.clone());
    let watchlist = WatchlistRepository::new(pool.clone());
    let protection = ProtectionRepository::new(pool.clone());
    let settings = SettingsRepository::new(pool.clone());

    let loader = SnapshotLoader {
        library: library.clone(),
        velocities: velocities.clone(),
        watchlist: watchlist.clone(),
        requests: requests.clone(),
        protection: protection.clone(),
        lifecycle: lifecycle.clone(),
        users: users.clone(),
    };

    let queue = Arc::new(RedownloadQueue::new());

    let analyzer = Arc::new(AnalyzerService::new(
        loader.clone(),
        stats.clone(),
        settings.clone(),
        Arc::clone(&media_server),
        tv.clone(),
        Arc::clone(&queue),
        clock,
        pacing,
    ));

    let movie_cleanup = Arc::new(MovieCleanupService::new(
        library.clone(),
        lifecycle.clone(),
        watchlist.clone(),
        protection.clone(),
        settings.clone(),
        Arc::clone(&media_server),
        movies_downloader,
        pool.clone(),
        clock,
        pacing,
    ));

    let sync = Arc::new(DeltaSynchronizer::new(
        pool.clone(),
        library,
        users,
        watch_events.clone(),
        velocities.clone(),
        lifecycle,
        requests,
        watchlist,
        settings.clone(),
        Arc::clone(&media_server),
        clock,
        pacing,
    ));

    let redownload = Arc::new(RedownloadService::new(
        loader.clone(),
        stats.clone(),
        settings.clone(),
        tv,
        Arc::clone(&queue),
        clock,
        pacing,
    ));

    let velocity = Arc::new(VelocityService::new(
        loader,
        stats.clone(),
        velocities,
        snapshots,
        settings.clone(),
        Arc::clone(&queue),
        clock,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        analyzer,
        movie_cleanup,
        Arc::clone(&sync),
        redownload,
        velocity,
        queue,
        settings,
        stats,
        watch_events,
        timezone,
        clock,
    ));

    info!("services initialized");
    Ok(Services {
        pool,
        orchestrator,
        sync,
    })
}
