pub mod cooldown;
pub mod hub;
pub mod lifecycle;
pub mod playback;
pub mod presence;
pub mod tokens;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    dao::{
        cleanup::{CleanupHook, LogCleanup},
        room_store::{MemoryRoomStore, RoomStore},
    },
};

pub use self::cooldown::BuzzCooldowns;
pub use self::hub::{EventReceiver, Hub, HubRegistry, SubscriptionGuard};
pub use self::lifecycle::{LifecyclePhase, OwnerTimers};
pub use self::playback::{PlaybackCoordinator, RoomSync, Transport};
pub use self::presence::{PresenceCounts, PresenceKey};
pub use self::tokens::{TokenError, TokenRegistry};

pub type SharedState = Arc<AppState>;

/// Central application state: repository handles plus the in-memory
/// coordination tables. Each table has its own lock domain.
pub struct AppState {
    config: Arc<AppConfig>,
    store: Arc<dyn RoomStore>,
    cleanup: Arc<dyn CleanupHook>,
    hubs: HubRegistry,
    tokens: TokenRegistry,
    playback: PlaybackCoordinator,
    cooldowns: BuzzCooldowns,
    owner_timers: OwnerTimers,
    presence: PresenceCounts,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn RoomStore>,
        cleanup: Arc<dyn CleanupHook>,
    ) -> SharedState {
        Arc::new(Self {
            config: Arc::new(config),
            store,
            cleanup,
            hubs: HubRegistry::new(),
            tokens: TokenRegistry::new(),
            playback: PlaybackCoordinator::new(),
            cooldowns: BuzzCooldowns::new(),
            owner_timers: OwnerTimers::new(),
            presence: PresenceCounts::new(),
        })
    }

    /// State backed by the process-local repository and the logging cleanup hook.
    pub fn in_memory(config: AppConfig) -> SharedState {
        Self::new(
            config,
            Arc::new(MemoryRoomStore::new()),
            Arc::new(LogCleanup),
        )
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Room repository.
    pub fn store(&self) -> Arc<dyn RoomStore> {
        Arc::clone(&self.store)
    }

    /// Hook run after a room is deleted.
    pub fn cleanup(&self) -> Arc<dyn CleanupHook> {
        Arc::clone(&self.cleanup)
    }

    /// Registry of per-room event hubs.
    pub fn hubs(&self) -> &HubRegistry {
        &self.hubs
    }

    /// Owner and player command tokens.
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Readiness handshake state.
    pub fn playback(&self) -> &PlaybackCoordinator {
        &self.playback
    }

    /// Buzz lockouts.
    pub fn cooldowns(&self) -> &BuzzCooldowns {
        &self.cooldowns
    }

    /// Deferred owner-absence closures.
    pub fn owner_timers(&self) -> &OwnerTimers {
        &self.owner_timers
    }

    /// Live connection counts behind the presence flags.
    pub fn presence(&self) -> &PresenceCounts {
        &self.presence
    }
}
