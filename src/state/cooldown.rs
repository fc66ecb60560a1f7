use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use uuid::Uuid;

/// Per-room, per-player buzz lockouts. Entries expire lazily on lookup.
#[derive(Default)]
pub struct BuzzCooldowns {
    entries: DashMap<(Uuid, Uuid), SystemTime>,
}

impl BuzzCooldowns {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `player_id` out until `now + window`, returning that instant.
    pub fn start(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        now: SystemTime,
        window: Duration,
    ) -> SystemTime {
        let until = now + window;
        self.entries.insert((room_id, player_id), until);
        until
    }

    /// Instant until which the player's buzzes are rejected, if still in force.
    pub fn active_until(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        now: SystemTime,
    ) -> Option<SystemTime> {
        let key = (room_id, player_id);
        let until = *self.entries.get(&key)?;
        if now < until {
            return Some(until);
        }
        self.entries.remove_if(&key, |_, stored| *stored == until);
        None
    }

    /// Clear the player's cooldown (correct answer, departure).
    pub fn clear(&self, room_id: Uuid, player_id: Uuid) {
        self.entries.remove(&(room_id, player_id));
    }

    /// Active cooldowns of a room keyed by player.
    pub fn for_room(&self, room_id: Uuid, now: SystemTime) -> HashMap<Uuid, SystemTime> {
        self.entries
            .iter()
            .filter(|entry| entry.key().0 == room_id && now < *entry.value())
            .map(|entry| (entry.key().1, *entry.value()))
            .collect()
    }

    /// Drop every cooldown of a closed room.
    pub fn clear_room(&self, room_id: Uuid) {
        self.entries.retain(|(room, _), _| *room != room_id);
    }
}
