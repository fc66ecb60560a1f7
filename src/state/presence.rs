use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

/// Participant a live connection is counted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceKey {
    /// The room owner.
    Owner,
    /// A player of the room.
    Player(Uuid),
}

/// Live connection counts per room participant.
///
/// The durable `connected` flags only flip on the first bind and the last
/// release, so a reconnect that overlaps the old socket keeps the
/// participant present.
#[derive(Default)]
pub struct PresenceCounts {
    counts: DashMap<(Uuid, PresenceKey), usize>,
}

impl PresenceCounts {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more connection, returning `true` when it is the first.
    pub fn acquire(&self, room_id: Uuid, key: PresenceKey) -> bool {
        let mut count = self.counts.entry((room_id, key)).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop one connection, returning `true` when it was the last.
    ///
    /// Releasing a participant with no counted connection returns `false`.
    pub fn release(&self, room_id: Uuid, key: PresenceKey) -> bool {
        match self.counts.entry((room_id, key)) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= 1 {
                    entry.remove();
                    true
                } else {
                    *entry.get_mut() -= 1;
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Live connections currently counted for the participant.
    pub fn count(&self, room_id: Uuid, key: PresenceKey) -> usize {
        self.counts.get(&(room_id, key)).map_or(0, |count| *count)
    }

    /// Forget every connection of the participant (explicit leave, kick).
    pub fn forget(&self, room_id: Uuid, key: PresenceKey) {
        self.counts.remove(&(room_id, key));
    }

    /// Drop the counts of a closed room.
    pub fn clear_room(&self, room_id: Uuid) {
        self.counts.retain(|(room, _), _| *room != room_id);
    }
}
