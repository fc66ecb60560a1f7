//! In-memory command tokens gating owner-only and player-only actions.
//!
//! Tokens never leave the process and are not identity proofs: they only tie a
//! command sent over a shared socket to the REST call that joined the room.

use std::collections::HashMap;

use dashmap::DashMap;
use rand::{Rng, distr::Alphanumeric, rng};
use thiserror::Error;
use uuid::Uuid;

const TOKEN_LENGTH: usize = 32;

/// Why a token check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// No token was minted for this room / player.
    #[error("no token issued")]
    Missing,
    /// A token exists but the presented one differs.
    #[error("token mismatch")]
    Mismatch,
}

#[derive(Default)]
struct RoomTokens {
    owner: Option<String>,
    players: HashMap<Uuid, String>,
}

/// Owner and player tokens for every live room.
#[derive(Default)]
pub struct TokenRegistry {
    rooms: DashMap<Uuid, RoomTokens>,
}

impl TokenRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the room's owner token, minting it on first use.
    pub fn owner_token(&self, room_id: Uuid) -> String {
        let mut tokens = self.rooms.entry(room_id).or_default();
        tokens.owner.get_or_insert_with(generate_token).clone()
    }

    /// Return the player's token, minting it on first use.
    pub fn player_token(&self, room_id: Uuid, player_id: Uuid) -> String {
        let mut tokens = self.rooms.entry(room_id).or_default();
        tokens
            .players
            .entry(player_id)
            .or_insert_with(generate_token)
            .clone()
    }

    /// Check a presented owner token.
    pub fn validate_owner(&self, room_id: Uuid, token: &str) -> Result<(), TokenError> {
        let tokens = self.rooms.get(&room_id).ok_or(TokenError::Missing)?;
        match tokens.owner.as_deref() {
            None => Err(TokenError::Missing),
            Some(expected) if expected == token => Ok(()),
            Some(_) => Err(TokenError::Mismatch),
        }
    }

    /// Check a presented player token against the player it claims to be.
    pub fn validate_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        token: &str,
    ) -> Result<(), TokenError> {
        let tokens = self.rooms.get(&room_id).ok_or(TokenError::Missing)?;
        match tokens.players.get(&player_id) {
            None => Err(TokenError::Missing),
            Some(expected) if expected == token => Ok(()),
            Some(_) => Err(TokenError::Mismatch),
        }
    }

    /// Find which player of the room holds `token`.
    pub fn player_for_token(&self, room_id: Uuid, token: &str) -> Option<Uuid> {
        let tokens = self.rooms.get(&room_id)?;
        tokens
            .players
            .iter()
            .find(|(_, candidate)| candidate.as_str() == token)
            .map(|(player_id, _)| *player_id)
    }

    /// Discard a player's token when it leaves the room.
    pub fn revoke_player(&self, room_id: Uuid, player_id: Uuid) {
        if let Some(mut tokens) = self.rooms.get_mut(&room_id) {
            tokens.players.remove(&player_id);
        }
    }

    /// Discard every token of a closed room.
    pub fn revoke_room(&self, room_id: Uuid) {
        self.rooms.remove(&room_id);
    }
}

fn generate_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_token_is_minted_once() {
        let registry = TokenRegistry::new();
        let room = Uuid::new_v4();
        let first = registry.owner_token(room);
        assert_eq!(first.len(), TOKEN_LENGTH);
        assert_eq!(registry.owner_token(room), first);
        assert_eq!(registry.validate_owner(room, &first), Ok(()));
        assert_eq!(
            registry.validate_owner(room, "guess"),
            Err(TokenError::Mismatch)
        );
    }

    #[test]
    fn player_tokens_are_scoped_to_their_player() {
        let registry = TokenRegistry::new();
        let (room, alice, bob) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let alice_token = registry.player_token(room, alice);
        registry.player_token(room, bob);

        assert_eq!(registry.validate_player(room, alice, &alice_token), Ok(()));
        assert_eq!(
            registry.validate_player(room, bob, &alice_token),
            Err(TokenError::Mismatch)
        );
        assert_eq!(registry.player_for_token(room, &alice_token), Some(alice));
    }

    #[test]
    fn revoked_tokens_are_missing() {
        let registry = TokenRegistry::new();
        let (room, player) = (Uuid::new_v4(), Uuid::new_v4());
        let token = registry.player_token(room, player);
        let owner = registry.owner_token(room);

        registry.revoke_player(room, player);
        assert_eq!(
            registry.validate_player(room, player, &token),
            Err(TokenError::Missing)
        );
        assert_eq!(registry.validate_owner(room, &owner), Ok(()));

        registry.revoke_room(room);
        assert_eq!(
            registry.validate_owner(room, &owner),
            Err(TokenError::Missing)
        );
    }
}
