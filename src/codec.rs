//! Binary layout of the on-chain player account.
//!
//! ```text
//! | discriminator (8) | authority (32) | hp | atk | def | last_event (32) | can_claim | level |
//! ```
//!
//! Accounts written before levels existed are one byte shorter; they decode as level 1.
use crate::address::Pubkey;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use thiserror::Error;

pub const LEGACY_ACCOUNT_LEN: usize = 75;
pub const ACCOUNT_LEN: usize = 76;

const AUTHORITY_OFFSET: usize = 8;
const STATS_OFFSET: usize = AUTHORITY_OFFSET + 32;
const EVENT_OFFSET: usize = STATS_OFFSET + 3;
const CLAIM_OFFSET: usize = EVENT_OFFSET + 32;
const LEVEL_OFFSET: usize = CLAIM_OFFSET + 1;

/// First 8 bytes of `sha256("<namespace>:<name>")`.
pub fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub fn player_discriminator() -> [u8; 8] {
    discriminator("account", "Player")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("account data too short: {len} bytes, need at least {LEGACY_ACCOUNT_LEN}")]
    TooShort { len: usize },
    #[error("account discriminator mismatch")]
    Discriminator,
    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub owner: Pubkey,
    pub hp: u8,
    pub atk: u8,
    pub def: u8,
    pub level: u8,
    pub last_event: [u8; 32],
    pub reward_available: bool,
}

impl PlayerState {
    pub fn has_pending_encounter(&self) -> bool {
        self.last_event != [0; 32]
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }
}

pub fn decode(bytes: &[u8]) -> Result<PlayerState, DecodeError> {
    if bytes.len() < LEGACY_ACCOUNT_LEN {
        return Err(DecodeError::TooShort { len: bytes.len() });
    }
    if bytes[..AUTHORITY_OFFSET] != player_discriminator() {
        return Err(DecodeError::Discriminator);
    }

    let mut owner = [0u8; 32];
    owner.copy_from_slice(&bytes[AUTHORITY_OFFSET..STATS_OFFSET]);
    let mut last_event = [0u8; 32];
    last_event.copy_from_slice(&bytes[EVENT_OFFSET..CLAIM_OFFSET]);
    let reward_available = match bytes[CLAIM_OFFSET] {
        0 => false,
        1 => true,
        other => return Err(DecodeError::InvalidBool(other)),
    };
    let level = bytes.get(LEVEL_OFFSET).copied().unwrap_or(0).max(1);

    Ok(PlayerState {
        owner: Pubkey::new_from_array(owner),
        hp: bytes[STATS_OFFSET],
        atk: bytes[STATS_OFFSET + 1],
        def: bytes[STATS_OFFSET + 2],
        level,
        last_event,
        reward_available,
    })
}

pub fn encode(state: &PlayerState) -> Vec<u8> {
    let mut out = Vec::with_capacity(ACCOUNT_LEN);
    out.extend_from_slice(&player_discriminator());
    out.extend_from_slice(state.owner.as_ref());
    out.extend_from_slice(&[state.hp, state.atk, state.def]);
    out.extend_from_slice(&state.last_event);
    out.push(u8::from(state.reward_available));
    out.push(state.level);
    out
}
