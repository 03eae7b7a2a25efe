//! Single-use, time-boxed challenges
//!
//! One live challenge per address. Consuming removes the entry, so a
//! challenge can be handed to at most one verification attempt no
//! matter how many race for it.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::crypto::{generate_nonce, NONCE_LENGTH};
use crate::types::Address;

/// Default challenge lifetime
pub const DEFAULT_CHALLENGE_TTL_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct Challenge {
    pub address: Address,
    pub nonce: [u8; NONCE_LENGTH],
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn nonce_hex(&self) -> String {
        hex::encode(self.nonce)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of a consume attempt
#[derive(Debug)]
pub enum Consumed {
    Live(Challenge),
    /// Was pending but past `expires_at`; removed all the same
    Expired(Challenge),
    NotFound,
}

pub struct ChallengeStore {
    pending: DashMap<Address, Challenge>,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh challenge, replacing any pending one for the
    /// address. The caller is responsible for checking the address is
    /// registered.
    pub fn issue(&self, address: &Address, now: DateTime<Utc>) -> Challenge {
        let challenge = Challenge {
            address: address.clone(),
            nonce: generate_nonce(),
            issued_at: now,
            expires_at: now + self.ttl,
        };

        if self
            .pending
            .insert(address.clone(), challenge.clone())
            .is_some()
        {
            tracing::debug!("Replaced pending challenge for {}", address);
        }

        challenge
    }

    /// Take the pending challenge out of the store. Removal is what
    /// marks it consumed.
    pub fn consume(&self, address: &Address, now: DateTime<Utc>) -> Consumed {
        match self.pending.remove(address) {
            None => Consumed::NotFound,
            Some((_, challenge)) => {
                if challenge.is_expired(now) {
                    Consumed::Expired(challenge)
                } else {
                    Consumed::Live(challenge)
                }
            }
        }
    }

    /// Drop any pending challenge for the address
    pub fn revoke(&self, address: &Address) -> bool {
        self.pending.remove(address).is_some()
    }

    /// Remove expired challenges. `consume` already handles expiry, so
    /// this only reclaims memory.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, c| !c.is_expired(now));
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_CHALLENGE_TTL_SECS))
    }
}
