//! Agent identity registry
//!
//! Durable map of address -> [`AgentIdentity`]. Addresses are derived
//! from the public key, so "same key registered twice" and "address
//! already taken" are the same check.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::crypto::{derive_address, PUBLIC_KEY_LENGTH};
use crate::error::{AccountError, AccountResult};
use crate::types::{Address, AgentIdentity, AgentStatus};

#[derive(Default)]
pub struct KeyRegistry {
    agents: DashMap<Address, AgentIdentity>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an identity for `public_key`. The existence check and the
    /// insert happen under one entry lock.
    pub fn register(
        &self,
        name: &str,
        public_key: &[u8],
        telos: Option<String>,
        now: DateTime<Utc>,
    ) -> AccountResult<Address> {
        if name.trim().is_empty() {
            return Err(AccountError::validation("Name cannot be empty"));
        }
        let public_key: [u8; PUBLIC_KEY_LENGTH] = public_key.try_into().map_err(|_| {
            AccountError::validation(format!(
                "Public key must be {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                public_key.len()
            ))
        })?;

        let address = derive_address(&public_key);

        match self.agents.entry(address.clone()) {
            Entry::Occupied(_) => Err(AccountError::Conflict(format!(
                "Public key already registered as {}",
                address
            ))),
            Entry::Vacant(slot) => {
                slot.insert(AgentIdentity {
                    address: address.clone(),
                    name: name.to_string(),
                    public_key,
                    telos,
                    reputation: 0.0,
                    status: AgentStatus::Active,
                    created_at: now,
                    last_seen: now,
                });
                Ok(address)
            }
        }
    }

    pub fn get(&self, address: &Address) -> AccountResult<AgentIdentity> {
        self.agents
            .get(address)
            .map(|r| r.value().clone())
            .ok_or_else(|| AccountError::not_found("Agent not found"))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.agents.contains_key(address)
    }

    pub fn touch_last_seen(&self, address: &Address, timestamp: DateTime<Utc>) {
        if let Some(mut agent) = self.agents.get_mut(address) {
            agent.last_seen = timestamp;
        }
    }

    pub fn set_status(&self, address: &Address, status: AgentStatus) -> AccountResult<()> {
        let mut agent = self
            .agents
            .get_mut(address)
            .ok_or_else(|| AccountError::not_found("Agent not found"))?;
        agent.status = status;
        Ok(())
    }

    /// Remove an identity, returning its last state for export
    pub fn delete(&self, address: &Address) -> AccountResult<AgentIdentity> {
        self.agents
            .remove(address)
            .map(|(_, agent)| agent)
            .ok_or_else(|| AccountError::not_found("Agent not found"))
    }

    pub fn snapshot(&self) -> Vec<AgentIdentity> {
        self.agents.iter().map(|r| r.value().clone()).collect()
    }

    pub fn restore(&self, agents: Vec<AgentIdentity>) {
        for agent in agents {
            self.agents.insert(agent.address.clone(), agent);
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256_hex;

    #[test]
    fn test_register_and_get() {
        let registry = KeyRegistry::new();
        let key = [3u8; 32];
        let now = Utc::now();

        let address = registry
            .register("alice", &key, Some("build".into()), now)
            .unwrap();
        assert_eq!(address.as_str(), &sha256_hex(&key)[..16]);

        let agent = registry.get(&address).unwrap();
        assert_eq!(agent.name, "alice");
        assert_eq!(agent.reputation, 0.0);
        assert_eq!(agent.telos.as_deref(), Some("build"));
        assert_eq!(agent.created_at, now);
        assert_eq!(agent.last_seen, now);
    }

    #[test]
    fn test_duplicate_key_conflicts() {
        let registry = KeyRegistry::new();
        let key = [4u8; 32];
        registry.register("one", &key, None, Utc::now()).unwrap();

        let err = registry.register("two", &key, None, Utc::now()).unwrap_err();
        assert!(matches!(err, AccountError::Conflict(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_validation() {
        let registry = KeyRegistry::new();
        assert!(matches!(
            registry.register("", &[1u8; 32], None, Utc::now()),
            Err(AccountError::Validation(_))
        ));
        assert!(matches!(
            registry.register("   ", &[1u8; 32], None, Utc::now()),
            Err(AccountError::Validation(_))
        ));
        assert!(matches!(
            registry.register("x", &[1u8; 31], None, Utc::now()),
            Err(AccountError::Validation(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delete_frees_address() {
        let registry = KeyRegistry::new();
        let key = [5u8; 32];
        let address = registry.register("carol", &key, None, Utc::now()).unwrap();

        let removed = registry.delete(&address).unwrap();
        assert_eq!(removed.name, "carol");
        assert!(matches!(registry.get(&address), Err(AccountError::NotFound(_))));
        assert!(matches!(registry.delete(&address), Err(AccountError::NotFound(_))));

        assert_eq!(
            registry.register("carol2", &key, None, Utc::now()).unwrap(),
            address
        );
    }

    #[test]
    fn test_touch_and_status() {
        let registry = KeyRegistry::new();
        let address = registry.register("dave", &[6u8; 32], None, Utc::now()).unwrap();

        let later = Utc::now() + chrono::Duration::minutes(5);
        registry.touch_last_seen(&address, later);
        assert_eq!(registry.get(&address).unwrap().last_seen, later);

        registry.set_status(&address, AgentStatus::Banned).unwrap();
        assert_eq!(registry.get(&address).unwrap().status, AgentStatus::Banned);
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        use std::sync::Arc;

        let registry = Arc::new(KeyRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .register(&format!("racer{}", i), &[8u8; 32], None, Utc::now())
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
