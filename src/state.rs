//! Application state for the AGORA auth service

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::interval;

use crate::challenge::ChallengeStore;
use crate::config::Config;
use crate::error::{AccountError, AccountResult};
use crate::ratelimit::{RateLimitStatus, RateLimiter, RateScope};
use crate::service::AccountService;
use crate::session::SessionIssuer;
use crate::types::{AgentIdentity, HealthResponse};
use crate::witness::WitnessEntry;

/// Global application state
pub struct AppState {
    pub accounts: AccountService,
    pub limiter: RateLimiter,
    pub config: Config,
    /// Start time for uptime calculation
    pub start_time: Instant,
    /// Persistence dirty flag
    dirty: AtomicBool,
    /// Notify for immediate save
    persist_notify: Notify,
    shutdown: AtomicBool,
    pub last_persist: std::sync::RwLock<Option<DateTime<Utc>>>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let now = Utc::now();
        let sessions = SessionIssuer::new(
            config.jwt_secret.clone(),
            chrono::Duration::from_std(config.session_ttl)?,
            chrono::Duration::from_std(config.secret_rotation_grace)?,
        )?;
        if let Some(previous) = config.jwt_previous_secret.clone() {
            sessions.retire_secret(previous, now)?;
            tracing::info!("Accepting sessions signed with the previous secret");
        }
        let challenges = ChallengeStore::new(chrono::Duration::from_std(config.challenge_ttl)?);

        Ok(Arc::new(Self {
            accounts: AccountService::new(challenges, sessions),
            limiter: RateLimiter::new(config.rate_limits.clone()),
            config,
            start_time: Instant::now(),
            dirty: AtomicBool::new(false),
            persist_notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            last_persist: std::sync::RwLock::new(None),
        }))
    }

    /// Load state from disk
    pub async fn load_from_disk(self: &Arc<Self>) -> anyhow::Result<()> {
        let path = self.config.state_file_path();

        if !path.exists() {
            tracing::info!("No existing state file, starting fresh");
            return Ok(());
        }

        let json = tokio::fs::read_to_string(&path).await?;
        let snapshot: StateSnapshot = serde_json::from_str(&json)?;

        self.accounts.registry().restore(snapshot.agents);
        self.accounts.witness().restore(snapshot.witness);

        tracing::info!(
            "Loaded state: {} agents, {} witness entries",
            self.accounts.registry().len(),
            self.accounts.witness().len()
        );
        Ok(())
    }

    /// Start background persistence worker
    pub fn spawn_persister(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        let persist_interval = state.config.persist_interval;

        tokio::spawn(async move {
            let mut ticker = interval(persist_interval);

            loop {
                if state.shutdown.load(Ordering::SeqCst) {
                    tracing::info!("Persister shutting down, final save...");
                    if let Err(e) = state.save_to_disk().await {
                        tracing::error!("Failed final persist: {}", e);
                    }
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {
                        if state.dirty.swap(false, Ordering::SeqCst) {
                            if let Err(e) = state.save_to_disk().await {
                                tracing::error!("Failed to persist state: {}", e);
                            }
                        }
                    }
                    _ = state.persist_notify.notified() => {
                        state.dirty.store(false, Ordering::SeqCst);
                        if let Err(e) = state.save_to_disk().await {
                            tracing::error!("Failed to persist state: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Start background sweep of expired challenges and idle rate buckets
    pub fn spawn_janitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        let sweep_interval = state.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            while !state.is_shutdown() {
                ticker.tick().await;
                let now = Utc::now();
                let challenges = state.accounts.challenges().sweep_expired(now);
                let buckets = state.limiter.purge_idle(now);
                if challenges + buckets > 0 {
                    tracing::debug!(
                        "Swept {} expired challenges, {} idle rate buckets",
                        challenges,
                        buckets
                    );
                }
            }
        })
    }

    pub fn signal_shutdown(&self) {
        tracing::info!("Shutdown signaled");
        self.shutdown.store(true, Ordering::SeqCst);
        self.persist_notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Save state to disk
    pub async fn save_to_disk(&self) -> anyhow::Result<()> {
        let snapshot = StateSnapshot {
            agents: self.accounts.registry().snapshot(),
            witness: self.accounts.witness().snapshot(),
            saved_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        let path = self.config.state_file_path();
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        *self
            .last_persist
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        tracing::info!("State persisted: {} agents", snapshot.agents.len());
        Ok(())
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Consult the limiter. `None` when limiting is disabled.
    pub fn rate_limit(&self, scope: RateScope, key: &str) -> AccountResult<Option<RateLimitStatus>> {
        if !self.config.rate_limit_enabled {
            return Ok(None);
        }
        match self.limiter.check(scope, key) {
            Ok(status) => Ok(Some(status)),
            Err(status) => {
                tracing::warn!("Rate limited {:?} for {}", scope, key);
                Err(AccountError::RateLimited(status))
            }
        }
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".into(),
            version: self.config.version.clone(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            agents_count: self.accounts.registry().len(),
            pending_challenges: self.accounts.challenges().len(),
            witness_entries: self.accounts.witness().len(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StateSnapshot {
    agents: Vec<AgentIdentity>,
    witness: Vec<WitnessEntry>,
    saved_at: DateTime<Utc>,
}
