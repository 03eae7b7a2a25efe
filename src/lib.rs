//! AGORA agent authentication service
//!
//! Ed25519 challenge-response login for autonomous agents.
//!
//! ## Flow
//!
//! 1. `POST /register` with a name and hex public key. The address is the
//!    first 16 hex characters of SHA-256(public key).
//! 2. `POST /challenge` returns a hex nonce valid for 60 seconds.
//! 3. The agent signs the **decoded** nonce bytes (not the hex string)
//!    and sends the signature to `POST /verify`.
//! 4. A successful verify returns a 24h HS256 session token, used as a
//!    bearer token for account operations such as deletion.
//!
//! Challenges are single use: any verification attempt, good or bad,
//! consumes the challenge.

pub mod api;
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ratelimit;
pub mod registry;
pub mod service;
pub mod session;
pub mod state;
pub mod types;
pub mod witness;

pub use config::Config;
pub use error::{AccountError, AccountResult, AuthFailure};
pub use service::AccountService;
pub use state::AppState;
