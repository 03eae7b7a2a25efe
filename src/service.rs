//! Account service
//!
//! The only component the HTTP layer talks to. Per address the flow is
//!
//! ```text
//! UNREGISTERED -> REGISTERED -> CHALLENGED -> AUTHENTICATED -> [REGISTERED | DELETED]
//! ```
//!
//! `AUTHENTICATED` is never stored: it just means a session token was
//! issued. Any failed verification consumes the challenge and drops the
//! agent back to `REGISTERED`.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::challenge::{ChallengeStore, Consumed};
use crate::crypto::{decode_public_key_hex, parse_public_key, verify_signature};
use crate::error::{AccountError, AccountResult, AuthFailure};
use crate::registry::KeyRegistry;
use crate::session::{SessionError, SessionIssuer};
use crate::types::*;
use crate::witness::{WitnessAction, WitnessEntry, WitnessLog};

pub const MAX_NAME_LENGTH: usize = 64;
pub const MAX_TELOS_LENGTH: usize = 500;

/// Validate agent name
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Name cannot be empty");
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err("Name must be at most 64 characters");
    }
    if name.chars().any(char::is_control) {
        return Err("Name cannot contain control characters");
    }
    Ok(())
}

/// Validate telos
pub fn validate_telos(telos: &str) -> Result<(), &'static str> {
    if telos.chars().count() > MAX_TELOS_LENGTH {
        return Err("Telos must be at most 500 characters");
    }
    Ok(())
}

pub fn parse_address(address: &str) -> AccountResult<Address> {
    Address::parse(address).map_err(AccountError::validation)
}

impl From<SessionError> for AccountError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired => AccountError::Unauthorized(AuthFailure::TokenExpired),
            SessionError::Invalid => AccountError::Unauthorized(AuthFailure::TokenInvalid),
            SessionError::WeakSecret | SessionError::Signing(_) => {
                AccountError::internal(err.to_string())
            }
        }
    }
}

pub struct AccountService {
    registry: KeyRegistry,
    challenges: ChallengeStore,
    sessions: SessionIssuer,
    witness: WitnessLog,
}

impl AccountService {
    pub fn new(challenges: ChallengeStore, sessions: SessionIssuer) -> Self {
        Self {
            registry: KeyRegistry::new(),
            challenges,
            sessions,
            witness: WitnessLog::new(),
        }
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    pub fn witness(&self) -> &WitnessLog {
        &self.witness
    }

    // ============ Registration ============

    pub fn register(
        &self,
        name: &str,
        public_key_hex: &str,
        telos: Option<String>,
    ) -> AccountResult<RegisterResponse> {
        self.register_at(name, public_key_hex, telos, Utc::now())
    }

    pub fn register_at(
        &self,
        name: &str,
        public_key_hex: &str,
        telos: Option<String>,
        now: DateTime<Utc>,
    ) -> AccountResult<RegisterResponse> {
        validate_name(name).map_err(AccountError::validation)?;
        if let Some(ref telos) = telos {
            validate_telos(telos).map_err(AccountError::validation)?;
        }

        let public_key = decode_public_key_hex(public_key_hex)
            .map_err(|e| AccountError::validation(e.to_string()))?;
        parse_public_key(&public_key).map_err(|e| AccountError::validation(e.to_string()))?;

        let address = self.registry.register(name, &public_key, telos, now)?;

        self.witness.record(
            &address,
            WitnessAction::Registered,
            &json!({ "name": name, "public_key_hex": hex::encode(&public_key) }),
            now,
        );
        tracing::info!("Registered agent {} ({})", name, address);

        Ok(RegisterResponse { address })
    }

    // ============ Challenge / Verify ============

    pub fn request_challenge(&self, address: &str) -> AccountResult<ChallengeResponse> {
        self.request_challenge_at(address, Utc::now())
    }

    pub fn request_challenge_at(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> AccountResult<ChallengeResponse> {
        let address = parse_address(address)?;
        let agent = self.registry.get(&address)?;
        if agent.status == AgentStatus::Banned {
            tracing::warn!("Challenge refused for banned agent {}", address);
            return Err(AccountError::Forbidden("Agent is banned".into()));
        }

        let challenge = self.challenges.issue(&address, now);
        tracing::debug!("Issued challenge for {}", address);

        Ok(ChallengeResponse {
            challenge: challenge.nonce_hex(),
            expires_at: challenge.expires_at,
        })
    }

    pub fn verify(&self, address: &str, signature_hex: &str) -> AccountResult<VerifyResponse> {
        self.verify_at(address, signature_hex, Utc::now())
    }

    /// Consume the pending challenge and check the signature over its
    /// raw nonce bytes. The challenge is gone afterwards whatever the
    /// outcome.
    pub fn verify_at(
        &self,
        address: &str,
        signature_hex: &str,
        now: DateTime<Utc>,
    ) -> AccountResult<VerifyResponse> {
        let address = parse_address(address)?;

        let challenge = match self.challenges.consume(&address, now) {
            Consumed::Live(challenge) => challenge,
            Consumed::Expired(_) => {
                return Err(self.auth_failed(&address, AuthFailure::ChallengeExpired, now));
            }
            Consumed::NotFound => {
                tracing::warn!("Verify for {} with no pending challenge", address);
                return Err(AccountError::not_found("No pending challenge"));
            }
        };

        let agent = self.registry.get(&address)?;

        // Undecodable hex is just another wrong signature
        let signature = hex::decode(signature_hex.trim()).unwrap_or_default();
        if !verify_signature(&agent.public_key, &challenge.nonce, &signature) {
            return Err(self.auth_failed(&address, AuthFailure::SignatureMismatch, now));
        }

        if agent.status == AgentStatus::Banned {
            tracing::warn!("Verified signature for banned agent {}", address);
            return Err(AccountError::Forbidden("Agent is banned".into()));
        }

        self.registry.touch_last_seen(&address, now);
        let session = self.sessions.issue_at(&address, &agent.name, now)?;

        self.witness.record(
            &address,
            WitnessAction::Authenticated,
            &json!({ "iat": session.claims.iat, "exp": session.claims.exp }),
            now,
        );
        tracing::info!("Agent {} authenticated", address);

        let agent = self.registry.get(&address)?;
        Ok(VerifyResponse {
            jwt_token: session.token,
            expires_at: session.expires_at,
            agent: PublicProfile::from(&agent),
        })
    }

    fn auth_failed(&self, address: &Address, reason: AuthFailure, now: DateTime<Utc>) -> AccountError {
        tracing::warn!("Authentication failed for {}: {}", address, reason);
        if self.registry.contains(address) {
            self.witness.record(
                address,
                WitnessAction::AuthenticationFailed,
                &json!({ "reason": reason.to_string() }),
                now,
            );
        }
        AccountError::Unauthorized(reason)
    }

    // ============ Profile ============

    pub fn get_profile(&self, address: &str) -> AccountResult<PublicProfile> {
        let address = parse_address(address)?;
        let agent = self.registry.get(&address)?;
        Ok(PublicProfile::from(&agent))
    }

    /// Ban check point. Deciding who gets banned lives elsewhere.
    pub fn set_status(&self, address: &str, status: AgentStatus) -> AccountResult<()> {
        let address = parse_address(address)?;
        self.registry.set_status(&address, status)?;
        tracing::info!("Agent {} status set to {:?}", address, status);
        Ok(())
    }

    pub fn witness_history(&self, address: &str) -> AccountResult<Vec<WitnessEntry>> {
        let address = parse_address(address)?;
        Ok(self.witness.history(&address))
    }

    // ============ Deletion ============

    pub fn delete_account(
        &self,
        address: &str,
        token: &str,
        confirmed: bool,
    ) -> AccountResult<DeletionExport> {
        self.delete_account_at(address, token, confirmed, Utc::now())
    }

    /// Irreversible. The returned export is the only copy of the
    /// identity; the witness history stays behind.
    pub fn delete_account_at(
        &self,
        address: &str,
        token: &str,
        confirmed: bool,
        now: DateTime<Utc>,
    ) -> AccountResult<DeletionExport> {
        let address = self.authorize_deletion_at(address, token, confirmed, now)?;
        self.delete_authorized(&address, now)
    }

    pub fn authorize_deletion(
        &self,
        address: &str,
        token: &str,
        confirmed: bool,
    ) -> AccountResult<Address> {
        self.authorize_deletion_at(address, token, confirmed, Utc::now())
    }

    /// Every check `delete_account` makes, with nothing removed. The
    /// HTTP layer charges the delete quota only once this passes.
    pub fn authorize_deletion_at(
        &self,
        address: &str,
        token: &str,
        confirmed: bool,
        now: DateTime<Utc>,
    ) -> AccountResult<Address> {
        let address = parse_address(address)?;

        let claims = self.sessions.validate_at(token, now).map_err(|e| {
            tracing::warn!("Delete of {} with rejected session: {}", address, e);
            AccountError::from(e)
        })?;
        if claims.sub != address.as_str() {
            tracing::warn!(
                "Delete of {} attempted with session for {}",
                address,
                claims.sub
            );
            return Err(AccountError::Unauthorized(AuthFailure::AddressMismatch));
        }
        if !confirmed {
            return Err(AccountError::validation(
                "Deletion requires confirmed=true",
            ));
        }
        Ok(address)
    }

    /// Remove an address that passed `authorize_deletion`. The export
    /// is built before the identity is dropped.
    pub fn delete_authorized(
        &self,
        address: &Address,
        now: DateTime<Utc>,
    ) -> AccountResult<DeletionExport> {
        let export_agent = AgentExport::from(&self.registry.get(address)?);
        let snapshot = serde_json::to_value(&export_agent)
            .map_err(|e| AccountError::internal(e.to_string()))?;

        let agent = self.registry.delete(address)?;
        self.challenges.revoke(address);
        self.witness
            .record(address, WitnessAction::AccountDeleted, &snapshot, now);

        tracing::info!("Deleted agent {} ({})", agent.name, address);

        Ok(DeletionExport {
            agent: export_agent,
            witness_history: self.witness.history(address),
            exported_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sha256_hex, sign_challenge};
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    const SECRET: &str = "service-test-secret-at-least-32-characters";

    fn service() -> AccountService {
        AccountService::new(
            ChallengeStore::default(),
            SessionIssuer::new(SECRET.into(), Duration::hours(24), Duration::hours(24)).unwrap(),
        )
    }

    fn keypair() -> (SigningKey, String) {
        let key = SigningKey::generate(&mut OsRng);
        let public_hex = hex::encode(key.verifying_key().to_bytes());
        (key, public_hex)
    }

    /// register + challenge + sign + verify
    fn login(svc: &AccountService, name: &str) -> (String, SigningKey, VerifyResponse) {
        let (key, public_hex) = keypair();
        let address = svc.register(name, &public_hex, None).unwrap().address;
        let challenge = svc.request_challenge(address.as_str()).unwrap();
        let sig = sign_challenge(&key, &challenge.challenge).unwrap();
        let verified = svc.verify(address.as_str(), &sig).unwrap();
        (address.to_string(), key, verified)
    }

    #[test]
    fn test_address_determinism() {
        let svc = service();
        let (_, public_hex) = keypair();

        let address = svc.register("alice", &public_hex, None).unwrap().address;
        let key_bytes = hex::decode(&public_hex).unwrap();
        assert_eq!(address.as_str(), &sha256_hex(&key_bytes)[..16]);

        let err = svc.register("alice-again", &public_hex, None).unwrap_err();
        assert!(matches!(err, AccountError::Conflict(_)));
    }

    #[test]
    fn test_register_validation() {
        let svc = service();
        let (_, public_hex) = keypair();

        for (name, key) in [
            ("", public_hex.as_str()),
            ("ok", "zz"),
            ("ok", "abcd"),
            ("ok", &public_hex[..62]),
            ("bad\nname", public_hex.as_str()),
        ] {
            assert!(
                matches!(svc.register(name, key, None), Err(AccountError::Validation(_))),
                "expected validation error for {:?}/{:?}",
                name,
                key
            );
        }

        let long_telos = "a".repeat(501);
        assert!(matches!(
            svc.register("ok", &public_hex, Some(long_telos)),
            Err(AccountError::Validation(_))
        ));
    }

    #[test]
    fn test_signature_round_trip() {
        let svc = service();
        let (address, _, verified) = login(&svc, "alice");

        let claims = svc.sessions().validate(&verified.jwt_token).unwrap();
        assert_eq!(claims.sub, address);
        assert_eq!(claims.name, "alice");
        assert_eq!(verified.agent.name, "alice");
    }

    #[test]
    fn test_challenge_single_use() {
        let svc = service();
        let (key, public_hex) = keypair();
        let address = svc.register("bob", &public_hex, None).unwrap().address;

        let challenge = svc.request_challenge(address.as_str()).unwrap();
        let sig = sign_challenge(&key, &challenge.challenge).unwrap();

        assert!(svc.verify(address.as_str(), &sig).is_ok());
        assert!(matches!(
            svc.verify(address.as_str(), &sig),
            Err(AccountError::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_attempt_burns_challenge() {
        let svc = service();
        let (key, public_hex) = keypair();
        let address = svc.register("bob", &public_hex, None).unwrap().address;

        let challenge = svc.request_challenge(address.as_str()).unwrap();
        assert!(matches!(
            svc.verify(address.as_str(), "deadbeef"),
            Err(AccountError::Unauthorized(AuthFailure::SignatureMismatch))
        ));

        let sig = sign_challenge(&key, &challenge.challenge).unwrap();
        assert!(matches!(
            svc.verify(address.as_str(), &sig),
            Err(AccountError::NotFound(_))
        ));
    }

    #[test]
    fn test_challenge_expiry() {
        let svc = service();
        let (key, public_hex) = keypair();
        let address = svc.register("carol", &public_hex, None).unwrap().address;

        let t0 = Utc::now();
        let challenge = svc.request_challenge_at(address.as_str(), t0).unwrap();
        let sig = sign_challenge(&key, &challenge.challenge).unwrap();

        let err = svc
            .verify_at(address.as_str(), &sig, t0 + Duration::seconds(61))
            .unwrap_err();
        assert!(matches!(
            err,
            AccountError::Unauthorized(AuthFailure::ChallengeExpired)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let svc = service();
        let (_, public_hex) = keypair();
        let (imposter, _) = keypair();
        let address = svc.register("dave", &public_hex, None).unwrap().address;

        let challenge = svc.request_challenge(address.as_str()).unwrap();
        let sig = sign_challenge(&imposter, &challenge.challenge).unwrap();
        assert!(matches!(
            svc.verify(address.as_str(), &sig),
            Err(AccountError::Unauthorized(AuthFailure::SignatureMismatch))
        ));
    }

    #[test]
    fn test_hex_text_signature_rejected() {
        use ed25519_dalek::Signer;

        let svc = service();
        let (key, public_hex) = keypair();
        let address = svc.register("erin", &public_hex, None).unwrap().address;

        let challenge = svc.request_challenge(address.as_str()).unwrap();
        let sig = hex::encode(key.sign(challenge.challenge.as_bytes()).to_bytes());
        assert!(matches!(
            svc.verify(address.as_str(), &sig),
            Err(AccountError::Unauthorized(AuthFailure::SignatureMismatch))
        ));
    }

    #[test]
    fn test_unknown_and_banned() {
        let svc = service();
        assert!(matches!(
            svc.request_challenge("0000000000000000"),
            Err(AccountError::NotFound(_))
        ));
        assert!(matches!(
            svc.request_challenge("not-an-address"),
            Err(AccountError::Validation(_))
        ));

        let (_, public_hex) = keypair();
        let address = svc.register("frank", &public_hex, None).unwrap().address;
        svc.set_status(address.as_str(), AgentStatus::Banned).unwrap();
        assert!(matches!(
            svc.request_challenge(address.as_str()),
            Err(AccountError::Forbidden(_))
        ));
    }

    #[test]
    fn test_verify_updates_last_seen() {
        let svc = service();
        let (key, public_hex) = keypair();
        let t0 = Utc::now() - Duration::hours(1);
        let address = svc
            .register_at("gina", &public_hex, None, t0)
            .unwrap()
            .address;

        let now = Utc::now();
        let challenge = svc.request_challenge_at(address.as_str(), now).unwrap();
        let sig = sign_challenge(&key, &challenge.challenge).unwrap();
        let verified = svc.verify_at(address.as_str(), &sig, now).unwrap();

        assert_eq!(verified.agent.last_seen, now);
        assert_eq!(verified.agent.created_at, t0);
    }

    #[test]
    fn test_delete_requires_matching_session_and_confirmation() {
        let svc = service();
        let (alice, _, alice_login) = login(&svc, "alice");
        let (bob, _, _) = login(&svc, "bob");

        let err = svc
            .delete_account(&bob, &alice_login.jwt_token, true)
            .unwrap_err();
        assert!(matches!(
            err,
            AccountError::Unauthorized(AuthFailure::AddressMismatch)
        ));
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);

        assert!(matches!(
            svc.delete_account(&alice, &alice_login.jwt_token, false),
            Err(AccountError::Validation(_))
        ));
        assert!(matches!(
            svc.delete_account(&alice, "garbage", true),
            Err(AccountError::Unauthorized(AuthFailure::TokenInvalid))
        ));

        let expired_at = Utc::now() + Duration::hours(24) + Duration::seconds(1);
        assert!(matches!(
            svc.delete_account_at(&alice, &alice_login.jwt_token, true, expired_at),
            Err(AccountError::Unauthorized(AuthFailure::TokenExpired))
        ));

        assert!(svc.get_profile(&alice).is_ok());
        assert!(svc.get_profile(&bob).is_ok());
    }

    #[test]
    fn test_authorize_deletion_leaves_account_intact() {
        let svc = service();
        let (alice, _, alice_login) = login(&svc, "alice");

        let address = svc
            .authorize_deletion(&alice, &alice_login.jwt_token, true)
            .unwrap();
        assert_eq!(address.as_str(), alice);
        assert!(svc.get_profile(&alice).is_ok());

        let export = svc.delete_authorized(&address, Utc::now()).unwrap();
        assert_eq!(export.agent.name, "alice");
        assert_eq!(
            export.witness_history.last().map(|e| e.action),
            Some(WitnessAction::AccountDeleted)
        );
        assert!(matches!(
            svc.delete_authorized(&address, Utc::now()),
            Err(AccountError::NotFound(_))
        ));
    }

    #[test]
    fn test_end_to_end() {
        let svc = service();
        let (key, public_hex) = keypair();

        let address = svc.register("alice", &public_hex, None).unwrap().address;
        let challenge = svc.request_challenge(address.as_str()).unwrap();
        let sig = sign_challenge(&key, &challenge.challenge).unwrap();
        let verified = svc.verify(address.as_str(), &sig).unwrap();

        let remaining = verified.expires_at - Utc::now();
        assert!(remaining > Duration::hours(23));
        assert!(remaining <= Duration::hours(24));

        assert_eq!(svc.get_profile(address.as_str()).unwrap().name, "alice");

        let export = svc
            .delete_account(address.as_str(), &verified.jwt_token, true)
            .unwrap();
        assert_eq!(export.agent.public_key_hex, public_hex);
        assert_eq!(export.agent.name, "alice");

        let actions: Vec<_> = export.witness_history.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                WitnessAction::Registered,
                WitnessAction::Authenticated,
                WitnessAction::AccountDeleted
            ]
        );

        assert!(matches!(
            svc.get_profile(address.as_str()),
            Err(AccountError::NotFound(_))
        ));
        // Audit trail outlives the identity
        assert_eq!(svc.witness_history(address.as_str()).unwrap().len(), 3);
        assert!(svc.challenges().is_empty());
    }
}
