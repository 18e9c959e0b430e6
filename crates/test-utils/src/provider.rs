//! In-memory provider implementing the store contracts the core depends on,
//! including the compare-and-set semantics, plus stub identity proofing and
//! credential encoding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use pid_crypto::PublicKeyJwk;
use serde_json::json;
use uuid::Uuid;

use pid_openid::issuer::{
    Nonce, PidData, PinRetryCounter, RegisteredClient, SeedData, Step,
};
use pid_openid::provider::{
    ClientRegistry, CredentialEncoder, CredentialSigner, IdentityProofing, NonceStore,
    PinCounterStore, Result, SessionStore, StoreError,
};
use pid_openid::session::{CorrelationKey, Session};

use crate::{keys, CLIENT_ID};

/// In-memory issuance environment for tests.
#[derive(Clone, Debug, Default)]
pub struct Provider {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
    nonces: Arc<Mutex<HashMap<String, Nonce>>>,
    pin_counters: Arc<Mutex<HashMap<String, PinRetryCounter>>>,
    clients: Arc<Mutex<HashMap<String, RegisteredClient>>>,
    identifications: Arc<Mutex<Vec<String>>>,
}

impl Provider {
    /// Create a provider with the default test wallet registered.
    #[must_use]
    pub fn new() -> Self {
        let provider = Self::default();
        provider.add_client(RegisteredClient {
            client_id: CLIENT_ID.into(),
            attestation_key: keys::jwk(&keys::client_key()),
        });
        provider
    }

    /// Register an additional client.
    pub fn add_client(&self, client: RegisteredClient) {
        self.clients
            .lock()
            .expect("should lock")
            .insert(client.client_id.clone(), client);
    }

    /// Issuer-state values identification was started for, in order.
    #[must_use]
    pub fn begun_identifications(&self) -> Vec<String> {
        self.identifications.lock().expect("should lock").clone()
    }

    /// Snapshot the live session currently holding `value` under `key`.
    #[must_use]
    pub fn session_snapshot(&self, key: CorrelationKey, value: &str) -> Option<Session> {
        let now = Utc::now();
        self.sessions
            .lock()
            .expect("should lock")
            .values()
            .find(|s| s.correlation_value(key) == Some(value) && !s.is_expired(now))
            .cloned()
    }

    // Correlation values must stay unique across live sessions.
    fn collides(
        sessions: &HashMap<Uuid, Session>, candidate: &Session, now: DateTime<Utc>,
    ) -> bool {
        sessions.values().any(|other| {
            other.id != candidate.id
                && !other.is_expired(now)
                && CorrelationKey::ALL.iter().any(|key| {
                    let value = candidate.correlation_value(*key);
                    value.is_some() && other.correlation_value(*key) == value
                })
        })
    }
}

impl pid_openid::provider::Provider for Provider {}

impl SessionStore for Provider {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.lock().expect("should lock");
        if Self::collides(&sessions, session, Utc::now()) {
            return Err(StoreError::Duplicate);
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find(&self, key: CorrelationKey, value: &str) -> Result<Session> {
        let now = Utc::now();
        self.sessions
            .lock()
            .expect("should lock")
            .values()
            .find(|s| s.correlation_value(key) == Some(value) && !s.is_expired(now))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, session: &Session, guard: Step) -> Result<()> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().expect("should lock");
        let stored = sessions.get(&session.id).ok_or(StoreError::NotFound)?;
        if stored.is_expired(now) {
            return Err(StoreError::NotFound);
        }
        if stored.next_expected_step != guard {
            return Err(StoreError::Conflict);
        }
        if Self::collides(&sessions, session, now) {
            return Err(StoreError::Duplicate);
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.lock().expect("should lock");
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

impl NonceStore for Provider {
    async fn insert(&self, nonce: &Nonce) -> Result<()> {
        let mut nonces = self.nonces.lock().expect("should lock");
        if nonces.contains_key(&nonce.value) {
            return Err(StoreError::Duplicate);
        }
        nonces.insert(nonce.value.clone(), nonce.clone());
        Ok(())
    }

    async fn consume(&self, value: &str, now: DateTime<Utc>) -> Result<Nonce> {
        let mut nonces = self.nonces.lock().expect("should lock");
        let nonce = nonces.get_mut(value).ok_or(StoreError::NotFound)?;
        if nonce.is_expired(now) {
            return Err(StoreError::Expired);
        }
        if nonce.used {
            return Err(StoreError::Replayed);
        }
        nonce.used = true;
        Ok(nonce.clone())
    }

    async fn purge_expired_nonces(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut nonces = self.nonces.lock().expect("should lock");
        let before = nonces.len();
        nonces.retain(|_, n| !n.is_expired(now));
        Ok((before - nonces.len()) as u64)
    }
}

impl PinCounterStore for Provider {
    async fn put_counter(&self, counter: &PinRetryCounter) -> Result<()> {
        self.pin_counters
            .lock()
            .expect("should lock")
            .insert(counter.digest.clone(), counter.clone());
        Ok(())
    }

    async fn find_counter(&self, digest: &str, now: DateTime<Utc>) -> Result<PinRetryCounter> {
        let counters = self.pin_counters.lock().expect("should lock");
        let counter = counters.get(digest).ok_or(StoreError::NotFound)?;
        if counter.expires_at <= now {
            return Err(StoreError::Expired);
        }
        Ok(counter.clone())
    }

    async fn increment_counter(
        &self, digest: &str, expected_next: u32, now: DateTime<Utc>,
    ) -> Result<PinRetryCounter> {
        let mut counters = self.pin_counters.lock().expect("should lock");
        let counter = counters.get_mut(digest).ok_or(StoreError::NotFound)?;
        if counter.expires_at <= now {
            return Err(StoreError::Expired);
        }
        if counter.value + 1 != expected_next {
            return Err(StoreError::Conflict);
        }
        counter.value = expected_next;
        Ok(counter.clone())
    }

    async fn purge_expired_pin_counters(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut counters = self.pin_counters.lock().expect("should lock");
        let before = counters.len();
        counters.retain(|_, c| c.expires_at > now);
        Ok((before - counters.len()) as u64)
    }
}

impl ClientRegistry for Provider {
    async fn client(&self, client_id: &str) -> anyhow::Result<Option<RegisteredClient>> {
        Ok(self.clients.lock().expect("should lock").get(client_id).cloned())
    }
}

impl IdentityProofing for Provider {
    async fn begin_identification(
        &self, issuer_state: &str, redirect_url: &str,
    ) -> anyhow::Result<String> {
        self.identifications.lock().expect("should lock").push(issuer_state.to_owned());
        Ok(format!(
            "https://eid.example.com/start?issuer_state={issuer_state}&redirect_uri={redirect_url}"
        ))
    }
}

impl CredentialEncoder for Provider {
    async fn issue_credential(
        &self, data: &PidData, holder_key: &PublicKeyJwk, signer: CredentialSigner<'_>,
    ) -> anyhow::Result<String> {
        let payload = json!({"iss": "test-encoder", "pid": data, "cnf": {"jwk": holder_key}});
        let encoded = Base64UrlUnpadded::encode_string(payload.to_string().as_bytes());
        match signer {
            CredentialSigner::Issuer => Ok(format!("{encoded}.issuer-signed")),
            CredentialSigner::DesignatedVerifier(signer) => {
                let tag = signer.sign(encoded.as_bytes());
                Ok(format!("{encoded}.{}", Base64UrlUnpadded::encode_string(&tag)))
            }
        }
    }

    async fn issue_seed(&self, seed: &SeedData) -> anyhow::Result<String> {
        let encoded = Base64UrlUnpadded::encode_string(serde_json::to_string(seed)?.as_bytes());
        Ok(format!("seed.{encoded}"))
    }

    async fn decode_seed(&self, seed: &str) -> anyhow::Result<SeedData> {
        let encoded = seed.strip_prefix("seed.").ok_or_else(|| anyhow!("not a seed credential"))?;
        let raw = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|_| anyhow!("seed credential is not base64url"))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
