//! Authentication claims carried by bearer tokens.
//!
//! Tokens are issued by the identity service; this crate only needs to read
//! who is acting so the ledger can stamp it on every record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ActorId;

/// JWT claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (acting user ID).
    pub sub: ActorId,
    /// User's role, informational only here.
    pub role: String,
    /// Issued at timestamp.
    pub iat: i64,
    /// Expiration timestamp.
    pub exp: i64,
}

impl Claims {
    /// Creates new claims for a user.
    #[must_use]
    pub fn new(actor_id: ActorId, role: &str, expires_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            sub: actor_id,
            role: role.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        }
    }

    /// Returns the acting user from claims.
    #[must_use]
    pub const fn actor_id(&self) -> ActorId {
        self.sub
    }
}
