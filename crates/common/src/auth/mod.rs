//! Identity & access guard
//!
//! Provides:
//! - Session token validation (issued by the external auth service)
//! - Role to permitted-scope resolution
//! - Per-query audit records
//!
//! Downstream components only ever see a [`UserContext`]; raw credentials
//! stop here.

use crate::errors::{EngineError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// User roles for identity-aware data access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Coach,
    Player,
    Analyst,
    Scout,
    Staff,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Coach => "coach",
            UserRole::Player => "player",
            UserRole::Analyst => "analyst",
            UserRole::Scout => "scout",
            UserRole::Staff => "staff",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coach" => Some(UserRole::Coach),
            "player" => Some(UserRole::Player),
            "analyst" => Some(UserRole::Analyst),
            "scout" => Some(UserRole::Scout),
            "staff" => Some(UserRole::Staff),
            _ => None,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data scope tags describing what a role may read.
///
/// Scopes are attached to evidence, table rows, and cache fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Team,
    Player,
    Game,
    Strategy,
    League,
    Opponent,
    Personal,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Team => "team",
            Scope::Player => "player",
            Scope::Game => "game",
            Scope::Strategy => "strategy",
            Scope::League => "league",
            Scope::Opponent => "opponent",
            Scope::Personal => "personal",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permitted scopes per role. One table, consulted only here.
pub fn scopes_for_role(role: UserRole) -> BTreeSet<Scope> {
    use Scope::*;
    let scopes: &[Scope] = match role {
        UserRole::Coach => &[Team, Player, Game, Strategy, Opponent],
        UserRole::Player => &[Personal, Team, Game],
        UserRole::Analyst => &[Team, Player, Game, League, Opponent],
        UserRole::Scout => &[Player, Opponent, League],
        UserRole::Staff => &[Team, Game],
    };
    scopes.iter().copied().collect()
}

/// Resolved caller identity, threaded read-only through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// Stable user identifier from the auth service
    pub user_id: String,

    /// Caller role
    pub role: UserRole,

    /// Scopes this role may read
    pub permitted_scopes: BTreeSet<Scope>,

    /// Session identifier for audit correlation
    pub session_id: String,
}

impl UserContext {
    /// Build a context for a role with its standard scope set
    pub fn for_role(user_id: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            permitted_scopes: scopes_for_role(role),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Check a single scope
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.permitted_scopes.contains(&scope)
    }

    /// Require a scope, returning `PermissionDenied` if absent
    pub fn require_scope(&self, scope: Scope) -> Result<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied {
                message: format!("role '{}' lacks scope '{}'", self.role, scope),
            })
        }
    }

    /// Canonical scope string used in cache fingerprints
    pub fn scope_key(&self) -> String {
        self.permitted_scopes
            .iter()
            .map(Scope::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Session token claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Role name
    pub role: String,

    /// Session ID
    pub sid: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Validates session tokens and resolves them into a [`UserContext`]
pub struct AccessGuard {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl AccessGuard {
    /// Create a guard sharing the session-issuing service's HS256 secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Resolve a bearer token into a user context.
    ///
    /// Fails with `PermissionDenied` on a bad signature or unknown role and
    /// with `ExpiredSession` once the token's lifetime has passed.
    pub fn resolve(&self, token: &str) -> Result<UserContext> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => EngineError::ExpiredSession,
                _ => EngineError::PermissionDenied {
                    message: "invalid session token".to_string(),
                },
            })?;

        let role = UserRole::parse(&claims.role).ok_or_else(|| EngineError::PermissionDenied {
            message: format!("unknown role '{}'", claims.role),
        })?;

        Ok(UserContext {
            user_id: claims.sub,
            role,
            permitted_scopes: scopes_for_role(role),
            session_id: claims.sid,
        })
    }

    /// Issue a session token. The production issuer lives in the external
    /// auth service; this mirrors its claims for tests and local runs.
    pub fn issue_token(&self, user_id: &str, role: UserRole) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = SessionClaims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            sid: Uuid::new_v4().to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            EngineError::Internal {
                message: format!("failed to sign session token: {}", e),
            }
        })
    }
}

/// Extract a bearer token from an Authorization header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Emit the per-query audit record: who asked, and which scopes
/// completed tools actually read.
pub fn emit_audit(query_id: Uuid, user: &UserContext, scopes_used: &BTreeSet<Scope>) {
    let used: Vec<&str> = scopes_used.iter().map(Scope::as_str).collect();
    tracing::info!(
        target: "audit",
        query_id = %query_id,
        user_id = %user.user_id,
        role = %user.role,
        session_id = %user.session_id,
        scopes_used = ?used,
        "query audit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_scope_table() {
        let coach = scopes_for_role(UserRole::Coach);
        assert!(coach.contains(&Scope::Strategy));
        assert!(!coach.contains(&Scope::League));

        let player = scopes_for_role(UserRole::Player);
        assert!(player.contains(&Scope::Personal));
        assert!(!player.contains(&Scope::Opponent));

        let staff = scopes_for_role(UserRole::Staff);
        assert_eq!(staff.len(), 2);
    }

    #[test]
    fn test_token_roundtrip() {
        let guard = AccessGuard::new("test_secret", 3600);

        let token = guard.issue_token("coach_martin", UserRole::Coach).unwrap();
        let ctx = guard.resolve(&token).unwrap();

        assert_eq!(ctx.user_id, "coach_martin");
        assert_eq!(ctx.role, UserRole::Coach);
        assert!(ctx.has_scope(Scope::Opponent));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let guard = AccessGuard::new("test_secret", 3600);
        let other = AccessGuard::new("other_secret", 3600);

        let token = other.issue_token("scout_lapointe", UserRole::Scout).unwrap();
        let err = guard.resolve(&token).unwrap_err();

        assert!(matches!(err, EngineError::PermissionDenied { .. }));
    }

    #[test]
    fn test_require_scope() {
        let ctx = UserContext::for_role("player_suzuki", UserRole::Player);
        assert!(ctx.require_scope(Scope::Personal).is_ok());
        assert!(ctx.require_scope(Scope::Opponent).is_err());
    }

    #[test]
    fn test_scope_key_is_canonical() {
        let a = UserContext::for_role("u1", UserRole::Analyst);
        let b = UserContext::for_role("u2", UserRole::Analyst);
        // Same role, same scope key regardless of user
        assert_eq!(a.scope_key(), b.scope_key());
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer("abc.def"), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }
}
