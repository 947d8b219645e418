//! # Outcome Classification
//!
//! The explicit classifier that maps every remote result into one of four
//! outcomes. Keeping this a single pure function is what guarantees
//! transient and semantic failures are never conflated: the state machine
//! in `millbook-core` only ever sees the classification, never raw status
//! codes.
//!
//! ## Classification Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Remote result                      │  Outcome    │  State effect       │
//! │  ───────────────────────────────────┼─────────────┼──────────────────   │
//! │  Ok, success                        │  Success    │  → Synced           │
//! │  Ok, 401 / 403                      │  Auth       │  release, abort pass│
//! │  Ok, 400 / 404 / 409 / 410 / 422   │  Conflict   │  → Conflict         │
//! │  Ok, 408 / 429 / 5xx / other       │  Transient  │  retry w/ backoff   │
//! │  Err(Network) / Err(Timeout)        │  Transient  │  retry w/ backoff   │
//! │  Err(Server)                        │  Transient  │  retry w/ backoff   │
//! │  Err(Validation)                    │  Conflict   │  → Conflict         │
//! │  Err(Auth)                          │  Auth       │  release, abort pass│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! 404 on an update means the entity was deleted server-side: a semantic
//! disagreement, not something a retry can fix. Retrying an unchanged
//! payload against any of the Conflict rows would conflict forever.

use crate::remote::{RemoteFailure, RemoteResponse};

/// The classified result of one remote call.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The remote accepted the mutation; the response may carry
    /// server-assigned identities and canonical fields.
    Success(RemoteResponse),

    /// Worth retrying after a backoff window.
    Transient(String),

    /// Semantic disagreement; terminal until manually resolved.
    Conflict(String),

    /// The session is dead; every further call this pass would fail the
    /// same way.
    Auth(String),
}

/// Classifies a remote call result.
pub fn classify_outcome(result: Result<RemoteResponse, RemoteFailure>) -> SyncOutcome {
    match result {
        Ok(response) if response.success => SyncOutcome::Success(response),
        Ok(response) => {
            let message = response
                .message
                .unwrap_or_else(|| format!("remote rejected with status {}", response.status_code));
            match response.status_code {
                401 | 403 => SyncOutcome::Auth(message),
                400 | 404 | 409 | 410 | 422 => SyncOutcome::Conflict(message),
                _ => SyncOutcome::Transient(message),
            }
        }
        Err(failure) => match failure {
            RemoteFailure::Network(m) | RemoteFailure::Timeout(m) | RemoteFailure::Server(m) => {
                SyncOutcome::Transient(m)
            }
            RemoteFailure::Validation(m) => SyncOutcome::Conflict(m),
            RemoteFailure::Auth(m) => SyncOutcome::Auth(m),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(code: u16) -> Result<RemoteResponse, RemoteFailure> {
        Ok(RemoteResponse::rejected(code, format!("status {code}")))
    }

    #[test]
    fn test_success() {
        let outcome = classify_outcome(Ok(RemoteResponse::ok()));
        assert!(matches!(outcome, SyncOutcome::Success(_)));
    }

    #[test]
    fn test_semantic_rejections_become_conflict() {
        for code in [400, 404, 409, 410, 422] {
            assert!(
                matches!(classify_outcome(rejected(code)), SyncOutcome::Conflict(_)),
                "status {code}"
            );
        }
    }

    #[test]
    fn test_server_side_trouble_is_transient() {
        for code in [408, 429, 500, 502, 503] {
            assert!(
                matches!(classify_outcome(rejected(code)), SyncOutcome::Transient(_)),
                "status {code}"
            );
        }
    }

    #[test]
    fn test_auth_is_distinct() {
        assert!(matches!(
            classify_outcome(rejected(401)),
            SyncOutcome::Auth(_)
        ));
        assert!(matches!(
            classify_outcome(Err(RemoteFailure::Auth("expired".into()))),
            SyncOutcome::Auth(_)
        ));
    }

    #[test]
    fn test_transport_failures() {
        assert!(matches!(
            classify_outcome(Err(RemoteFailure::Network("refused".into()))),
            SyncOutcome::Transient(_)
        ));
        assert!(matches!(
            classify_outcome(Err(RemoteFailure::Timeout("30s".into()))),
            SyncOutcome::Transient(_)
        ));
        assert!(matches!(
            classify_outcome(Err(RemoteFailure::Validation("duplicate phone".into()))),
            SyncOutcome::Conflict(_)
        ));
    }
}
