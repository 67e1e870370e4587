use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::RentalStore;
use crate::error::{AppError, AppResult};
use crate::models::RequesterRecord;

/// Requester resolved from a bearer token.
#[derive(Clone, Debug)]
pub struct AuthenticatedRequester {
    pub requester_id: i64,
    pub name: String,
    pub active: bool,
    pub delinquent: bool,
}

impl From<RequesterRecord> for AuthenticatedRequester {
    fn from(r: RequesterRecord) -> Self {
        Self {
            requester_id: r.id,
            name: r.name,
            active: r.active,
            delinquent: r.delinquent,
        }
    }
}

/// Turns a raw token into the requester id it was issued for.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<i64>;
}

#[async_trait]
pub trait RequesterLookup: Send + Sync {
    async fn find_requester(&self, id: i64) -> AppResult<Option<RequesterRecord>>;
}

#[async_trait]
impl<S: RentalStore + ?Sized> RequesterLookup for Arc<S> {
    async fn find_requester(&self, id: i64) -> AppResult<Option<RequesterRecord>> {
        match self.get_requester(id).await {
            Ok(r) => Ok(Some(r)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Fixed token table, for service accounts and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, i64>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, requester_id: i64) -> Self {
        self.tokens.insert(token.into(), requester_id);
        self
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<i64> {
        self.tokens.get(token).copied()
    }
}

/// Resolves the `Authorization` header of a call into a requester.
/// Both collaborators are handed in; the guard keeps no global state.
pub struct AuthGuard<V, L> {
    verifier: V,
    lookup: L,
}

impl<V: TokenVerifier, L: RequesterLookup> AuthGuard<V, L> {
    pub fn new(verifier: V, lookup: L) -> Self {
        Self { verifier, lookup }
    }

    pub async fn authenticate(&self, authorization: Option<&str>) -> AppResult<AuthenticatedRequester> {
        let token = authorization
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        let Some(requester_id) = self.verifier.verify(token) else {
            tracing::warn!("Rejected unknown bearer token");
            return Err(AppError::Unauthenticated);
        };

        match self.lookup.find_requester(requester_id).await? {
            Some(requester) => Ok(requester.into()),
            None => {
                tracing::warn!("Token refers to missing requester {}", requester_id);
                Err(AppError::Unauthenticated)
            }
        }
    }
}
