pub mod auth;

pub use auth::{AuthGuard, AuthenticatedRequester, RequesterLookup, StaticTokenVerifier, TokenVerifier};
