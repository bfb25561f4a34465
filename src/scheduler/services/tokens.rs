//! Token pool management: linking, listing, and revoking user tokens.

use super::SchedulingResult;
use crate::scheduler::{
    domain::{Backend, InstanceName, Token, TokenId, TokenScope, TokenSecret, UserId},
    ports::SchedulerStore,
};
use mockable::Clock;
use std::sync::Arc;

/// Request payload for linking a token to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTokenRequest {
    user: UserId,
    backend: String,
    instance: Option<String>,
    secret: TokenSecret,
    max_concurrent_jobs: Option<u32>,
}

impl LinkTokenRequest {
    /// Creates a request with required token fields.
    #[must_use]
    pub fn new(user: UserId, backend: impl Into<String>, secret: TokenSecret) -> Self {
        Self {
            user,
            backend: backend.into(),
            instance: None,
            secret,
            max_concurrent_jobs: None,
        }
    }

    /// Restricts the token to one service instance.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Overrides the backend's default concurrency cap.
    #[must_use]
    pub const fn with_max_concurrent_jobs(mut self, cap: u32) -> Self {
        self.max_concurrent_jobs = Some(cap);
        self
    }
}

/// User token management service.
#[derive(Clone)]
pub struct TokenService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> TokenService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    /// Creates a new token service.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Links a token to a user. The token is ready immediately.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError`] when the backend or instance is
    /// invalid, the cap is zero, or the store rejects the token.
    pub async fn link(&self, request: LinkTokenRequest) -> SchedulingResult<Token> {
        let LinkTokenRequest {
            user,
            backend,
            instance,
            secret,
            max_concurrent_jobs,
        } = request;

        let backend_kind = Backend::try_from(backend.as_str())?;
        let scope = match instance {
            Some(name) => TokenScope::instance(backend_kind, InstanceName::new(name)?),
            None => TokenScope::backend(backend_kind),
        };
        let mut token = Token::new(user, scope, secret, &*self.clock);
        if let Some(cap) = max_concurrent_jobs {
            token = token.with_max_concurrent_jobs(cap)?;
        }
        self.store.store_token(&token).await?;
        tracing::info!(
            token_id = %token.id(),
            user_id = %user,
            scope = %token.scope(),
            fingerprint = %token.secret().fingerprint(),
            "linked token"
        );
        Ok(token)
    }

    /// Revokes a user's token. Jobs it was bound to lose it.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when the user holds no such
    /// token or persistence fails.
    pub async fn revoke(&self, user: UserId, token: TokenId) -> SchedulingResult<()> {
        self.store.revoke_token(user, token).await?;
        tracing::info!(token_id = %token, user_id = %user, "revoked token");
        Ok(())
    }

    /// Lists a user's tokens, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence lookup
    /// fails.
    pub async fn list(&self, user: UserId) -> SchedulingResult<Vec<Token>> {
        Ok(self.store.list_tokens(user).await?)
    }
}
