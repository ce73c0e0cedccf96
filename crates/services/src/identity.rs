//! Authenticated identity supplied by the host environment.

use async_trait::async_trait;
use survey_core::model::UserId;

use crate::error::IdentityError;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Unauthenticated` when nobody is signed in.
    async fn current_user(&self) -> Result<UserId, IdentityError>;
}

/// Identity fixed at construction, e.g. from a command-line flag.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<UserId>,
}

impl StaticIdentity {
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self { user: Some(user) }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Result<UserId, IdentityError> {
        self.user.clone().ok_or(IdentityError::Unauthenticated)
    }
}
