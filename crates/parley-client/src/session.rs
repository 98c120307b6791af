//! The signed-in user, injected into the engine at construction.

use parley_shared::types::Username;

/// Yields the current username, or `None` when nobody is signed in.
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<Username>;
}

/// A session fixed for the lifetime of the engine.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    user: Option<Username>,
}

impl StaticSession {
    pub fn signed_in(user: Username) -> Self {
        Self { user: Some(user) }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<Username> {
        self.user.clone()
    }
}
