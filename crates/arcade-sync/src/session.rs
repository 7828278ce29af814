//! Who this client is.

use arcade_room::UserId;

/// The signed-in user, passed explicitly to everything that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub current_user_id: UserId,
}

impl SessionContext {
    pub fn new(current_user_id: impl Into<UserId>) -> Self {
        Self {
            current_user_id: current_user_id.into(),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.current_user_id
    }
}
