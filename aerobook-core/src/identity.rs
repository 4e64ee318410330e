//! Caller identity resolved by the boundary layer and passed explicitly into
//! every operation that needs it.

use serde::{Deserialize, Serialize};

use crate::models::{Booking, UserId};
use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Manager,
    Admin,
}

/// Which bookings a caller may see and touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Own,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

/// Proof that the caller passed an admin check. Privileged operations take
/// one by value, so they cannot be invoked without the check.
#[derive(Debug)]
pub struct AdminGrant {
    pub granted_to: UserId,
    _private: (),
}

impl Principal {
    pub fn new(user_id: UserId, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            username: username.into(),
            role,
        }
    }

    pub fn scope(&self) -> Scope {
        match self.role {
            Role::Customer => Scope::Own,
            Role::Manager | Role::Admin => Scope::All,
        }
    }

    pub fn authorize_booking_access(&self, booking: &Booking) -> CoreResult<()> {
        match self.scope() {
            Scope::All => Ok(()),
            Scope::Own if booking.user_id == self.user_id => Ok(()),
            Scope::Own => {
                tracing::warn!(
                    user_id = %self.user_id,
                    booking_id = %booking.id,
                    "Denied access to foreign booking"
                );
                Err(CoreError::Forbidden(format!(
                    "booking {} belongs to another user",
                    booking.id
                )))
            }
        }
    }

    /// Customers may only act for themselves.
    pub fn authorize_user(&self, user_id: UserId) -> CoreResult<()> {
        if self.scope() == Scope::Own && user_id != self.user_id {
            return Err(CoreError::Forbidden(
                "cannot act on behalf of another user".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_admin(&self) -> CoreResult<AdminGrant> {
        if self.role == Role::Admin {
            Ok(AdminGrant {
                granted_to: self.user_id,
                _private: (),
            })
        } else {
            Err(CoreError::Forbidden("admin role required".to_string()))
        }
    }

    /// Managers and admins run flight operations, booking edits and
    /// deletes, and payment cancels.
    pub fn require_staff(&self) -> CoreResult<()> {
        match self.role {
            Role::Manager | Role::Admin => Ok(()),
            Role::Customer => Err(CoreError::Forbidden("staff role required".to_string())),
        }
    }
}
