use std::sync::Arc;

use shared::error::{ApiError, ErrorCode};
use shared::protocol::PublicProfile;
use storage::{Storage, StoredUser};
use uploads::ImageStore;

pub mod auth;
pub mod messages;
pub mod password;
pub mod presence;
pub mod session;

use presence::PresenceRegistry;
use session::SessionKeys;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub images: Arc<dyn ImageStore>,
    pub presence: Arc<PresenceRegistry>,
    pub sessions: SessionKeys,
}

pub fn public_profile(user: &StoredUser) -> PublicProfile {
    PublicProfile {
        id: user.id,
        email: user.email.clone(),
        full_name: user.full_name.clone(),
        profile_pic: user.profile_pic.clone(),
        created_at: user.created_at,
    }
}

/// Adapter failures are logged with full detail and reported to the client
/// as a generic internal error.
fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(error = %err, "internal service error");
    ApiError::new(ErrorCode::Internal, "internal server error")
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
