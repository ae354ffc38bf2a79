use tracing::{info, warn};

use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    protocol::{LoginRequest, PublicProfile, SignupRequest, UpdateProfileRequest},
};
use uploads::{InlineImage, InlineImageError};

use crate::{internal, password, public_profile, ApiContext};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PROFILE_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Identical wording for unknown email and wrong password, so the response
/// cannot be used to probe which emails have accounts.
const INVALID_CREDENTIALS: &str = "invalid email or password";

pub async fn signup(ctx: &ApiContext, request: &SignupRequest) -> Result<PublicProfile, ApiError> {
    let full_name = request.full_name.trim();
    let email = request.email.trim().to_lowercase();
    let password = request.password.as_str();

    if full_name.is_empty() || email.is_empty() || password.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "all fields are required"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "password must be at least 6 characters",
        ));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::new(ErrorCode::Validation, "invalid email format"));
    }
    if ctx
        .storage
        .find_user_by_email(&email)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Err(ApiError::new(ErrorCode::Conflict, "email already in use"));
    }

    let password_hash = password::hash_password(password).map_err(internal)?;
    let user = ctx
        .storage
        .create_user(&email, full_name, &password_hash)
        .await
        .map_err(internal)?;
    info!(user_id = user.id.0, "user signed up");
    Ok(public_profile(&user))
}

pub async fn login(ctx: &ApiContext, request: &LoginRequest) -> Result<PublicProfile, ApiError> {
    let email = request.email.trim().to_lowercase();
    let password = request.password.as_str();

    if email.is_empty() || password.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "email and password are required",
        ));
    }

    let Some(user) = ctx
        .storage
        .find_user_by_email(&email)
        .await
        .map_err(internal)?
    else {
        return Err(ApiError::new(ErrorCode::Unauthorized, INVALID_CREDENTIALS));
    };

    let matches = password::verify_password(password, &user.password_hash).unwrap_or(false);
    if !matches {
        return Err(ApiError::new(ErrorCode::Unauthorized, INVALID_CREDENTIALS));
    }

    info!(user_id = user.id.0, "user logged in");
    Ok(public_profile(&user))
}

/// Resolves a verified session back to its profile for the auth-check gate.
pub async fn current_user(ctx: &ApiContext, user_id: UserId) -> Result<PublicProfile, ApiError> {
    let user = ctx
        .storage
        .load_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "account no longer exists"))?;
    Ok(public_profile(&user))
}

pub async fn update_profile(
    ctx: &ApiContext,
    user_id: UserId,
    request: &UpdateProfileRequest,
) -> Result<PublicProfile, ApiError> {
    if request.profile_pic.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "profile picture is required",
        ));
    }

    let image =
        InlineImage::parse(&request.profile_pic, MAX_PROFILE_IMAGE_BYTES).map_err(|err| {
            match err {
                InlineImageError::TooLarge { .. } => ApiError::new(
                    ErrorCode::Validation,
                    "file size must be less than 5MB",
                ),
                InlineImageError::Malformed => {
                    ApiError::new(ErrorCode::Validation, "invalid image payload")
                }
            }
        })?;

    let url = ctx
        .images
        .put_image("chat-app/profiles", &image)
        .await
        .map_err(|err| {
            warn!(user_id = user_id.0, error = %err, "profile image upload failed");
            ApiError::new(ErrorCode::Upload, "failed to upload image")
        })?;

    let user = ctx
        .storage
        .update_profile_pic(user_id, &url)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "user not found"))?;
    Ok(public_profile(&user))
}

fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty()
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
