use super::*;
use crate::test_support::{test_context, test_context_with_images, FailingImageStore};
use std::sync::Arc;

fn signup_request(email: &str) -> SignupRequest {
    SignupRequest {
        full_name: "Ada Lovelace".to_string(),
        email: email.to_string(),
        password: "secret-password".to_string(),
    }
}

#[tokio::test]
async fn signup_returns_profile_without_credential_field() {
    let ctx = test_context().await;
    let profile = signup(&ctx, &signup_request("Ada@Example.com "))
        .await
        .expect("signup");

    assert_eq!(profile.email, "ada@example.com");
    assert_eq!(profile.full_name, "Ada Lovelace");

    let value = serde_json::to_value(&profile).expect("serialize");
    let rendered = value.to_string();
    assert!(!rendered.contains("password"));
    assert!(!rendered.contains("hash"));
}

#[tokio::test]
async fn signup_rejects_missing_fields_short_password_and_bad_email() {
    let ctx = test_context().await;

    let mut request = signup_request("ada@example.com");
    request.full_name = "   ".to_string();
    let err = signup(&ctx, &request).await.expect_err("missing name");
    assert!(matches!(err.code, ErrorCode::Validation));

    let mut request = signup_request("ada@example.com");
    request.password = "short".to_string();
    let err = signup(&ctx, &request).await.expect_err("short password");
    assert!(matches!(err.code, ErrorCode::Validation));
    assert_eq!(err.message, "password must be at least 6 characters");

    for bad in ["no-at-sign", "a@b", "a@.tld", "a@tld.", "a b@c.io", "@c.io"] {
        let err = signup(&ctx, &signup_request(bad)).await.expect_err(bad);
        assert!(matches!(err.code, ErrorCode::Validation), "{bad}");
        assert_eq!(err.message, "invalid email format", "{bad}");
    }
}

#[tokio::test]
async fn signup_rejects_duplicate_email_case_insensitively() {
    let ctx = test_context().await;
    signup(&ctx, &signup_request("ada@example.com"))
        .await
        .expect("first");

    let err = signup(&ctx, &signup_request("ADA@EXAMPLE.COM"))
        .await
        .expect_err("duplicate");
    assert!(matches!(err.code, ErrorCode::Conflict));
    assert_eq!(err.message, "email already in use");
}

#[tokio::test]
async fn login_succeeds_with_correct_password() {
    let ctx = test_context().await;
    let created = signup(&ctx, &signup_request("ada@example.com"))
        .await
        .expect("signup");

    let profile = login(
        &ctx,
        &LoginRequest {
            email: " ADA@example.com".to_string(),
            password: "secret-password".to_string(),
        },
    )
    .await
    .expect("login");
    assert_eq!(profile.id, created.id);
}

#[tokio::test]
async fn login_failure_message_is_identical_for_unknown_email_and_wrong_password() {
    let ctx = test_context().await;
    signup(&ctx, &signup_request("ada@example.com"))
        .await
        .expect("signup");

    let unknown_email = login(
        &ctx,
        &LoginRequest {
            email: "nobody@example.com".to_string(),
            password: "secret-password".to_string(),
        },
    )
    .await
    .expect_err("unknown email");

    let wrong_password = login(
        &ctx,
        &LoginRequest {
            email: "ada@example.com".to_string(),
            password: "not-the-password".to_string(),
        },
    )
    .await
    .expect_err("wrong password");

    assert!(matches!(unknown_email.code, ErrorCode::Unauthorized));
    assert!(matches!(wrong_password.code, ErrorCode::Unauthorized));
    assert_eq!(unknown_email.message, wrong_password.message);
}

#[tokio::test]
async fn current_user_resolves_profile_or_unauthorized() {
    let ctx = test_context().await;
    let created = signup(&ctx, &signup_request("ada@example.com"))
        .await
        .expect("signup");

    let profile = current_user(&ctx, created.id).await.expect("present");
    assert_eq!(profile.id, created.id);

    let err = current_user(&ctx, UserId(9999)).await.expect_err("gone");
    assert!(matches!(err.code, ErrorCode::Unauthorized));
}

#[tokio::test]
async fn update_profile_stores_url_from_blob_sink() {
    let ctx = test_context().await;
    let created = signup(&ctx, &signup_request("ada@example.com"))
        .await
        .expect("signup");

    let updated = update_profile(
        &ctx,
        created.id,
        &UpdateProfileRequest {
            profile_pic: "data:image/png;base64,aGVsbG8=".to_string(),
        },
    )
    .await
    .expect("update");
    assert_eq!(updated.profile_pic, "https://img.test/chat-app/profiles/fixed");
}

#[tokio::test]
async fn update_profile_rejects_oversized_and_failed_uploads() {
    let ctx = test_context().await;
    let created = signup(&ctx, &signup_request("ada@example.com"))
        .await
        .expect("signup");

    let oversized = "A".repeat(MAX_PROFILE_IMAGE_BYTES + 1);
    let err = update_profile(
        &ctx,
        created.id,
        &UpdateProfileRequest { profile_pic: oversized },
    )
    .await
    .expect_err("too large");
    assert!(matches!(err.code, ErrorCode::Validation));
    assert_eq!(err.message, "file size must be less than 5MB");

    let failing = test_context_with_images(Arc::new(FailingImageStore)).await;
    let created = signup(&failing, &signup_request("bob@example.com"))
        .await
        .expect("signup");
    let err = update_profile(
        &failing,
        created.id,
        &UpdateProfileRequest {
            profile_pic: "data:image/png;base64,aGVsbG8=".to_string(),
        },
    )
    .await
    .expect_err("sink offline");
    assert!(matches!(err.code, ErrorCode::Upload));
    assert_eq!(err.message, "failed to upload image");
}
