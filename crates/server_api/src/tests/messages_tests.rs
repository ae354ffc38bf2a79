use super::*;
use crate::test_support::{test_context, test_context_with_images, FailingImageStore};
use crate::{auth, ApiContext};
use shared::protocol::SignupRequest;
use std::sync::Arc;
use tokio::sync::mpsc;

async fn user(ctx: &ApiContext, email: &str, name: &str) -> UserId {
    auth::signup(
        ctx,
        &SignupRequest {
            full_name: name.to_string(),
            email: email.to_string(),
            password: "secret-password".to_string(),
        },
    )
    .await
    .expect("signup")
    .id
}

fn text_message(text: &str) -> SendMessageRequest {
    SendMessageRequest {
        text: Some(text.to_string()),
        image: None,
    }
}

#[tokio::test]
async fn rejects_message_with_neither_text_nor_image() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;
    let bob = user(&ctx, "bob@example.com", "Bob").await;

    for request in [
        SendMessageRequest::default(),
        SendMessageRequest {
            text: Some(String::new()),
            image: Some(String::new()),
        },
    ] {
        let err = send_message(&ctx, ada, bob, &request)
            .await
            .expect_err("empty");
        assert!(matches!(err.code, ErrorCode::Validation));
        assert_eq!(err.message, "message must contain text or image");
    }
}

#[tokio::test]
async fn rejects_malformed_receiver_before_store_lookup() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;

    let err = send_message(&ctx, ada, UserId(0), &text_message("hi"))
        .await
        .expect_err("bad id");
    assert!(matches!(err.code, ErrorCode::Validation));
}

#[tokio::test]
async fn rejects_unknown_receiver_with_not_found() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;

    let err = send_message(&ctx, ada, UserId(9999), &text_message("hi"))
        .await
        .expect_err("absent");
    assert!(matches!(err.code, ErrorCode::NotFound));
    assert_eq!(err.message, "receiver not found");
}

#[tokio::test]
async fn send_then_fetch_round_trips_in_order() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;
    let bob = user(&ctx, "bob@example.com", "Bob").await;

    let first = send_message(&ctx, ada, bob, &text_message("hi"))
        .await
        .expect("send");
    assert!(first.id.0 > 0);
    let second = send_message(&ctx, bob, ada, &text_message("hello"))
        .await
        .expect("send");

    let history = conversation(&ctx, ada, bob).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], first);
    assert_eq!(history[1], second);
}

#[tokio::test]
async fn online_receiver_gets_push_with_full_payload() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;
    let bob = user(&ctx, "bob@example.com", "Bob").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = ctx.presence.connect(tx);
    ctx.presence.register(bob, conn);
    rx.try_recv().expect("register broadcast");

    let sent = send_message(&ctx, ada, bob, &text_message("hi"))
        .await
        .expect("send");

    let ServerEvent::NewMessage(pushed) = rx.try_recv().expect("push") else {
        panic!("expected newMessage push");
    };
    assert_eq!(pushed, sent);
    assert_eq!(pushed.sender_id, ada);
    assert_eq!(pushed.receiver_id, bob);
    assert_eq!(pushed.text, "hi");
}

#[tokio::test]
async fn offline_receiver_still_gets_durable_message() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;
    let bob = user(&ctx, "bob@example.com", "Bob").await;

    let sent = send_message(&ctx, ada, bob, &text_message("hi"))
        .await
        .expect("send");

    let history = conversation(&ctx, bob, ada).await.expect("history");
    assert_eq!(history, vec![sent]);
}

#[tokio::test]
async fn dropped_receiver_connection_does_not_fail_the_send() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;
    let bob = user(&ctx, "bob@example.com", "Bob").await;

    let (tx, rx) = mpsc::unbounded_channel();
    let conn = ctx.presence.connect(tx);
    ctx.presence.register(bob, conn);
    drop(rx);

    send_message(&ctx, ada, bob, &text_message("hi"))
        .await
        .expect("push failure is swallowed");
}

#[tokio::test]
async fn message_image_is_uploaded_and_url_persisted() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;
    let bob = user(&ctx, "bob@example.com", "Bob").await;

    let sent = send_message(
        &ctx,
        ada,
        bob,
        &SendMessageRequest {
            text: None,
            image: Some("data:image/png;base64,aGVsbG8=".to_string()),
        },
    )
    .await
    .expect("send");
    assert_eq!(sent.text, "");
    assert_eq!(
        sent.image.as_deref(),
        Some("https://img.test/chat-app/messages/fixed")
    );
}

#[tokio::test]
async fn oversized_image_and_sink_failure_map_to_client_errors() {
    let ctx = test_context().await;
    let ada = user(&ctx, "ada@example.com", "Ada").await;
    let bob = user(&ctx, "bob@example.com", "Bob").await;

    let oversized = SendMessageRequest {
        text: None,
        image: Some("A".repeat(MAX_MESSAGE_IMAGE_BYTES + 1)),
    };
    let err = send_message(&ctx, ada, bob, &oversized)
        .await
        .expect_err("too large");
    assert!(matches!(err.code, ErrorCode::Validation));
    assert_eq!(err.message, "image size must be less than 10MB");

    let failing = test_context_with_images(Arc::new(FailingImageStore)).await;
    let ada = user(&failing, "ada2@example.com", "Ada").await;
    let bob = user(&failing, "bob2@example.com", "Bob").await;
    let err = send_message(
        &failing,
        ada,
        bob,
        &SendMessageRequest {
            text: None,
            image: Some("data:image/png;base64,aGVsbG8=".to_string()),
        },
    )
    .await
    .expect_err("sink offline");
    assert!(matches!(err.code, ErrorCode::Upload));

    let history = conversation(&failing, ada, bob).await.expect("history");
    assert!(history.is_empty(), "failed upload must not persist a message");
}
