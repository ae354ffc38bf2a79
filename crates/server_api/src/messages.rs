use tracing::warn;

use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    protocol::{MessagePayload, PublicProfile, SendMessageRequest, ServerEvent},
};
use storage::StoredMessage;
use uploads::{InlineImage, InlineImageError};

use crate::{internal, public_profile, ApiContext};

pub const MAX_MESSAGE_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub fn message_payload(message: &StoredMessage) -> MessagePayload {
    MessagePayload {
        id: message.id,
        sender_id: message.sender_id,
        receiver_id: message.receiver_id,
        text: message.text.clone(),
        image: message.image.clone(),
        created_at: message.created_at,
    }
}

pub async fn roster(ctx: &ApiContext, me: UserId) -> Result<Vec<PublicProfile>, ApiError> {
    let users = ctx.storage.list_users_except(me).await.map_err(internal)?;
    Ok(users.iter().map(public_profile).collect())
}

pub async fn conversation(
    ctx: &ApiContext,
    me: UserId,
    other: UserId,
) -> Result<Vec<MessagePayload>, ApiError> {
    if other.0 <= 0 {
        return Err(ApiError::new(ErrorCode::Validation, "invalid user id"));
    }
    let messages = ctx
        .storage
        .conversation_between(me, other)
        .await
        .map_err(internal)?;
    Ok(messages.iter().map(message_payload).collect())
}

/// Validates, persists, then notifies. The checks run in a fixed order and
/// the first failure wins. The push at the end is best-effort only: by then
/// the message is durable and the sender gets it back either way.
pub async fn send_message(
    ctx: &ApiContext,
    sender: UserId,
    receiver: UserId,
    request: &SendMessageRequest,
) -> Result<MessagePayload, ApiError> {
    let text = request.text.as_deref().unwrap_or("");
    let image_payload = request.image.as_deref().filter(|payload| !payload.is_empty());

    if text.is_empty() && image_payload.is_none() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "message must contain text or image",
        ));
    }
    if receiver.0 <= 0 {
        return Err(ApiError::new(ErrorCode::Validation, "invalid receiver id"));
    }
    let receiver_user = ctx
        .storage
        .load_user(receiver)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "receiver not found"))?;

    let image_url = match image_payload {
        Some(payload) => Some(upload_message_image(ctx, sender, payload).await?),
        None => None,
    };

    let stored = ctx
        .storage
        .insert_message(sender, receiver_user.id, text, image_url.as_deref())
        .await
        .map_err(internal)?;
    let payload = message_payload(&stored);

    // At most one delivery attempt, no acknowledgement; an offline or
    // failing connection learns about the message on its next history fetch.
    if let Some(tx) = ctx.presence.lookup(receiver_user.id) {
        let _ = tx.send(ServerEvent::NewMessage(payload.clone()));
    }

    Ok(payload)
}

async fn upload_message_image(
    ctx: &ApiContext,
    sender: UserId,
    payload: &str,
) -> Result<String, ApiError> {
    let image = InlineImage::parse(payload, MAX_MESSAGE_IMAGE_BYTES).map_err(|err| match err {
        InlineImageError::TooLarge { .. } => ApiError::new(
            ErrorCode::Validation,
            "image size must be less than 10MB",
        ),
        InlineImageError::Malformed => ApiError::new(ErrorCode::Validation, "invalid image payload"),
    })?;

    ctx.images
        .put_image("chat-app/messages", &image)
        .await
        .map_err(|err| {
            warn!(sender_id = sender.0, error = %err, "message image upload failed");
            ApiError::new(ErrorCode::Upload, "failed to upload image")
        })
}

#[cfg(test)]
#[path = "tests/messages_tests.rs"]
mod tests;
