use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

/// Decoded inline image payload as clients send it: either a
/// `data:<mime>;base64,<data>` URI or bare base64.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InlineImageError {
    #[error("image payload exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
    #[error("image payload is not valid base64 image data")]
    Malformed,
}

impl InlineImage {
    /// The size bound applies to the payload as received, before decoding,
    /// so an oversized body is rejected without base64 work.
    pub fn parse(payload: &str, max_bytes: usize) -> Result<Self, InlineImageError> {
        if payload.len() > max_bytes {
            return Err(InlineImageError::TooLarge { max_bytes });
        }
        if payload.is_empty() {
            return Err(InlineImageError::Malformed);
        }

        let (content_type, data) = match payload.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',').ok_or(InlineImageError::Malformed)?;
                let mime = header
                    .strip_suffix(";base64")
                    .ok_or(InlineImageError::Malformed)?;
                let mime = if mime.is_empty() {
                    "application/octet-stream"
                } else {
                    mime
                };
                (mime.to_string(), data)
            }
            None => ("application/octet-stream".to_string(), payload),
        };

        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|_| InlineImageError::Malformed)?;
        Ok(Self {
            bytes: Bytes::from(bytes),
            content_type,
        })
    }
}

/// Opaque URL-returning blob sink. Implementations store the image payload
/// durably and hand back a retrieval URL.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put_image(&self, folder: &str, image: &InlineImage) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct S3ImageStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3ImageStore {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
        public_base_url: &str,
    ) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ))
            .endpoint_url(endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn put_image(&self, folder: &str, image: &InlineImage) -> anyhow::Result<String> {
        let key = format!(
            "{}/{}{}",
            folder.trim_matches('/'),
            uuid::Uuid::new_v4(),
            extension_for(&image.content_type)
        );
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(image.bytes.clone()))
            .content_type(&image.content_type)
            .send()
            .await
            .context("s3 put_object")?;
        debug!(key = %key, size = image.bytes.len(), "image stored");
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        _ => "",
    }
}
