use std::sync::Arc;

use async_trait::async_trait;

use crate::{presence::PresenceRegistry, session::SessionKeys, ApiContext};
use storage::Storage;
use uploads::{ImageStore, InlineImage};

pub struct StaticImageStore;

#[async_trait]
impl ImageStore for StaticImageStore {
    async fn put_image(&self, folder: &str, _image: &InlineImage) -> anyhow::Result<String> {
        Ok(format!("https://img.test/{folder}/fixed"))
    }
}

pub struct FailingImageStore;

#[async_trait]
impl ImageStore for FailingImageStore {
    async fn put_image(&self, _folder: &str, _image: &InlineImage) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("sink offline"))
    }
}

pub async fn test_context() -> ApiContext {
    test_context_with_images(Arc::new(StaticImageStore)).await
}

pub async fn test_context_with_images(images: Arc<dyn ImageStore>) -> ApiContext {
    ApiContext {
        storage: Storage::new("sqlite::memory:").await.expect("db"),
        images,
        presence: Arc::new(PresenceRegistry::new()),
        sessions: SessionKeys::new("test-secret"),
    }
}
