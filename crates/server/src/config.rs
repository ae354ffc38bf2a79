use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub client_origin: String,
    pub jwt_secret: String,
    pub environment: String,
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_region: String,
    pub s3_public_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:5001".into(),
            database_url: "sqlite://./data/chat.db".into(),
            client_origin: "http://localhost:5173".into(),
            jwt_secret: "dev-secret-change-me".into(),
            environment: "development".into(),
            s3_endpoint: "http://127.0.0.1:9000".into(),
            s3_bucket: "chat-app".into(),
            s3_access_key: "devkey".into(),
            s3_secret_key: "devsecret".into(),
            s3_region: "us-east-1".into(),
            s3_public_base_url: "http://127.0.0.1:9000/chat-app".into(),
        }
    }
}

impl Settings {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.server_bind = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("client_origin") {
                settings.client_origin = v.clone();
            }
            if let Some(v) = file_cfg.get("jwt_secret") {
                settings.jwt_secret = v.clone();
            }
            if let Some(v) = file_cfg.get("environment") {
                settings.environment = v.clone();
            }
            if let Some(v) = file_cfg.get("s3_endpoint") {
                settings.s3_endpoint = v.clone();
            }
            if let Some(v) = file_cfg.get("s3_bucket") {
                settings.s3_bucket = v.clone();
            }
            if let Some(v) = file_cfg.get("s3_public_base_url") {
                settings.s3_public_base_url = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("CLIENT_URL") {
        settings.client_origin = v;
    }
    if let Ok(v) = std::env::var("JWT_SECRET") {
        settings.jwt_secret = v;
    }
    if let Ok(v) = std::env::var("APP_ENV") {
        settings.environment = v;
    }

    if let Ok(v) = std::env::var("S3_ENDPOINT") {
        settings.s3_endpoint = v;
    }
    if let Ok(v) = std::env::var("S3_BUCKET") {
        settings.s3_bucket = v;
    }
    if let Ok(v) = std::env::var("S3_ACCESS_KEY") {
        settings.s3_access_key = v;
    }
    if let Ok(v) = std::env::var("S3_SECRET_KEY") {
        settings.s3_secret_key = v;
    }
    if let Ok(v) = std::env::var("S3_REGION") {
        settings.s3_region = v;
    }
    if let Ok(v) = std::env::var("S3_PUBLIC_BASE_URL") {
        settings.s3_public_base_url = v;
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
