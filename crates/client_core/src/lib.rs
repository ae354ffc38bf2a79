use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;
use url::Url;

use shared::{
    domain::UserId,
    error::ApiError,
    protocol::{
        LoginRequest, MessagePayload, PublicProfile, SendMessageRequest, ServerEvent,
        SignupRequest, UpdateProfileRequest,
    },
};

pub mod store;

pub use store::{ChatState, ConversationPhase, MergeOutcome, UNREAD_DISPLAY_CEILING};

/// Upper bound on every REST call; beyond it the request fails and the
/// failure surfaces as a transient error event.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum ClientEvent {
    AuthChanged(Option<PublicProfile>),
    RosterUpdated(Vec<PublicProfile>),
    OnlineUsers(Vec<UserId>),
    MessageAppended(MessagePayload),
    UnreadChanged { user_id: UserId, count: u32 },
    ConversationLoaded { user_id: UserId, count: usize },
    Error(String),
}

/// Client-side half of the chat system: REST calls for auth, roster,
/// history, and sends; a websocket reader for push events; and the
/// reconciliation state that merges the two without duplication.
pub struct ChatClient {
    http: Client,
    base_url: String,
    state: Mutex<ChatState>,
    events: broadcast::Sender<ClientEvent>,
    ws_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Result<Arc<Self>> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).context("invalid server url")?;
        let http = Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (events, _) = broadcast::channel(256);
        Ok(Arc::new(Self {
            http,
            base_url,
            state: Mutex::new(ChatState::new()),
            events,
            ws_task: Mutex::new(None),
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn signup(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<PublicProfile> {
        let response = self
            .http
            .post(format!("{}/api/auth/signup", self.base_url))
            .json(&SignupRequest {
                full_name: full_name.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let profile: PublicProfile = expect_json(response)
            .await
            .map_err(|err| self.emit_error(err))?;
        self.set_auth_user(Some(profile.clone())).await;
        Ok(profile)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<PublicProfile> {
        let response = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let profile: PublicProfile = expect_json(response)
            .await
            .map_err(|err| self.emit_error(err))?;
        self.set_auth_user(Some(profile.clone())).await;
        Ok(profile)
    }

    pub async fn logout(&self) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/auth/logout", self.base_url))
            .send()
            .await?;
        let _: serde_json::Value = expect_json(response)
            .await
            .map_err(|err| self.emit_error(err))?;
        self.disconnect().await;
        {
            let mut state = self.state.lock().await;
            state.reset();
        }
        let _ = self.events.send(ClientEvent::AuthChanged(None));
        Ok(())
    }

    /// The startup auth gate: always resolves to authenticated or anonymous
    /// so the caller can render either way. Transport failures count as
    /// anonymous and surface as an error event.
    pub async fn check_auth(&self) -> Option<PublicProfile> {
        let result: Result<PublicProfile> = async {
            let response = self
                .http
                .get(format!("{}/api/auth/check", self.base_url))
                .send()
                .await?;
            expect_json(response).await
        }
        .await;

        match result {
            Ok(profile) => {
                self.set_auth_user(Some(profile.clone())).await;
                Some(profile)
            }
            Err(err) => {
                warn!(error = %err, "auth check resolved anonymous");
                self.set_auth_user(None).await;
                None
            }
        }
    }

    pub async fn update_profile(&self, profile_pic: &str) -> Result<PublicProfile> {
        let response = self
            .http
            .put(format!("{}/api/auth/update-profile", self.base_url))
            .json(&UpdateProfileRequest {
                profile_pic: profile_pic.to_string(),
            })
            .send()
            .await?;
        let profile: PublicProfile = expect_json(response)
            .await
            .map_err(|err| self.emit_error(err))?;
        self.set_auth_user(Some(profile.clone())).await;
        Ok(profile)
    }

    /// Opens the realtime channel for the logged-in user and starts folding
    /// push events into local state. A second call supersedes the first
    /// connection's reader.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let user_id = { self.state.lock().await.auth_user.as_ref().map(|u| u.id) }
            .ok_or_else(|| anyhow!("not logged in"))?;
        let ws_url = websocket_url(&self.base_url, user_id)?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (_, mut reader) = ws_stream.split();

        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => client.handle_server_event(&text).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = client
                            .events
                            .send(ClientEvent::Error(format!("websocket receive failed: {err}")));
                        break;
                    }
                }
            }
        });

        let previous = self.ws_task.lock().await.replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(task) = self.ws_task.lock().await.take() {
            task.abort();
        }
    }

    pub async fn fetch_users(&self) -> Result<Vec<PublicProfile>> {
        let response = self
            .http
            .get(format!("{}/api/messages/users", self.base_url))
            .send()
            .await?;
        let users: Vec<PublicProfile> = expect_json(response)
            .await
            .map_err(|err| self.emit_error(err))?;
        {
            let mut state = self.state.lock().await;
            state.users = users.clone();
        }
        let _ = self.events.send(ClientEvent::RosterUpdated(users.clone()));
        Ok(users)
    }

    /// Opens the conversation with `user_id`: unread reset, history fetch,
    /// wholesale replacement. A fetch that resolves after the selection has
    /// moved on is dropped rather than applied to the wrong conversation.
    pub async fn select_user(&self, user_id: UserId) -> Result<()> {
        let generation = { self.state.lock().await.begin_history_fetch(user_id) };
        let _ = self
            .events
            .send(ClientEvent::UnreadChanged { user_id, count: 0 });

        let fetched: Result<Vec<MessagePayload>> = async {
            let response = self
                .http
                .get(format!("{}/api/messages/{}", self.base_url, user_id.0))
                .send()
                .await?;
            expect_json(response).await
        }
        .await;

        match fetched {
            Ok(history) => {
                let count = history.len();
                let applied = {
                    self.state
                        .lock()
                        .await
                        .finish_history_fetch(generation, user_id, Some(history))
                };
                if applied {
                    let _ = self
                        .events
                        .send(ClientEvent::ConversationLoaded { user_id, count });
                }
                Ok(())
            }
            Err(err) => {
                self.state
                    .lock()
                    .await
                    .finish_history_fetch(generation, user_id, None);
                Err(self.emit_error(err))
            }
        }
    }

    pub async fn clear_selection(&self) {
        self.state.lock().await.clear_selection();
    }

    /// Sends to the selected user. No optimistic echo: the list is appended
    /// only once the server responds with the persisted message, under its
    /// server-assigned id.
    pub async fn send_message(&self, text: &str, image: Option<String>) -> Result<MessagePayload> {
        let receiver = { self.state.lock().await.selected_user }
            .ok_or_else(|| self.emit_error(anyhow!("no user selected")))?;
        if text.is_empty() && image.as_deref().map_or(true, str::is_empty) {
            return Err(self.emit_error(anyhow!("message cannot be empty")));
        }

        let response = self
            .http
            .post(format!("{}/api/messages/send/{}", self.base_url, receiver.0))
            .json(&SendMessageRequest {
                text: Some(text.to_string()),
                image,
            })
            .send()
            .await?;
        let message: MessagePayload = expect_json(response)
            .await
            .map_err(|err| self.emit_error(err))?;

        let appended = { self.state.lock().await.append_sent_message(message.clone()) };
        if appended {
            let _ = self.events.send(ClientEvent::MessageAppended(message.clone()));
        }
        Ok(message)
    }

    // Snapshot accessors for UI layers.

    pub async fn auth_user(&self) -> Option<PublicProfile> {
        self.state.lock().await.auth_user.clone()
    }

    pub async fn users(&self) -> Vec<PublicProfile> {
        self.state.lock().await.users.clone()
    }

    pub async fn messages(&self) -> Vec<MessagePayload> {
        self.state.lock().await.messages.clone()
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        let state = self.state.lock().await;
        let mut ids: Vec<UserId> = state.online_users.iter().copied().collect();
        ids.sort();
        ids
    }

    pub async fn phase(&self) -> ConversationPhase {
        self.state.lock().await.phase()
    }

    pub async fn unread_count(&self, user_id: UserId) -> u32 {
        self.state.lock().await.unread_count(user_id)
    }

    pub async fn unread_badge(&self, user_id: UserId) -> Option<String> {
        self.state.lock().await.unread_badge(user_id)
    }

    async fn set_auth_user(&self, profile: Option<PublicProfile>) {
        {
            let mut state = self.state.lock().await;
            state.auth_user = profile.clone();
        }
        let _ = self.events.send(ClientEvent::AuthChanged(profile));
    }

    async fn handle_server_event(&self, text: &str) {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(err) => {
                let _ = self
                    .events
                    .send(ClientEvent::Error(format!("invalid server event: {err}")));
                return;
            }
        };

        match event {
            ServerEvent::GetOnlineUsers(ids) => {
                {
                    let mut state = self.state.lock().await;
                    state.online_users = ids.iter().copied().collect();
                }
                let _ = self.events.send(ClientEvent::OnlineUsers(ids));
            }
            ServerEvent::NewMessage(message) => {
                let outcome = { self.state.lock().await.merge_pushed_message(message.clone()) };
                match outcome {
                    MergeOutcome::Appended => {
                        let _ = self.events.send(ClientEvent::MessageAppended(message));
                    }
                    MergeOutcome::CountedUnread { user_id, count } => {
                        let _ = self
                            .events
                            .send(ClientEvent::UnreadChanged { user_id, count });
                    }
                    MergeOutcome::Duplicate | MergeOutcome::Discarded => {}
                }
            }
        }
    }

    fn emit_error(&self, err: anyhow::Error) -> anyhow::Error {
        let _ = self.events.send(ClientEvent::Error(err.to_string()));
        err
    }
}

/// Pulls the server's error message out of a failed response so the
/// transient notification shows what the server said, not a status code.
async fn expect_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let message = response
            .json::<ApiError>()
            .await
            .map(|err| err.message)
            .unwrap_or_else(|_| format!("request failed with status {status}"));
        Err(anyhow!(message))
    }
}

fn websocket_url(base_url: &str, user_id: UserId) -> Result<String> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("server url must start with http:// or https://"));
    };
    Ok(format!("{ws_base}/ws?userId={}", user_id.0))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
