use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::{
    commands::{AUTH, RELEASE, VERIFY},
    dispatch::{Dispatcher, Envelope, Params},
    domain::SessionKey,
    errors::Error,
    transport::port::Method,
    Result,
};

/// Owns the bot's session with the bridge.
///
/// - one key per manager, created by [`SessionManager::authenticate`]
/// - attached to every other command as `sessionKey`
/// - dropped on a login failure so the next command re-authenticates
pub struct SessionManager {
    api: Dispatcher,
    auth_key: String,
    bot_id: String,
    key: Mutex<Option<SessionKey>>,
}

impl SessionManager {
    pub fn new(api: Dispatcher, auth_key: impl Into<String>, bot_id: impl Into<String>) -> Self {
        Self {
            api,
            auth_key: auth_key.into(),
            bot_id: bot_id.into(),
            key: Mutex::new(None),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.key.lock().await.is_some()
    }

    /// Run the handshake now, replacing any cached key.
    pub async fn authenticate(&self) -> Result<SessionKey> {
        let mut guard = self.key.lock().await;
        let key = self.handshake().await?;
        *guard = Some(key.clone());
        Ok(key)
    }

    /// Cached key, authenticating first if there is none.
    pub async fn current(&self) -> Result<SessionKey> {
        let mut guard = self.key.lock().await;
        if let Some(key) = guard.as_ref() {
            return Ok(key.clone());
        }
        let key = self.handshake().await?;
        *guard = Some(key.clone());
        Ok(key)
    }

    pub async fn invalidate(&self) {
        self.key.lock().await.take();
    }

    /// Send a command with the session attached.
    ///
    /// No retry: a login failure only clears the session before propagating.
    pub async fn call(&self, method: Method, path: &str, mut params: Params) -> Result<Envelope> {
        let key = self.current().await?;
        params.insert("sessionKey".to_string(), Value::String(key.0));

        match self.api.send(method, path, params).await {
            Err(e) if e.is_login() => {
                warn!(code = e.code(), "session rejected by remote; will re-authenticate");
                self.invalidate().await;
                Err(e)
            }
            other => other,
        }
    }

    /// Best-effort logout. Never fails; errors are logged.
    pub async fn release(&self) {
        let Some(key) = self.key.lock().await.take() else {
            return;
        };

        let params = params(json!({ "sessionKey": key.0, "qq": self.bot_id }));
        match self.api.send(Method::POST, RELEASE, params).await {
            Ok(_) => debug!("session released"),
            Err(e) => error!(
                "[seat-connector][mirai] {} : failed to release session: {}",
                e.code(),
                e
            ),
        }
    }

    async fn handshake(&self) -> Result<SessionKey> {
        let env = self
            .api
            .send(
                Method::POST,
                AUTH,
                params(json!({ "authKey": self.auth_key })),
            )
            .await?;

        let session = env
            .field("session")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Command {
                code: -1,
                message: "auth response carried no session".to_string(),
            })?;
        let key = SessionKey(session.to_string());

        self.api
            .send(
                Method::POST,
                VERIFY,
                params(json!({ "sessionKey": key.0, "qq": self.bot_id })),
            )
            .await?;

        debug!(bot = %self.bot_id, "session established");
        Ok(key)
    }
}

fn params(v: Value) -> Params {
    match v {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}
