use super::auth::{open_authenticated, Authenticator};
use super::session::{disconnect, exec};
use super::settings::SessionSettings;
use super::{run_blocking, CommandChannel, CommandResult, SessionOptions};
use crate::error::AppResult;
use async_trait::async_trait;
use ssh2::Session as Ssh2Session;
use std::sync::Arc;

/// One authenticated transport reused for a sequence of commands.
///
/// Exclusively owned; `&mut self` keeps commands sequential. A transport that
/// dropped between commands is reopened transparently.
pub struct CommandSession {
    session: Option<Ssh2Session>,
    settings: Arc<SessionSettings>,
    auth: Arc<Authenticator>,
    options: SessionOptions,
}

impl CommandSession {
    pub async fn connect(
        settings: Arc<SessionSettings>,
        auth: Arc<Authenticator>,
        options: SessionOptions,
    ) -> AppResult<Self> {
        let (s, a, o) = (settings.clone(), auth.clone(), options.clone());
        let session = run_blocking(&options.cancel, move || open_authenticated(&s, &o, &a)).await?;

        Ok(Self {
            session: Some(session),
            settings,
            auth,
            options,
        })
    }

    pub fn settings(&self) -> &Arc<SessionSettings> {
        &self.settings
    }

    async fn run(&mut self, command: &str) -> AppResult<CommandResult> {
        let current = self.session.take();
        let settings = self.settings.clone();
        let auth = self.auth.clone();
        let options = self.options.clone();
        let command = command.to_string();

        let (session, result) = run_blocking(&self.options.cancel, move || {
            let session = match current {
                Some(session) if session.keepalive_send().is_ok() => session,
                stale => {
                    if stale.is_some() {
                        tracing::warn!("Connection to {} dropped, reconnecting", settings.display_target());
                    }
                    open_authenticated(&settings, &options, &auth)?
                }
            };
            let result = exec(&session, &command);
            Ok((session, result))
        })
        .await?;

        self.session = Some(session);
        result
    }

    /// Close the transport now instead of on drop
    pub fn close(mut self) {
        if let Some(session) = self.session.take() {
            disconnect(&session);
        }
    }
}

#[async_trait]
impl CommandChannel for CommandSession {
    async fn try_execute_command(&mut self, command: &str) -> AppResult<CommandResult> {
        self.run(command).await
    }
}

impl Drop for CommandSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            disconnect(&session);
        }
    }
}
