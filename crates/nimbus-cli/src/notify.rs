//! Slack notifications on deploy/destroy/upgrade completion: a single
//! attachment with a colour and a status line, built through `slack_hook`.

use std::env;

use slack_hook::{AttachmentBuilder, PayloadBuilder, Slack};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("NIMBUS_SLACK_HOOK_URL not set")]
    MissingHookUrl,
    #[error("NIMBUS_SLACK_CHANNEL not set")]
    MissingChannel,
    #[error("failed to build slack payload: {0}")]
    Build(String),
    #[error("failed to send slack message: {0}")]
    Send(String),
}

pub struct Notification {
    pub text: String,
    pub color: &'static str,
    pub stack_key: String,
}

impl Notification {
    pub fn success(stack_key: &str, action: &str) -> Self {
        Notification { text: format!("`{action}` on stack `{stack_key}` completed"), color: "good", stack_key: stack_key.to_string() }
    }

    pub fn failure(stack_key: &str, action: &str, reason: &str) -> Self {
        Notification { text: format!("`{action}` on stack `{stack_key}` failed: {reason}"), color: "danger", stack_key: stack_key.to_string() }
    }
}

fn env_hook_url() -> Result<String, NotifyError> {
    env::var("NIMBUS_SLACK_HOOK_URL").map_err(|_| NotifyError::MissingHookUrl)
}

fn env_channel() -> Result<String, NotifyError> {
    env::var("NIMBUS_SLACK_CHANNEL").map_err(|_| NotifyError::MissingChannel)
}

fn env_username() -> String {
    env::var("NIMBUS_SLACK_NAME").unwrap_or_else(|_| "nimbus".to_string())
}

pub fn have_credentials() -> bool {
    env_hook_url().is_ok() && env_channel().is_ok()
}

pub fn send(notification: Notification) -> Result<(), NotifyError> {
    let hook_url = env_hook_url()?;
    let channel = env_channel()?;
    let username = env_username();

    let slack = Slack::new(hook_url.as_str()).map_err(|e| NotifyError::Build(e.to_string()))?;
    let attachment = AttachmentBuilder::new(notification.text.clone())
        .color(notification.color)
        .text(vec![slack_hook::SlackTextContent::Text(notification.text.into())].as_slice())
        .build()
        .map_err(|e| NotifyError::Build(e.to_string()))?;

    let payload = PayloadBuilder::new()
        .channel(channel)
        .icon_emoji(":cloud:")
        .username(username)
        .attachments(vec![attachment])
        .build()
        .map_err(|e| NotifyError::Build(e.to_string()))?;

    slack.send(&payload).map_err(|e| NotifyError::Send(e.to_string()))
}

/// Never fails the caller's operation over a notification failure; logs
/// and moves on (spec.md §4.7 hooks follow the same "one failure doesn't
/// stop the rest" rule, notifications are lower-stakes still).
pub fn notify_best_effort(notification: Notification) {
    if !have_credentials() {
        return;
    }
    let stack_key = notification.stack_key.clone();
    if let Err(e) = send(notification) {
        log::warn!("slack notification for stack '{stack_key}' failed: {e}");
    }
}
