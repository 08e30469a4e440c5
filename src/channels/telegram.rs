//! Telegram channel — long-polling based.
//!
//! Talks to the Bot API directly via reqwest (no SDK). Typed messages and
//! inline-keyboard callback taps both land on the bus as inbound
//! messages; outbound messages optionally carry an inline keyboard (the
//! weekday picker). Transient poll errors back off exponentially via
//! `RetryPolicy`; 401/403 aborts the channel.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::bus::{Button, InboundMessage, OutboundMessage};
use crate::channels::{Channel, RetryPolicy, RetryState};
use crate::config::TelegramConfig;

const API_BASE: &str = "https://api.telegram.org/bot";

pub struct TelegramChannel {
    config: TelegramConfig,
    inbound_tx: mpsc::Sender<InboundMessage>,
    outbound_rx: Option<broadcast::Receiver<OutboundMessage>>,
    client: reqwest::Client,
    running: bool,
}

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
    callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgCallbackQuery {
    id: String,
    from: TgUser,
    message: Option<TgMessage>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

/// 401/403 mean bad credentials and are never worth retrying.
fn is_unrecoverable_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 401 | 403)
}

fn keyboard_json(keyboard: &[Vec<Button>]) -> serde_json::Value {
    let rows: Vec<Vec<serde_json::Value>> = keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| serde_json::json!({ "text": b.label, "callback_data": b.data }))
                .collect()
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

async fn send_message(
    client: &reqwest::Client,
    token: &str,
    chat_id: i64,
    msg: &OutboundMessage,
) -> Result<()> {
    let url = format!("{}{}/sendMessage", API_BASE, token);
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": msg.content,
    });
    if !msg.keyboard.is_empty() {
        body["reply_markup"] = keyboard_json(&msg.keyboard);
    }
    let resp = client.post(&url).json(&body).send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("sendMessage failed with HTTP {status}: {text}");
    }
    Ok(())
}

impl TelegramChannel {
    pub fn new(
        config: TelegramConfig,
        inbound_tx: mpsc::Sender<InboundMessage>,
        outbound_rx: broadcast::Receiver<OutboundMessage>,
    ) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().timeout(std::time::Duration::from_secs(60));
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            config,
            inbound_tx,
            outbound_rx: Some(outbound_rx),
            client: builder.build()?,
            running: false,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}{}/{}", API_BASE, self.config.token, method)
    }

    /// One getUpdates call; the caller classifies the error as transient
    /// vs unrecoverable.
    async fn poll_updates(&self, offset: i64) -> Result<Vec<TgUpdate>, TelegramPollError> {
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[("offset", offset), ("timeout", 30)])
            .send()
            .await
            .map_err(|e| TelegramPollError::Transient(format!("HTTP request failed: {e:#}")))?;

        let status = response.status();
        if is_unrecoverable_status(status) {
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramPollError::Unrecoverable(format!(
                "HTTP {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramPollError::Transient(format!("HTTP {status}: {body}")));
        }

        let resp: TgResponse<Vec<TgUpdate>> = response
            .json()
            .await
            .map_err(|e| TelegramPollError::Transient(format!("JSON parse error: {e:#}")))?;

        if !resp.ok {
            let code = resp.error_code.unwrap_or(0);
            let desc = resp.description.unwrap_or_default();
            if code == 401 || code == 403 {
                return Err(TelegramPollError::Unrecoverable(format!(
                    "Telegram API error {code}: {desc}"
                )));
            }
            return Err(TelegramPollError::Transient(format!(
                "Telegram API error {code}: {desc}"
            )));
        }

        Ok(resp.result.unwrap_or_default())
    }

    async fn forward_update(&self, update: TgUpdate) {
        if let Some(cq) = update.callback_query {
            // acknowledge the tap so the client stops its spinner
            let _ = self
                .client
                .post(self.api_url("answerCallbackQuery"))
                .json(&serde_json::json!({ "callback_query_id": cq.id }))
                .send()
                .await;

            let sender = cq.from.id.to_string();
            if !self.is_allowed(&sender, &self.config.allow_from) {
                warn!(sender, "access denied");
                return;
            }
            let Some(chat_id) = cq.message.map(|m| m.chat.id.to_string()) else {
                return;
            };
            if let Some(data) = cq.data {
                let _ = self
                    .inbound_tx
                    .send(InboundMessage::button_tap("telegram", &sender, &chat_id, data))
                    .await;
            }
            return;
        }

        if let Some(m) = update.message {
            let sender = m.from.map(|u| u.id.to_string()).unwrap_or_default();
            if !self.is_allowed(&sender, &self.config.allow_from) {
                warn!(sender, "access denied");
                return;
            }
            if let Some(text) = m.text {
                let _ = self
                    .inbound_tx
                    .send(InboundMessage::text(
                        "telegram",
                        &sender,
                        &m.chat.id.to_string(),
                        text,
                    ))
                    .await;
            }
        }
    }
}

/// Distinguishes transient from unrecoverable poll errors.
#[derive(Debug)]
enum TelegramPollError {
    Transient(String),
    Unrecoverable(String),
}

impl std::fmt::Display for TelegramPollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "transient: {msg}"),
            Self::Unrecoverable(msg) => write!(f, "unrecoverable: {msg}"),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&mut self) -> Result<()> {
        info!("Telegram channel starting (long-polling)");
        self.running = true;
        let mut offset: i64 = 0;

        let retry_policy = RetryPolicy::default();
        let mut retry_state = RetryState::new();

        // Outbound dispatcher: deliveries and router replies both arrive
        // on the broadcast bus.
        let mut outbound_rx = match self.outbound_rx.take() {
            Some(rx) => rx,
            None => anyhow::bail!("Telegram channel already started"),
        };
        let client = self.client.clone();
        let token = self.config.token.clone();
        tokio::spawn(async move {
            while let Ok(msg) = outbound_rx.recv().await {
                if msg.channel != "telegram" {
                    continue;
                }
                let Ok(chat_id) = msg.chat_id.parse::<i64>() else {
                    warn!(chat_id = %msg.chat_id, "non-numeric chat id, dropping message");
                    continue;
                };
                if let Err(e) = send_message(&client, &token, chat_id, &msg).await {
                    warn!(chat_id, "send failed: {e:#}");
                }
            }
        });

        // Poll loop with backoff on transient errors.
        while self.running {
            match self.poll_updates(offset).await {
                Ok(updates) => {
                    retry_state.reset();
                    for u in updates {
                        offset = u.update_id + 1;
                        self.forward_update(u).await;
                    }
                }
                Err(TelegramPollError::Unrecoverable(msg)) => {
                    error!(error = %msg, "Telegram unrecoverable error, stopping channel");
                    self.running = false;
                    return Err(anyhow::anyhow!("Telegram channel stopped: {msg}"));
                }
                Err(TelegramPollError::Transient(msg)) => {
                    if retry_state.record_failure(&retry_policy, &msg) {
                        let delay = retry_state.next_delay(&retry_policy);
                        warn!(
                            error = %msg,
                            delay_ms = delay.as_millis() as u64,
                            "Telegram poll error, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(
                            cooldown_secs = retry_policy.max_delay.as_secs(),
                            "Telegram retries exhausted, cooling down before reconnect"
                        );
                        tokio::time::sleep(retry_policy.max_delay).await;
                        retry_state.reset();
                    }
                }
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let chat_id: i64 = msg.chat_id.parse()?;
        send_message(&self.client, &self.config.token, chat_id, msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_json_shape_matches_bot_api() {
        let kb = vec![
            vec![Button::new("Mon", "day:Mon"), Button::new("Tue", "day:Tue")],
            vec![Button::new("✅ done", "day:done")],
        ];
        let v = keyboard_json(&kb);
        assert_eq!(v["inline_keyboard"][0][1]["callback_data"], "day:Tue");
        assert_eq!(v["inline_keyboard"][1][0]["text"], "✅ done");
    }

    #[test]
    fn update_with_callback_query_deserializes() {
        let json = r#"{
            "update_id": 7,
            "callback_query": {
                "id": "abc",
                "from": { "id": 42 },
                "message": { "chat": { "id": 42 }, "text": "Pick weekday(s):" },
                "data": "day:Wed"
            }
        }"#;
        let u: TgUpdate = serde_json::from_str(json).unwrap();
        let cq = u.callback_query.unwrap();
        assert_eq!(cq.from.id, 42);
        assert_eq!(cq.data.as_deref(), Some("day:Wed"));
    }

    #[test]
    fn unrecoverable_statuses() {
        assert!(is_unrecoverable_status(reqwest::StatusCode::UNAUTHORIZED));
        assert!(is_unrecoverable_status(reqwest::StatusCode::FORBIDDEN));
        assert!(!is_unrecoverable_status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        ));
    }
}
