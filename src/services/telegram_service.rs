use teloxide::prelude::*;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::TelegramConfig;

/// Forwards change batches to one Telegram chat.
pub struct TelegramService {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramService {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot: Bot::new(&config.token),
            chat_id: ChatId(config.chat_id),
        }
    }

    pub async fn send(&self, text: String) -> Result<(), teloxide::RequestError> {
        self.bot.send_message(self.chat_id, text).await?;
        Ok(())
    }

    pub async fn start(self, mut rx: broadcast::Receiver<String>) {
        info!("Starting Telegram Notification Service");

        loop {
            match rx.recv().await {
                Ok(msg) => {
                    // A failed delivery is logged; the next batch is still attempted.
                    if let Err(e) = self.send(msg).await {
                        error!("Failed to send Telegram message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    error!("Telegram service lagged behind. Missed {} messages.", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Telegram notification channel closed. Stopping service.");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stops_when_the_channel_closes() {
        let service = TelegramService::new(&TelegramConfig {
            token: "123456:TEST".to_string(),
            chat_id: 42,
        });
        assert_eq!(service.chat_id, ChatId(42));

        let (tx, rx) = broadcast::channel::<String>(4);
        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(5), service.start(rx))
            .await
            .unwrap();
    }
}
