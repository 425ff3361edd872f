pub mod check_service;
pub mod telegram_service;

pub use check_service::{CheckRound, CheckRoundService, RoundReport};
pub use telegram_service::TelegramService;
