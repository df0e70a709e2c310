use std::path::PathBuf;

pub const DEFAULT_LOG_DIR: &str = "data/logs";
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

/// Side-channel toggles, resolved once at startup and handed to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverConfig {
    pub action_log: bool,
    pub error_log: bool,
    pub url_log: bool,
    pub log_dir: PathBuf,
    pub telegram: Option<TelegramConfig>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            action_log: true,
            error_log: true,
            url_log: true,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            telegram: None,
        }
    }
}

impl ObserverConfig {
    pub fn disabled() -> Self {
        Self {
            action_log: false,
            error_log: false,
            url_log: false,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key)
                .map(|value| value.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(true)
        };
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let log_dir = non_empty("STORYBOOKIFY_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));

        let telegram = match (
            non_empty("TELEGRAM_BOT_TOKEN"),
            non_empty("TELEGRAM_CHAT_ID"),
        ) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig {
                bot_token,
                chat_id,
                api_base: non_empty("STORYBOOKIFY_TELEGRAM_API")
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_owned()),
            }),
            _ => None,
        };

        Self {
            action_log: flag("ENABLE_ACTION_LOG"),
            error_log: flag("ENABLE_ERROR_LOG"),
            url_log: flag("ENABLE_URL_LOG"),
            log_dir,
            telegram,
        }
    }
}
