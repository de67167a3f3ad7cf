use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Process configuration, read once from the environment at startup and
/// immutable afterwards. Every ledger path and tunable lives here.
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Config {
    #[default = "data/price_history.csv"]
    pub price_history_file: String,
    #[default = "data/positions.csv"]
    pub positions_file: String,
    /// Market fee charged on the sell side of a trade.
    #[default = 0.05]
    pub market_fee_rate: f64,
    /// How many closed positions the portfolio summary shows.
    #[default = 5]
    pub closed_positions_shown: usize,
    /// How many rows `/recent` shows.
    #[default = 10]
    pub recent_records_shown: usize,
    #[default = 3050]
    pub web_ui_port: usize,
    /// Chat transport credential. The terminal driver runs without one; a
    /// real transport layer treats "noop" as a fatal startup condition.
    #[default = "noop"]
    pub telegram_bot_token: String,
    #[default = "https://api.futpricecheck.example"]
    pub price_api_base_url: String,
    #[default = "noop"]
    pub price_api_key: String,
}

impl Config {
    pub fn load() -> Self {
        envy::from_env::<Config>().unwrap_or_default()
    }

    pub fn has_price_api(&self) -> bool {
        self.price_api_key != "noop" && !self.price_api_key.is_empty()
    }
}
