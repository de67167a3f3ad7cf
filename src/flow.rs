use std::collections::HashMap;

use regex::Regex;
use tracing::{error, info};

use crate::config::Config;
use crate::error::LedgerError;
use crate::ledger::{self, Platform, PriceLedger, normalize_subject, parse_price};
use crate::positions::{PortfolioSummary, PositionBook, TradePosition};
use crate::tip::{self, TradeTip};

/// What the user is in the middle of doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Log an observed price and get a trade tip.
    Quote,
    /// Open a position at the entered price.
    Buy,
    /// Close the latest open position at the entered price.
    Sell,
}

impl Intent {
    fn verb(&self) -> &'static str {
        match self {
            Intent::Quote => "check",
            Intent::Buy => "buy",
            Intent::Sell => "sell",
        }
    }
}

/// Explicit conversation state, one per session. Each prompt expects exactly
/// the payload its variant carries; there are no stringly-typed flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Idle,
    AwaitingPlayer {
        intent: Intent,
    },
    AwaitingPlatform {
        intent: Intent,
        player: String,
    },
    AwaitingPrice {
        intent: Intent,
        player: String,
        platform: Platform,
    },
}

/// Transport-agnostic conversation layer. Consumes lines of user text keyed
/// by an opaque session id and returns reply text; the core ledgers only ever
/// see validated subject/price/platform values.
pub struct ChatFlow {
    ledger: PriceLedger,
    positions: PositionBook,
    recent_limit: usize,
    closed_limit: usize,
    price_re: Regex,
    sessions: HashMap<String, ChatState>,
}

impl ChatFlow {
    pub fn new(config: &Config) -> Self {
        Self {
            ledger: PriceLedger::new(&config.price_history_file),
            positions: PositionBook::new(&config.positions_file, config.market_fee_rate),
            recent_limit: config.recent_records_shown,
            closed_limit: config.closed_positions_shown,
            price_re: Regex::new(r"^\d{1,3}(?:[.,]\d{3})*$|^\d+$").unwrap(),
            sessions: HashMap::new(),
        }
    }

    pub fn state(&self, session: &str) -> ChatState {
        self.sessions.get(session).cloned().unwrap_or_default()
    }

    pub fn handle_message(&mut self, session: &str, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return "Say a player name, or /start for the list of commands.".to_string();
        }

        if let Some(command) = text.strip_prefix('/') {
            return self.handle_command(session, command);
        }

        let state = self.state(session);
        match state {
            ChatState::Idle => {
                // Free text outside a dialogue starts a price check for that player.
                let player = normalize_subject(text);
                self.sessions.insert(
                    session.to_string(),
                    ChatState::AwaitingPlatform {
                        intent: Intent::Quote,
                        player: player.clone(),
                    },
                );
                format!("🔍 {player} — which platform? (PS / XBOX / PC)")
            }
            ChatState::AwaitingPlayer { intent } => {
                let player = normalize_subject(text);
                if player.is_empty() {
                    return "Please type the player's name.".to_string();
                }
                self.sessions.insert(
                    session.to_string(),
                    ChatState::AwaitingPlatform {
                        intent,
                        player: player.clone(),
                    },
                );
                format!("Got it, {player}. Which platform? (PS / XBOX / PC)")
            }
            ChatState::AwaitingPlatform { intent, player } => match text.parse::<Platform>() {
                Ok(platform) => {
                    self.sessions.insert(
                        session.to_string(),
                        ChatState::AwaitingPrice {
                            intent,
                            player: player.clone(),
                            platform,
                        },
                    );
                    format!(
                        "What price do you see for {player} on {platform}? e.g. 1.250.000"
                    )
                }
                Err(_) => format!(
                    "I don't know that platform. Answer PS, XBOX or PC for {player}."
                ),
            },
            ChatState::AwaitingPrice {
                intent,
                player,
                platform,
            } => {
                if !self.price_re.is_match(text) {
                    return format!(
                        "That doesn't look like a coin amount. Type the price for {player} \
                         in digits, e.g. 1.250.000."
                    );
                }
                let price = match parse_price(text) {
                    Ok(price) => price,
                    Err(_) => {
                        return format!(
                            "That doesn't look like a coin amount. Type the price for {player} \
                             in digits, e.g. 1.250.000."
                        );
                    }
                };
                self.sessions.insert(session.to_string(), ChatState::Idle);
                self.execute(intent, &player, platform, price)
            }
        }
    }

    fn handle_command(&mut self, session: &str, command: &str) -> String {
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        match name {
            "start" => {
                self.sessions.insert(session.to_string(), ChatState::Idle);
                "👋 Hello! I track transfer-market prices for you.\n\
                 Type a player's name to log a price check, or use:\n\
                 /price — log an observed price and get a trade tip\n\
                 /buy — record a purchase\n\
                 /sell — record a sale and see the profit\n\
                 /history <player> — price timeline for a player\n\
                 /recent — latest recorded prices\n\
                 /players — every player on record\n\
                 /portfolio — open positions and realized profit\n\
                 /cancel — abandon the current dialogue"
                    .to_string()
            }
            "price" => self.begin(session, Intent::Quote),
            "buy" => self.begin(session, Intent::Buy),
            "sell" => self.begin(session, Intent::Sell),
            "cancel" => {
                self.sessions.insert(session.to_string(), ChatState::Idle);
                "Okay, cancelled.".to_string()
            }
            "history" => {
                if arg.is_empty() {
                    return "Usage: /history <player>".to_string();
                }
                self.render_history(arg)
            }
            "recent" => self.render_recent(),
            "players" => self.render_players(),
            "portfolio" => self.render_portfolio(),
            _ => "Unknown command. /start lists everything I understand.".to_string(),
        }
    }

    fn begin(&mut self, session: &str, intent: Intent) -> String {
        self.sessions
            .insert(session.to_string(), ChatState::AwaitingPlayer { intent });
        format!("Which player do you want to {}?", intent.verb())
    }

    fn execute(&mut self, intent: Intent, player: &str, platform: Platform, price: u32) -> String {
        match intent {
            Intent::Quote => self.execute_quote(player, platform, price),
            Intent::Buy => self.execute_buy(player, platform, price),
            Intent::Sell => self.execute_sell(player, platform, price),
        }
    }

    fn execute_quote(&mut self, player: &str, platform: Platform, price: u32) -> String {
        let record = match self.ledger.record(player, price, platform) {
            Ok(record) => record,
            Err(e) => {
                error!("❌ Failed to record price for {}: {}", player, e);
                return format!("❌ Could not save that price for {player}. Try again later.");
            }
        };
        info!(
            "📝 Recorded {} at {} on {}",
            record.subject,
            ledger::format_price(price),
            platform
        );

        let tip = tip::advise(&self.ledger, &record.subject, price);
        format!(
            "✅ Recorded: {} is at {} coins on {}.\n\n📊 Trade tip:\n{}",
            record.subject,
            ledger::format_price(price),
            platform,
            render_tip(&tip)
        )
    }

    fn execute_buy(&mut self, player: &str, platform: Platform, price: u32) -> String {
        match self.positions.open_position(player, price, platform) {
            Ok(position) => format!(
                "🛒 Bought {} for {} coins on {}. I'll match this with your next sale.",
                position.subject,
                ledger::format_price(price),
                platform
            ),
            Err(e) => {
                error!("❌ Failed to open position for {}: {}", player, e);
                format!("❌ Could not record that purchase of {player}. Try again later.")
            }
        }
    }

    fn execute_sell(&mut self, player: &str, platform: Platform, price: u32) -> String {
        match self.positions.close_position(player, price, platform) {
            Ok(position) => render_closed_position(&position),
            Err(LedgerError::NoOpenPosition { subject }) => format!(
                "🤷 You have no open purchase of {subject} on record. Use /buy first."
            ),
            Err(e) => {
                error!("❌ Failed to close position for {}: {}", player, e);
                format!("❌ Could not record that sale of {player}. Try again later.")
            }
        }
    }

    fn render_history(&self, player: &str) -> String {
        match self.ledger.history_for(player) {
            Ok(history) if history.is_empty() => {
                format!("No prices on record for {}.", normalize_subject(player))
            }
            Ok(history) => {
                let mut out = format!("📈 Price history for {}:\n", normalize_subject(player));
                for record in &history {
                    out.push_str(&format!(
                        "  {} — {} coins ({})\n",
                        record.timestamp.format(ledger::csv_datetime::FORMAT),
                        ledger::format_price(record.price),
                        record.platform
                    ));
                }
                out
            }
            Err(LedgerError::StoreNotFound { .. }) => {
                "No prices recorded yet. Log one with /price.".to_string()
            }
            Err(e) => {
                error!("❌ Failed to read history for {}: {}", player, e);
                "❌ Could not read the price history. Try again later.".to_string()
            }
        }
    }

    fn render_recent(&self) -> String {
        match self.ledger.recent(self.recent_limit) {
            Ok(records) if records.is_empty() => {
                "No prices recorded yet. Log one with /price.".to_string()
            }
            Ok(records) => {
                let mut out = String::from("🕒 Latest recorded prices:\n");
                for record in &records {
                    out.push_str(&format!(
                        "  {} — {}: {} coins ({})\n",
                        record.timestamp.format(ledger::csv_datetime::FORMAT),
                        record.subject,
                        ledger::format_price(record.price),
                        record.platform
                    ));
                }
                out
            }
            Err(e) => {
                error!("❌ Failed to read recent records: {}", e);
                "❌ Could not read the price history. Try again later.".to_string()
            }
        }
    }

    fn render_players(&self) -> String {
        match self.ledger.all_subjects() {
            Ok(subjects) if subjects.is_empty() => {
                "No players on record yet. Log a price with /price.".to_string()
            }
            Ok(subjects) => format!("👥 Players on record: {}", subjects.join(", ")),
            Err(e) => {
                error!("❌ Failed to list players: {}", e);
                "❌ Could not read the price history. Try again later.".to_string()
            }
        }
    }

    fn render_portfolio(&self) -> String {
        let summary = match self.positions.portfolio_summary(self.closed_limit) {
            Ok(summary) => summary,
            Err(e) => {
                error!("❌ Failed to read portfolio: {}", e);
                return "❌ Could not read the position ledger. Try again later.".to_string();
            }
        };
        render_portfolio_summary(&summary)
    }
}

fn render_tip(tip: &TradeTip) -> String {
    match tip {
        TradeTip::PriceUp { delta, compared_at } => format!(
            "⬆️ {} coins more expensive than the last check ({}). Could be time to SELL!",
            ledger::format_price(*delta),
            compared_at.format(ledger::csv_datetime::FORMAT)
        ),
        TradeTip::PriceDown { delta, compared_at } => format!(
            "⬇️ {} coins cheaper than the last check ({}). Could be time to BUY!",
            ledger::format_price(*delta),
            compared_at.format(ledger::csv_datetime::FORMAT)
        ),
        TradeTip::Stable { .. } => "➡️ Price stable since the last check.".to_string(),
        TradeTip::InsufficientData => {
            "First record for this player. Check again later to compare prices!".to_string()
        }
    }
}

fn render_closed_position(position: &TradePosition) -> String {
    let sell = position.sell_price.unwrap_or(0);
    let net = position.net_profit.unwrap_or(0);
    let gross = sell as i64 - position.buy_price as i64;
    let fee = gross - net;
    let outcome = if net >= 0 { "📈 Profit" } else { "📉 Loss" };
    format!(
        "💸 Sold {} on {}.\n  Bought: {} coins\n  Sold: {} coins\n  Gross: {} coins\n  \
         Market fee: {} coins\n{}: {} coins",
        position.subject,
        position.platform,
        ledger::format_price(position.buy_price),
        ledger::format_price(sell),
        format_signed(gross),
        format_signed(fee),
        outcome,
        format_signed(net)
    )
}

fn render_portfolio_summary(summary: &PortfolioSummary) -> String {
    let mut out = format!(
        "💼 Portfolio\nRealized profit: {} coins across {} closed trade(s)\n",
        format_signed(summary.total_net_profit),
        summary.closed_count
    );

    if summary.open_positions.is_empty() {
        out.push_str("\nNo open positions.\n");
    } else {
        out.push_str("\nOpen positions:\n");
        for position in &summary.open_positions {
            out.push_str(&format!(
                "  {} — bought {} coins on {} ({})\n",
                position.subject,
                ledger::format_price(position.buy_price),
                position.platform,
                position.opened_at.format(ledger::csv_datetime::FORMAT)
            ));
        }
    }

    if !summary.recent_closed.is_empty() {
        out.push_str("\nRecently closed:\n");
        for position in &summary.recent_closed {
            out.push_str(&format!(
                "  {} — net {} coins\n",
                position.subject,
                format_signed(position.net_profit.unwrap_or(0))
            ));
        }
    }
    out
}

fn format_signed(value: i64) -> String {
    if value < 0 {
        format!("-{}", ledger::format_price(value.unsigned_abs()))
    } else {
        ledger::format_price(value.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn flow_in(dir: &tempfile::TempDir) -> ChatFlow {
        let config = Config {
            price_history_file: dir
                .path()
                .join("prices.csv")
                .to_string_lossy()
                .into_owned(),
            positions_file: dir
                .path()
                .join("positions.csv")
                .to_string_lossy()
                .into_owned(),
            ..Config::default()
        };
        ChatFlow::new(&config)
    }

    #[test]
    fn quote_dialogue_records_and_tips() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        flow.handle_message("u1", "/price");
        assert_eq!(
            flow.state("u1"),
            ChatState::AwaitingPlayer {
                intent: Intent::Quote
            }
        );
        flow.handle_message("u1", "kylian mbappé");
        flow.handle_message("u1", "ps");
        let reply = flow.handle_message("u1", "1.500.000");

        assert!(reply.contains("Kylian Mbappé"));
        assert!(reply.contains("1.500.000"));
        assert!(reply.contains("First record"));
        assert_eq!(flow.state("u1"), ChatState::Idle);

        // Second observation at a higher price flips the tip to SELL.
        flow.handle_message("u1", "kylian mbappé");
        flow.handle_message("u1", "ps");
        let reply = flow.handle_message("u1", "1.600.000");
        assert!(reply.contains("SELL"));
        assert!(reply.contains("100.000"));
    }

    #[test]
    fn free_text_starts_a_quote_for_that_player() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        let reply = flow.handle_message("u1", "vini jr.");
        assert!(reply.contains("Vini Jr."));
        assert_eq!(
            flow.state("u1"),
            ChatState::AwaitingPlatform {
                intent: Intent::Quote,
                player: "Vini Jr.".to_string()
            }
        );
    }

    #[test]
    fn invalid_price_reprompts_without_losing_state() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        flow.handle_message("u1", "/price");
        flow.handle_message("u1", "Haaland");
        flow.handle_message("u1", "pc");
        let reply = flow.handle_message("u1", "cheap!!");
        assert!(reply.contains("doesn't look like a coin amount"));
        assert!(matches!(
            flow.state("u1"),
            ChatState::AwaitingPrice { .. }
        ));

        let reply = flow.handle_message("u1", "120.000");
        assert!(reply.contains("Recorded"));
    }

    #[test]
    fn unknown_platform_reprompts() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        flow.handle_message("u1", "/price");
        flow.handle_message("u1", "Haaland");
        let reply = flow.handle_message("u1", "gamecube");
        assert!(reply.contains("PS, XBOX or PC"));
        assert!(matches!(
            flow.state("u1"),
            ChatState::AwaitingPlatform { .. }
        ));
    }

    #[test]
    fn buy_then_sell_reports_net_profit() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        flow.handle_message("u1", "/buy");
        flow.handle_message("u1", "Player X");
        flow.handle_message("u1", "ps");
        let reply = flow.handle_message("u1", "1.000.000");
        assert!(reply.contains("Bought Player X"));

        flow.handle_message("u1", "/sell");
        flow.handle_message("u1", "player x");
        flow.handle_message("u1", "ps");
        let reply = flow.handle_message("u1", "1.200.000");
        assert!(reply.contains("140.000"));
        assert!(reply.contains("Profit"));
    }

    #[test]
    fn sell_without_open_position_is_friendly() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        flow.handle_message("u1", "/sell");
        flow.handle_message("u1", "Nobody");
        flow.handle_message("u1", "pc");
        let reply = flow.handle_message("u1", "1000");
        assert!(reply.contains("no open purchase"));
    }

    #[test]
    fn cancel_resets_the_dialogue() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        flow.handle_message("u1", "/buy");
        flow.handle_message("u1", "Haaland");
        let reply = flow.handle_message("u1", "/cancel");
        assert!(reply.contains("cancelled"));
        assert_eq!(flow.state("u1"), ChatState::Idle);
    }

    #[test]
    fn sessions_are_independent() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        flow.handle_message("u1", "/buy");
        flow.handle_message("u2", "/sell");
        assert_eq!(
            flow.state("u1"),
            ChatState::AwaitingPlayer { intent: Intent::Buy }
        );
        assert_eq!(
            flow.state("u2"),
            ChatState::AwaitingPlayer {
                intent: Intent::Sell
            }
        );
    }

    #[test]
    fn history_and_portfolio_commands_render() {
        let dir = tempdir().unwrap();
        let mut flow = flow_in(&dir);

        assert!(flow.handle_message("u1", "/history Mbappé").contains("No prices"));
        assert!(flow.handle_message("u1", "/portfolio").contains("0 closed"));

        flow.handle_message("u1", "Mbappé");
        flow.handle_message("u1", "ps");
        flow.handle_message("u1", "1.000.000");

        let history = flow.handle_message("u1", "/history mbappé");
        assert!(history.contains("1.000.000"));

        let players = flow.handle_message("u1", "/players");
        assert!(players.contains("Mbappé"));

        let recent = flow.handle_message("u1", "/recent");
        assert!(recent.contains("Mbappé"));
    }
}
