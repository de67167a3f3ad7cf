use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::{self, Platform, csv_datetime, normalize_subject};

/// A buy waiting for (or paired with) a later sell. Open means no sell price.
/// A position closes at most once; closing fills both sell fields together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePosition {
    #[serde(rename = "data_hora_compra", with = "csv_datetime")]
    pub opened_at: DateTime<Utc>,
    #[serde(rename = "jogador")]
    pub subject: String,
    #[serde(rename = "preco_compra")]
    pub buy_price: u32,
    #[serde(rename = "plataforma")]
    pub platform: Platform,
    #[serde(rename = "preco_venda")]
    pub sell_price: Option<u32>,
    #[serde(rename = "lucro_liquido")]
    pub net_profit: Option<i64>,
}

impl TradePosition {
    pub fn is_open(&self) -> bool {
        self.sell_price.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub total_net_profit: i64,
    pub closed_count: usize,
    /// Most-recent first.
    pub open_positions: Vec<TradePosition>,
    /// Most-recent first, capped by the configured display limit.
    pub recent_closed: Vec<TradePosition>,
}

/// Buy/sell pairing over one CSV file. Closing a position rewrites the whole
/// collection through a sibling temp file and an atomic rename, so a failed
/// rewrite leaves the store untouched.
pub struct PositionBook {
    path: PathBuf,
    fee_rate: f64,
}

impl PositionBook {
    pub fn new(path: impl Into<PathBuf>, fee_rate: f64) -> Self {
        Self {
            path: path.into(),
            fee_rate,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a buy. Always succeeds; validation of the price text happened
    /// before it became an integer.
    pub fn open_position(
        &self,
        subject: &str,
        buy_price: u32,
        platform: Platform,
    ) -> Result<TradePosition> {
        let position = TradePosition {
            opened_at: ledger::truncate_to_seconds(Utc::now()),
            subject: normalize_subject(subject),
            buy_price,
            platform,
            sell_price: None,
            net_profit: None,
        };
        self.append(&position)?;
        info!(
            "💰 Opened position: {} at {} on {}",
            position.subject,
            ledger::format_price(buy_price),
            platform
        );
        Ok(position)
    }

    /// Pair a sell with the most recently opened still-open position for the
    /// player. No open position means `NoOpenPosition` and no mutation.
    pub fn close_position(
        &self,
        subject: &str,
        sell_price: u32,
        platform: Platform,
    ) -> Result<TradePosition> {
        let key = normalize_subject(subject).to_lowercase();
        let no_open = || LedgerError::NoOpenPosition {
            subject: normalize_subject(subject),
        };

        let mut positions = match self.load_all() {
            Ok(positions) => positions,
            Err(LedgerError::StoreNotFound { .. }) => return Err(no_open()),
            Err(e) => return Err(e),
        };

        // Reverse file-order scan: among equal timestamps the row appended
        // last closes first.
        let index = positions
            .iter()
            .rposition(|p| p.is_open() && p.subject.to_lowercase() == key)
            .ok_or_else(no_open)?;

        let position = &mut positions[index];
        if position.platform != platform {
            warn!(
                "⚠️ {} bought on {} but sold on {}",
                position.subject, position.platform, platform
            );
        }

        let gross = sell_price as i64 - position.buy_price as i64;
        let fee = (sell_price as f64 * self.fee_rate).trunc() as i64;
        position.sell_price = Some(sell_price);
        position.net_profit = Some(gross - fee);
        let closed = position.clone();

        self.rewrite_all(&positions)?;
        info!(
            "💸 Closed position: {} bought {} sold {} net {}",
            closed.subject,
            ledger::format_price(closed.buy_price),
            ledger::format_price(sell_price),
            closed.net_profit.unwrap_or(0)
        );
        Ok(closed)
    }

    /// Realized profit across all closed positions plus what is still open.
    pub fn portfolio_summary(&self, closed_limit: usize) -> Result<PortfolioSummary> {
        let positions = match self.load_all() {
            Ok(positions) => positions,
            Err(LedgerError::StoreNotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        let total_net_profit = positions
            .iter()
            .filter_map(|p| p.net_profit)
            .sum();
        let closed_count = positions.iter().filter(|p| !p.is_open()).count();

        let open_positions: Vec<TradePosition> = positions
            .iter()
            .rev()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        let recent_closed: Vec<TradePosition> = positions
            .iter()
            .rev()
            .filter(|p| !p.is_open())
            .take(closed_limit)
            .cloned()
            .collect();

        Ok(PortfolioSummary {
            total_net_profit,
            closed_count,
            open_positions,
            recent_closed,
        })
    }

    fn append(&self, position: &TradePosition) -> Result<()> {
        let is_new = !self.path.exists();
        if is_new {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| LedgerError::io("creating position ledger directory", e))?;
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io("opening position ledger", e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer
            .serialize(position)
            .map_err(|e| LedgerError::csv("appending position", e))?;
        writer
            .flush()
            .map_err(|e| LedgerError::io("flushing position ledger", e))?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<TradePosition>> {
        if !self.path.exists() {
            return Err(LedgerError::StoreNotFound {
                path: self.path.clone(),
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| LedgerError::csv("opening position ledger", e))?;

        let mut positions = Vec::new();
        for row in reader.deserialize::<TradePosition>() {
            match row {
                Ok(position) => positions.push(position),
                Err(e) => {
                    warn!("⚠️ Skipping malformed position ledger row: {}", e);
                }
            }
        }
        Ok(positions)
    }

    fn rewrite_all(&self, positions: &[TradePosition]) -> Result<()> {
        let mut tmp_path = self.path.clone();
        tmp_path.set_extension("csv.tmp");

        let mut writer = csv::Writer::from_path(&tmp_path)
            .map_err(|e| LedgerError::csv("creating position ledger temp file", e))?;
        for position in positions {
            writer
                .serialize(position)
                .map_err(|e| LedgerError::csv("rewriting position ledger", e))?;
        }
        writer
            .flush()
            .map_err(|e| LedgerError::io("flushing position ledger temp file", e))?;
        drop(writer);

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| LedgerError::io("replacing position ledger", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn book_in(dir: &tempfile::TempDir) -> PositionBook {
        PositionBook::new(dir.path().join("positions.csv"), 0.05)
    }

    #[test]
    fn close_nets_out_the_market_fee() {
        let dir = tempdir().unwrap();
        let book = book_in(&dir);

        book.open_position("Player X", 1_000_000, Platform::Playstation).unwrap();
        let closed = book
            .close_position("Player X", 1_200_000, Platform::Playstation)
            .unwrap();

        // gross 200_000, fee 5% of 1_200_000 = 60_000
        assert_eq!(closed.sell_price, Some(1_200_000));
        assert_eq!(closed.net_profit, Some(140_000));
        assert!(!closed.is_open());

        // The rewrite persisted the closed fields.
        let summary = book.portfolio_summary(10).unwrap();
        assert_eq!(summary.total_net_profit, 140_000);
        assert_eq!(summary.closed_count, 1);
        assert!(summary.open_positions.is_empty());
    }

    #[test]
    fn losing_trade_yields_negative_net() {
        let dir = tempdir().unwrap();
        let book = book_in(&dir);

        book.open_position("Haaland", 500_000, Platform::Xbox).unwrap();
        let closed = book.close_position("Haaland", 400_000, Platform::Xbox).unwrap();

        // gross -100_000, fee 20_000
        assert_eq!(closed.net_profit, Some(-120_000));
    }

    #[test]
    fn close_without_open_position_is_a_named_failure() {
        let dir = tempdir().unwrap();
        let book = book_in(&dir);

        assert!(matches!(
            book.close_position("Mbappé", 1_000, Platform::Pc),
            Err(LedgerError::NoOpenPosition { .. })
        ));
        // Nothing was created.
        assert!(!book.path().exists());

        book.open_position("Haaland", 500, Platform::Pc).unwrap();
        book.close_position("Haaland", 600, Platform::Pc).unwrap();
        assert!(matches!(
            book.close_position("Haaland", 700, Platform::Pc),
            Err(LedgerError::NoOpenPosition { .. })
        ));

        // The failed close altered no rows.
        let summary = book.portfolio_summary(10).unwrap();
        assert_eq!(summary.closed_count, 1);
        assert_eq!(summary.recent_closed[0].sell_price, Some(600));
    }

    #[test]
    fn close_picks_the_most_recently_opened_open_position() {
        let dir = tempdir().unwrap();
        let book = book_in(&dir);

        book.open_position("Mbappé", 1_000_000, Platform::Playstation).unwrap();
        book.open_position("Mbappé", 1_050_000, Platform::Playstation).unwrap();

        let closed = book
            .close_position("mbappé", 1_100_000, Platform::Playstation)
            .unwrap();
        assert_eq!(closed.buy_price, 1_050_000);

        let summary = book.portfolio_summary(10).unwrap();
        assert_eq!(summary.open_positions.len(), 1);
        assert_eq!(summary.open_positions[0].buy_price, 1_000_000);
    }

    #[test]
    fn summary_orders_most_recent_first() {
        let dir = tempdir().unwrap();
        let book = book_in(&dir);

        book.open_position("A", 100, Platform::Pc).unwrap();
        book.open_position("B", 200, Platform::Pc).unwrap();
        book.open_position("C", 300, Platform::Pc).unwrap();
        book.close_position("A", 200, Platform::Pc).unwrap();
        book.close_position("B", 300, Platform::Pc).unwrap();

        let summary = book.portfolio_summary(1).unwrap();
        assert_eq!(summary.open_positions[0].subject, "C");
        assert_eq!(summary.recent_closed.len(), 1);
        assert_eq!(summary.recent_closed[0].subject, "B");
        assert_eq!(summary.closed_count, 2);
    }

    #[test]
    fn malformed_position_rows_are_skipped() {
        let dir = tempdir().unwrap();
        let book = book_in(&dir);

        book.open_position("Mbappé", 1_000, Platform::Pc).unwrap();
        let mut content = std::fs::read_to_string(book.path()).unwrap();
        content.push_str("2025-01-01 00:00:00,Ghost,not-a-number,PC,,\n");
        std::fs::write(book.path(), content).unwrap();
        book.open_position("Haaland", 2_000, Platform::Pc).unwrap();

        let summary = book.portfolio_summary(10).unwrap();
        assert_eq!(summary.open_positions.len(), 2);
    }

    #[test]
    fn open_positions_round_trip_with_empty_sell_fields() {
        let dir = tempdir().unwrap();
        let book = book_in(&dir);

        book.open_position("Vini Jr.", 750_000, Platform::Playstation).unwrap();
        let content = std::fs::read_to_string(book.path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "data_hora_compra,jogador,preco_compra,plataforma,preco_venda,lucro_liquido"
        );
        assert!(lines.next().unwrap().ends_with("Vini Jr.,750000,PS,,"));

        let summary = book.portfolio_summary(10).unwrap();
        assert_eq!(summary.open_positions[0].subject, "Vini Jr.");
        assert_eq!(summary.open_positions[0].sell_price, None);
    }
}
