use chrono::{DateTime, Utc};

use crate::error::LedgerError;
use crate::ledger::PriceLedger;

/// Short-term trend for a player, derived from the last two observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeTip {
    /// Price rose by `delta` coins since the compared record. Suggests selling.
    PriceUp {
        delta: u32,
        compared_at: DateTime<Utc>,
    },
    /// Price fell by `delta` coins since the compared record. Suggests buying.
    PriceDown {
        delta: u32,
        compared_at: DateTime<Utc>,
    },
    Stable { compared_at: DateTime<Utc> },
    /// Fewer than two observations exist for this player.
    InsufficientData,
}

/// Classify the newly observed price against the record immediately preceding
/// it. Assumes the observation was already appended, so the comparison target
/// is the second-to-last stored record. Reads the ledger, writes nothing.
pub fn advise(ledger: &PriceLedger, subject: &str, new_price: u32) -> TradeTip {
    let history = match ledger.history_for(subject) {
        Ok(history) => history,
        Err(LedgerError::StoreNotFound { .. }) => return TradeTip::InsufficientData,
        Err(e) => {
            tracing::warn!("⚠️ Could not read history for trade tip: {}", e);
            return TradeTip::InsufficientData;
        }
    };

    if history.len() < 2 {
        return TradeTip::InsufficientData;
    }

    let previous = &history[history.len() - 2];
    let delta = new_price as i64 - previous.price as i64;
    if delta > 0 {
        TradeTip::PriceUp {
            delta: delta as u32,
            compared_at: previous.timestamp,
        }
    } else if delta < 0 {
        TradeTip::PriceDown {
            delta: (-delta) as u32,
            compared_at: previous.timestamp,
        }
    } else {
        TradeTip::Stable {
            compared_at: previous.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Platform;
    use tempfile::tempdir;

    fn ledger_in(dir: &tempfile::TempDir) -> PriceLedger {
        PriceLedger::new(dir.path().join("prices.csv"))
    }

    #[test]
    fn first_ever_record_yields_insufficient_data() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(&dir);

        assert_eq!(advise(&ledger, "Mbappé", 1_000_000), TradeTip::InsufficientData);

        ledger.record("Mbappé", 1_000_000, Platform::Playstation).unwrap();
        assert_eq!(advise(&ledger, "Mbappé", 1_000_000), TradeTip::InsufficientData);
    }

    #[test]
    fn rising_price_suggests_selling() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(&dir);

        let first = ledger.record("Mbappé", 1_000_000, Platform::Playstation).unwrap();
        ledger.record("Mbappé", 1_000_500, Platform::Playstation).unwrap();

        assert_eq!(
            advise(&ledger, "Mbappé", 1_000_500),
            TradeTip::PriceUp {
                delta: 500,
                compared_at: first.timestamp,
            }
        );
    }

    #[test]
    fn falling_price_suggests_buying() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(&dir);

        let first = ledger.record("Haaland", 800_000, Platform::Xbox).unwrap();
        ledger.record("Haaland", 799_250, Platform::Xbox).unwrap();

        assert_eq!(
            advise(&ledger, "Haaland", 799_250),
            TradeTip::PriceDown {
                delta: 750,
                compared_at: first.timestamp,
            }
        );
    }

    #[test]
    fn unchanged_price_is_stable() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(&dir);

        let first = ledger.record("Messi", 250_000, Platform::Pc).unwrap();
        ledger.record("Messi", 250_000, Platform::Pc).unwrap();

        assert_eq!(
            advise(&ledger, "Messi", 250_000),
            TradeTip::Stable {
                compared_at: first.timestamp,
            }
        );
    }

    #[test]
    fn only_the_subjects_own_history_is_compared() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(&dir);

        ledger.record("Haaland", 1, Platform::Pc).unwrap();
        ledger.record("Mbappé", 1_000_000, Platform::Playstation).unwrap();

        // Haaland's row must not count toward Mbappé's two-record minimum.
        assert_eq!(advise(&ledger, "Mbappé", 1_000_000), TradeTip::InsufficientData);
    }
}
