use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LedgerError, Result};

/// Timestamps are stored as `YYYY-MM-DD HH:MM:SS`, always UTC.
pub mod csv_datetime {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(raw.trim(), FORMAT)
            .map_err(serde::de::Error::custom)?;
        Ok(naive.and_utc())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "PS")]
    Playstation,
    #[serde(rename = "XBOX")]
    Xbox,
    #[serde(rename = "PC")]
    Pc,
}

impl Platform {
    pub fn tag(&self) -> &'static str {
        match self {
            Platform::Playstation => "PS",
            Platform::Xbox => "XBOX",
            Platform::Pc => "PC",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Platform {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ps" | "ps5" | "playstation" => Ok(Platform::Playstation),
            "xbox" | "xb" => Ok(Platform::Xbox),
            "pc" | "origin" => Ok(Platform::Pc),
            other => Err(LedgerError::Parse {
                value: other.to_string(),
            }),
        }
    }
}

/// One observed price for a player. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    #[serde(rename = "data_hora", with = "csv_datetime")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "jogador")]
    pub subject: String,
    #[serde(rename = "preco_moedas")]
    pub price: u32,
    #[serde(rename = "plataforma")]
    pub platform: Platform,
}

/// Strip `.` and `,` thousands separators and convert to an integer.
/// A value that is not digits-and-separators is a parse failure, never zero.
pub fn parse_price(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let cleaned: String = trimmed.chars().filter(|c| !matches!(c, '.' | ',')).collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::Parse {
            value: trimmed.to_string(),
        });
    }
    cleaned.parse::<u32>().map_err(|_| LedgerError::Parse {
        value: trimmed.to_string(),
    })
}

/// Format a coin amount with `.` thousands separators, e.g. `1.500.000`.
pub fn format_price(price: impl Into<u64>) -> String {
    let digits = price.into().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

/// Normalize a player name to title case for storage and display.
/// Matching stays case-insensitive, so this only fixes how names render.
pub fn normalize_subject(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut at_word_start = true;
    for c in raw.trim().chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn subject_key(subject: &str) -> String {
    subject.trim().to_lowercase()
}

pub(crate) fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

/// Append-only price history, one CSV file, the single source of truth.
pub struct PriceLedger {
    path: PathBuf,
}

impl PriceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamp and append a new observation, returning the stored record.
    /// The stored timestamp format carries second precision, so the stamp is
    /// truncated to match what a later read returns.
    pub fn record(&self, subject: &str, price: u32, platform: Platform) -> Result<PriceRecord> {
        let record = PriceRecord {
            timestamp: truncate_to_seconds(Utc::now()),
            subject: normalize_subject(subject),
            price,
            platform,
        };
        self.append(&record)?;
        Ok(record)
    }

    /// Append one record, creating the file with its header on first write.
    /// Append mode means a failed write never touches rows already on disk.
    pub fn append(&self, record: &PriceRecord) -> Result<()> {
        let is_new = !self.path.exists();
        if is_new {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| LedgerError::io("creating ledger directory", e))?;
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io("opening price ledger", e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer
            .serialize(record)
            .map_err(|e| LedgerError::csv("appending price record", e))?;
        writer
            .flush()
            .map_err(|e| LedgerError::io("flushing price ledger", e))?;
        Ok(())
    }

    /// All records for a player, case-insensitive, in insertion order.
    /// An existing store with no matches is `Ok(vec![])`; a store that was
    /// never created is `StoreNotFound`.
    pub fn history_for(&self, subject: &str) -> Result<Vec<PriceRecord>> {
        let key = subject_key(subject);
        let records = self.load_all()?;
        Ok(records
            .into_iter()
            .filter(|r| subject_key(&r.subject) == key)
            .collect())
    }

    /// The most recent record for a player, or `None`.
    pub fn latest_for(&self, subject: &str) -> Result<Option<PriceRecord>> {
        match self.history_for(subject) {
            Ok(mut history) => Ok(history.pop()),
            Err(LedgerError::StoreNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every distinct player seen so far, normalized and sorted.
    pub fn all_subjects(&self) -> Result<Vec<String>> {
        let records = match self.load_all() {
            Ok(records) => records,
            Err(LedgerError::StoreNotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for record in records {
            seen.entry(subject_key(&record.subject))
                .or_insert_with(|| normalize_subject(&record.subject));
        }
        Ok(seen.into_values().collect())
    }

    /// The last `n` records across all players, most-recent first.
    pub fn recent(&self, n: usize) -> Result<Vec<PriceRecord>> {
        let records = match self.load_all() {
            Ok(records) => records,
            Err(LedgerError::StoreNotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(records.into_iter().rev().take(n).collect())
    }

    fn load_all(&self) -> Result<Vec<PriceRecord>> {
        if !self.path.exists() {
            return Err(LedgerError::StoreNotFound {
                path: self.path.clone(),
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| LedgerError::csv("opening price ledger", e))?;

        let mut records = Vec::new();
        for row in reader.deserialize::<PriceRecord>() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("⚠️ Skipping malformed price ledger row: {}", e);
                }
            }
        }
        Ok(records)
    }
}
