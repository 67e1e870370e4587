//! Closed status enums and the synonym tables that feed them.
//!
//! Raw status text is only ever parsed here. Everything past the service
//! boundary works with [`ItemStatus`] and [`TransactionStatus`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Available,
    Reserved,
    Maintenance,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Ongoing,
    Completed,
    Cancelled,
}

const ITEM_SYNONYMS: &[(&str, ItemStatus)] = &[
    ("available", ItemStatus::Available),
    ("disponible", ItemStatus::Available),
    ("reserved", ItemStatus::Reserved),
    ("reservado", ItemStatus::Reserved),
    ("rented", ItemStatus::Reserved),
    ("alquilado", ItemStatus::Reserved),
    ("maintenance", ItemStatus::Maintenance),
    ("mantenimiento", ItemStatus::Maintenance),
    ("disabled", ItemStatus::Disabled),
    ("deshabilitado", ItemStatus::Disabled),
];

const TRANSACTION_SYNONYMS: &[(&str, TransactionStatus)] = &[
    ("ongoing", TransactionStatus::Ongoing),
    ("en_curso", TransactionStatus::Ongoing),
    ("pending", TransactionStatus::Ongoing),
    ("pendiente", TransactionStatus::Ongoing),
    ("completed", TransactionStatus::Completed),
    ("completado", TransactionStatus::Completed),
    ("finalizado", TransactionStatus::Completed),
    ("cancelled", TransactionStatus::Cancelled),
    ("canceled", TransactionStatus::Cancelled),
    ("cancelado", TransactionStatus::Cancelled),
];

/// Trims, lowercases and folds inner spaces/hyphens to `_`, so that
/// "En Curso" and "en-curso" both become "en_curso".
fn normalize_token(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn lookup<T: Copy>(table: &[(&str, T)], raw: &str) -> Result<T, AppError> {
    let token = normalize_token(raw);
    table
        .iter()
        .find(|(synonym, _)| *synonym == token)
        .map(|(_, status)| *status)
        .ok_or_else(|| AppError::InvalidStatus(raw.to_string()))
}

impl FromStr for ItemStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(ITEM_SYNONYMS, s)
    }
}

impl FromStr for TransactionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(TRANSACTION_SYNONYMS, s)
    }
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::Reserved => "reserved",
            ItemStatus::Maintenance => "maintenance",
            ItemStatus::Disabled => "disabled",
        }
    }
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Ongoing => "ongoing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, TransactionStatus::Ongoing)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses an optional boundary filter; blank input means "no filter".
pub fn parse_optional<T>(raw: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr<Err = AppError>,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some),
    }
}
