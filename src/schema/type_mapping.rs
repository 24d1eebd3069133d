//! Catalog format tokens to PostgreSQL column types.
//!
//! Tokens are normalised (trimmed, upper-cased, inner whitespace removed)
//! before matching, so `varchar( 50 )` and `VARCHAR(50)` are the same token.
//! Anything that does not match maps to `VARCHAR(255)`; an unknown type must
//! never stop a bootstrap.
//!
//! | token                    | SQL type        |
//! |--------------------------|-----------------|
//! | `SERIAL`                 | `SERIAL`        |
//! | `BIGSERIAL`              | `BIGSERIAL`     |
//! | `INT`, `INTEGER`         | `INTEGER`       |
//! | `BIGINT`                 | `BIGINT`        |
//! | `SMALLINT`               | `SMALLINT`      |
//! | `VARCHAR(n)`             | `VARCHAR(n)`    |
//! | `NUMERIC(p,s)`           | `NUMERIC(p,s)`  |
//! | `DECIMAL(p,s)`           | `DECIMAL(p,s)`  |
//! | `DATE`                   | `DATE`          |
//! | `TIMESTAMP`              | `TIMESTAMP`     |
//! | `BOOLEAN`, `BOOL`        | `BOOLEAN`       |
//! | `TEXT`                   | `TEXT`          |

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Largest length PostgreSQL accepts for `VARCHAR(n)`
const MAX_VARCHAR_LEN: u32 = 10_485_760;
/// Largest precision PostgreSQL accepts for `NUMERIC(p,s)`
const MAX_NUMERIC_PRECISION: u32 = 1000;

static VARCHAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^VARCHAR\((\d+)\)$").expect("static regex"));

static NUMERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(NUMERIC|DECIMAL)\((\d+),(\d+)\)$").expect("static regex"));

/// A column type the bootstrap knows how to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Serial,
    BigSerial,
    Integer,
    BigInt,
    SmallInt,
    Varchar(u32),
    Numeric { precision: u32, scale: u32 },
    Decimal { precision: u32, scale: u32 },
    Date,
    Timestamp,
    Boolean,
    Text,
}

impl SqlType {
    /// Type used when every format token is unknown or empty
    pub const FALLBACK: SqlType = SqlType::Varchar(255);

    /// Type to cast a text literal to when binding seed values
    ///
    /// Serial pseudo-types are not castable, so they become their integer base.
    pub fn cast_type(&self) -> SqlType {
        match self {
            SqlType::Serial => SqlType::Integer,
            SqlType::BigSerial => SqlType::BigInt,
            other => *other,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Serial => write!(f, "SERIAL"),
            SqlType::BigSerial => write!(f, "BIGSERIAL"),
            SqlType::Integer => write!(f, "INTEGER"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::SmallInt => write!(f, "SMALLINT"),
            SqlType::Varchar(len) => write!(f, "VARCHAR({len})"),
            SqlType::Numeric { precision, scale } => write!(f, "NUMERIC({precision},{scale})"),
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Text => write!(f, "TEXT"),
        }
    }
}

fn normalize_token(format: &str) -> String {
    format
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Map a format token, or `None` when it is not in the table
pub fn try_map_format(format: &str) -> Option<SqlType> {
    let token = normalize_token(format);
    let mapped = match token.as_str() {
        "SERIAL" => SqlType::Serial,
        "BIGSERIAL" => SqlType::BigSerial,
        "INT" | "INTEGER" => SqlType::Integer,
        "BIGINT" => SqlType::BigInt,
        "SMALLINT" => SqlType::SmallInt,
        "DATE" => SqlType::Date,
        "TIMESTAMP" => SqlType::Timestamp,
        "BOOLEAN" | "BOOL" => SqlType::Boolean,
        "TEXT" => SqlType::Text,
        _ => return parametrized(&token),
    };
    Some(mapped)
}

fn parametrized(token: &str) -> Option<SqlType> {
    if let Some(caps) = VARCHAR_TOKEN.captures(token) {
        let len: u32 = caps[1].parse().ok()?;
        return (1..=MAX_VARCHAR_LEN).contains(&len).then_some(SqlType::Varchar(len));
    }

    let caps = NUMERIC_TOKEN.captures(token)?;
    let precision: u32 = caps[2].parse().ok()?;
    let scale: u32 = caps[3].parse().ok()?;
    if !(1..=MAX_NUMERIC_PRECISION).contains(&precision) || scale > precision {
        return None;
    }
    match &caps[1] {
        "NUMERIC" => Some(SqlType::Numeric { precision, scale }),
        _ => Some(SqlType::Decimal { precision, scale }),
    }
}

/// Map a format token, falling back to `VARCHAR(255)` with a warning
pub fn map_format(format: &str) -> SqlType {
    match try_map_format(format) {
        Some(sql_type) => sql_type,
        None => {
            log::warn!("Unknown column format '{format}', using {}", SqlType::FALLBACK);
            SqlType::FALLBACK
        }
    }
}
