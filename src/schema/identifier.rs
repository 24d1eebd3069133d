//! Identifier validation and quoting.
//!
//! Catalog names are spliced into DDL, so they are restricted at load time to
//! `[A-Za-z_][A-Za-z0-9_]*` within PostgreSQL's 63-byte limit. Rendering then
//! follows `quote_ident`: lower-case non-reserved names stay bare, everything
//! else is double-quoted.

use once_cell::sync::Lazy;
use regex::Regex;

use super::checksum::checksum_bytes;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LEN: usize = 63;

static SAFE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

static BARE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("static regex"));

/// Reserved and type/function-name keywords; these cannot appear bare as a
/// table or column name
const RESERVED_KEYWORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "table", "tablesample",
    "then", "to", "trailing", "true", "union", "unique", "user", "using", "variadic",
    "verbose", "when", "where", "window", "with",
];

/// Why a catalog name was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier '{0}' exceeds {MAX_IDENTIFIER_LEN} bytes")]
    TooLong(String),
    #[error("identifier '{0}' contains characters outside [A-Za-z0-9_] or starts with a digit")]
    InvalidCharacters(String),
}

/// Check that `name` is safe to splice into DDL
pub fn validate_identifier(name: &str) -> Result<(), IdentifierError> {
    if name.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong(name.to_string()));
    }
    if !SAFE_IDENTIFIER.is_match(name) {
        return Err(IdentifierError::InvalidCharacters(name.to_string()));
    }
    Ok(())
}

pub fn is_reserved_keyword(name: &str) -> bool {
    RESERVED_KEYWORDS.binary_search(&name).is_ok()
}

/// Render an identifier the way `quote_ident` would
pub fn quote_ident(name: &str) -> String {
    if BARE_IDENTIFIER.is_match(name) && !is_reserved_keyword(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Render a string literal with single quotes doubled
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Cut `name` to at most [`MAX_IDENTIFIER_LEN`] bytes on a char boundary
pub fn truncate_identifier(name: &str) -> &str {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }
    let mut end = MAX_IDENTIFIER_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Hex digits of the hash suffix given to over-long derived names
const HASH_SUFFIX_LEN: usize = 8;

/// Fit a derived name (constraint, view) within [`MAX_IDENTIFIER_LEN`]
///
/// Names that already fit are returned as is. Longer names keep a prefix
/// and end in `_<hash>` of the full name, so two long names sharing their
/// first 63 bytes still come out different.
pub fn bounded_identifier(name: String) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }
    let hash = checksum_bytes(name.as_bytes());
    let mut end = MAX_IDENTIFIER_LEN - HASH_SUFFIX_LEN - 1;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}_{}", &name[..end], &hash[..HASH_SUFFIX_LEN])
}

/// Compare two identifiers the way the server sees unquoted names:
/// case-insensitively, after truncation
pub fn identifiers_match(a: &str, b: &str) -> bool {
    truncate_identifier(a).eq_ignore_ascii_case(truncate_identifier(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_sorted_for_binary_search() {
        let mut sorted = RESERVED_KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED_KEYWORDS);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("clients").is_ok());
        assert!(validate_identifier("codeClient").is_ok());
        assert!(validate_identifier("_private2").is_ok());
        assert_eq!(validate_identifier(""), Err(IdentifierError::Empty));
        assert!(matches!(
            validate_identifier("2fast"),
            Err(IdentifierError::InvalidCharacters(_))
        ));
        assert!(matches!(
            validate_identifier("clients; DROP TABLE users"),
            Err(IdentifierError::InvalidCharacters(_))
        ));
        assert!(matches!(
            validate_identifier("date naissance"),
            Err(IdentifierError::InvalidCharacters(_))
        ));
        assert!(matches!(
            validate_identifier(&"a".repeat(64)),
            Err(IdentifierError::TooLong(_))
        ));
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("clients"), "clients");
        assert_eq!(quote_ident("id"), "id");
        assert_eq!(quote_ident("code_client"), "code_client");
        assert_eq!(quote_ident("codeClient"), "\"codeClient\"");
        assert_eq!(quote_ident("CNSS"), "\"CNSS\"");
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("Libellé"), "\"Libellé\"");
        assert_eq!(quote_ident("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_quote_literal_doubles_single_quotes() {
        assert_eq!(quote_literal("Date d'effet"), "'Date d''effet'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn test_truncate_identifier_respects_char_boundaries() {
        let name = format!("{}é", "a".repeat(62));
        assert_eq!(name.len(), 64);
        assert_eq!(truncate_identifier(&name), "a".repeat(62));
        assert_eq!(truncate_identifier("short"), "short");
    }

    #[test]
    fn test_bounded_identifier_keeps_long_names_apart() {
        let stem = format!("fk_{}_{}", "t".repeat(40), "c".repeat(30));
        let one = bounded_identifier(format!("{stem}_one"));
        let two = bounded_identifier(format!("{stem}_two"));
        assert_eq!(one.len(), MAX_IDENTIFIER_LEN);
        assert_eq!(two.len(), MAX_IDENTIFIER_LEN);
        assert!(!identifiers_match(&one, &two));
        assert!(one.starts_with("fk_ttt"));
        assert_eq!(bounded_identifier(format!("{stem}_one")), one);
        assert_eq!(bounded_identifier("fk_orders_clientId".to_string()), "fk_orders_clientId");
    }

    #[test]
    fn test_identifiers_match() {
        assert!(identifiers_match("fk_orders_clientCode", "fk_orders_clientcode"));
        assert!(!identifiers_match("fk_orders_client", "fk_orders_clientcode"));
        let long = format!("fk_{}", "x".repeat(70));
        assert!(identifiers_match(&long, truncate_identifier(&long)));
    }
}
