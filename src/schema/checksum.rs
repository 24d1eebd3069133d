//! Catalog checksums
//!
//! A bootstrap run is tagged with the SHA-256 of the catalog it was built
//! from, so log lines from different instances can be matched to the same
//! catalog version.

use sha2::{Digest, Sha256};

/// Length of the checksum prefix used in log lines
pub const SHORT_CHECKSUM_LEN: usize = 12;

/// Hexadecimal SHA-256 of `data`
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hexadecimal SHA-256 over a sequence of records of text fields
///
/// Fields and records are separated with the ASCII unit and record
/// separators, so `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn checksum_records<'a, R, F>(records: R) -> String
where
    R: IntoIterator<Item = F>,
    F: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for record in records {
        for field in record {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// Prefix of a checksum for log lines
pub fn short_checksum(checksum: &str) -> &str {
    checksum.get(..SHORT_CHECKSUM_LEN).unwrap_or(checksum)
}
