//! SQL identifier validation and quoting for runtime DDL.
//!
//! Space addresses and type ids come from the stream, so every identifier
//! that reaches a `CREATE` statement goes through [`validate`] first and is
//! always emitted double-quoted.

use crate::error::SinkError;

/// Postgres truncates identifiers beyond `NAMEDATALEN - 1` bytes.
pub const MAX_IDENT_LEN: usize = 63;

/// Reject identifiers that cannot be safely double-quoted.
pub fn validate(ident: &str) -> Result<(), SinkError> {
    let reject = |reason: &str| {
        Err(SinkError::InvalidIdentifier {
            ident: ident.to_string(),
            reason: reason.to_string(),
        })
    };
    if ident.is_empty() {
        return reject("empty");
    }
    if ident.len() > MAX_IDENT_LEN {
        return reject("longer than 63 bytes");
    }
    if ident.chars().any(|c| c == '"' || c.is_control()) {
        return reject("contains a quote or control character");
    }
    Ok(())
}

/// Double-quote a validated identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

/// `"schema"."table"`.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote(schema), quote(table))
}

/// Schema name for a space address.
pub fn schema_name_for(space_id: &str) -> String {
    space_id.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_addresses_and_ids() {
        assert!(validate("0x170b749413328ac9a94762031a7a05b00c1d2e34").is_ok());
        assert!(validate("attr_7b34c2a1").is_ok());
        assert!(validate("Goal").is_ok());
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(validate("").is_err());
        assert!(validate(&"a".repeat(64)).is_err());
        assert!(validate("bad\"name").is_err());
        assert!(validate("nul\0byte").is_err());
        assert!(validate("new\nline").is_err());
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("Goal"), "\"Goal\"");
        assert_eq!(qualified("0xabc", "Goal"), "\"0xabc\".\"Goal\"");
        assert_eq!(schema_name_for("0xABCdef"), "0xabcdef");
    }
}
