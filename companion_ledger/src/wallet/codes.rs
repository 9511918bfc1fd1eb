//! Human-readable transaction codes.
//!
//! Format: `{PREFIX}-{yyyymmddHHMMSS}-{8 uppercase alphanumerics}`, e.g.
//! `PAY-20250314093000-7QK2M9XA`.

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::ledger::TransactionType;

const SUFFIX_LEN: usize = 8;

/// Generate a fresh code for a transaction of the given type
pub fn generate_transaction_code(transaction_type: TransactionType) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!(
        "{}-{}-{}",
        transaction_type.code_prefix(),
        Utc::now().format("%Y%m%d%H%M%S"),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_shape() {
        let code = generate_transaction_code(TransactionType::EscrowRelease);
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "EARN");
        assert_eq!(parts[1].len(), 14);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_codes_differ() {
        let a = generate_transaction_code(TransactionType::Deposit);
        let b = generate_transaction_code(TransactionType::Deposit);
        assert!(a.starts_with("TOP-"));
        assert_ne!(a, b);
    }
}
