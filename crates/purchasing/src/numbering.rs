//! Human-facing document numbers.

use uuid::Uuid;

fn random_suffix() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..10].to_ascii_uppercase()
}

/// `PO-` followed by 10 upper-case hex characters.
pub fn new_po_number() -> String {
    format!("PO-{}", random_suffix())
}

/// `GRN-` followed by 10 upper-case hex characters.
pub fn new_grn_number() -> String {
    format!("GRN-{}", random_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_have_prefix_and_ten_hex_chars() {
        let po = new_po_number();
        let suffix = po.strip_prefix("PO-").unwrap();
        assert_eq!(suffix.len(), 10);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));

        assert!(new_grn_number().starts_with("GRN-"));
        assert_ne!(new_grn_number(), new_grn_number());
    }
}
