// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `ordering.rs`

#[cfg(test)]
mod tests {
    use super::super::{NumericOrdering, OrdinalOrdering, VersionOrdering};
    use std::cmp::Ordering;

    #[test]
    fn test_ordinal_is_plain_string_compare() {
        let ord = OrdinalOrdering;
        assert!(ord.is_newer("b", "a"));
        assert!(!ord.is_newer("a", "a"));
        // The known weakness of ordinal comparison on decimal tokens
        assert!(!ord.is_newer("10", "9"));
    }

    #[test]
    fn test_numeric_compares_decimal_tokens() {
        let ord = NumericOrdering;
        assert!(ord.is_newer("10", "9"));
        assert!(!ord.is_newer("9", "10"));
        assert_eq!(ord.compare("42", "42"), Ordering::Equal);
    }

    #[test]
    fn test_numeric_falls_back_to_ordinal() {
        let ord = NumericOrdering;
        assert_eq!(ord.compare("abc", "abd"), Ordering::Less);
        assert_eq!(ord.compare("12", "x"), "12".cmp("x"));
    }
}
