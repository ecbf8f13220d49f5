//! Splitting records into whitespace-delimited tokens.
//!
//! Tokens are exact byte strings: matching is case-sensitive and no UTF-8
//! validation or normalisation takes place.

/// Returns true for bytes in the separator class (space, `\t`, `\v`, `\r`, `\f`).
#[must_use]
pub fn is_separator(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | 0x0B | b'\r' | 0x0C)
}

/// Iterates over the non-empty tokens of `record` in the order they appear.
pub fn tokens(record: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
    record
        .split(|&byte| is_separator(byte))
        .filter(|token| !token.is_empty())
}

/// Tokens extracted from a single record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizedRecord<'a> {
    occurrences: Vec<&'a [u8]>,
    distinct: Vec<&'a [u8]>,
}

impl<'a> TokenizedRecord<'a> {
    /// Every token occurrence in record order, repeats included.
    #[must_use]
    pub fn occurrences(&self) -> &[&'a [u8]] {
        &self.occurrences
    }

    /// Distinct tokens in byte-lexicographic order.
    #[must_use]
    pub fn distinct(&self) -> &[&'a [u8]] {
        &self.distinct
    }

    /// Number of distinct tokens in the record.
    #[must_use]
    pub fn unique_count(&self) -> usize {
        self.distinct.len()
    }

    /// Returns true when the record contained no tokens at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }
}

/// Tokenizes a record, computing both the occurrence multiset and the distinct set.
#[must_use]
pub fn tokenize(record: &[u8]) -> TokenizedRecord<'_> {
    let occurrences: Vec<&[u8]> = tokens(record).collect();
    let mut distinct = occurrences.clone();
    distinct.sort_unstable();
    distinct.dedup();
    TokenizedRecord {
        occurrences,
        distinct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_separator_runs() {
        let record = tokenize(b"  alpha \t\tbeta\x0b\x0cgamma\r");
        assert_eq!(
            record.occurrences(),
            &[&b"alpha"[..], &b"beta"[..], &b"gamma"[..]]
        );
        assert_eq!(record.unique_count(), 3);
    }

    #[test]
    fn counts_repeated_tokens_once() {
        let record = tokenize(b"to be or not to be");
        assert_eq!(record.occurrences().len(), 6);
        assert_eq!(
            record.distinct(),
            &[&b"be"[..], &b"not"[..], &b"or"[..], &b"to"[..]]
        );
        assert_eq!(record.unique_count(), 4);
    }

    #[test]
    fn whitespace_only_record_is_empty() {
        for input in [&b""[..], &b" "[..], &b"\t \r\x0b\x0c  "[..]] {
            let record = tokenize(input);
            assert!(record.is_empty());
            assert_eq!(record.unique_count(), 0);
        }
    }

    #[test]
    fn matching_is_case_sensitive() {
        let record = tokenize(b"Word word WORD word");
        assert_eq!(record.unique_count(), 3);
    }

    #[test]
    fn non_utf8_bytes_are_tokens() {
        let record = tokenize(b"\xff\xfe ok \xff\xfe");
        assert_eq!(record.unique_count(), 2);
        assert_eq!(record.occurrences().len(), 3);
    }
}
