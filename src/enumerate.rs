//! Deterministic mappings between 64-bit indices and candidate passwords.
//!
//! Candidates are ordered like numbers: the charset defines the digits, the
//! leftmost position is the most significant, and the multi-length spaces
//! concatenate the per-length blocks shortest first. Everything here is a
//! pure function of immutable inputs and safe to call from any thread.

use crate::pattern::{Pattern, Segment};

/// Number of candidates of exactly `length` characters, `None` on overflow.
pub fn combinations_for_length(charset_size: u64, length: usize) -> Option<u64> {
    charset_size.checked_pow(u32::try_from(length).ok()?)
}

/// The `index`-th string of exactly `length` characters over `charset`.
///
/// `index` must be below `charset_size^length`; unused high positions keep
/// the first charset character, matching ordinary base-N digit expansion.
pub fn password_at_length(mut index: u64, charset: &[char], length: usize) -> String {
    debug_assert!(!charset.is_empty());
    let base = charset.len() as u64;
    let mut chars = vec![charset[0]; length];
    for slot in chars.iter_mut().rev() {
        *slot = charset[(index % base) as usize];
        index /= base;
        if index == 0 {
            break;
        }
    }
    chars.into_iter().collect()
}

/// Global enumeration of all strings of length 1..=`max_length`: walks the
/// per-length blocks shortest first and expands the local offset. Returns
/// `None` when `index` lies outside the space or a block count overflows
/// 64 bits (an impossible index; callers warn and skip it).
pub fn index_to_password(index: u64, charset: &[char], max_length: usize) -> Option<String> {
    if charset.is_empty() {
        return None;
    }
    let base = charset.len() as u64;
    let mut remaining = index;
    let mut block = 1u64;
    for length in 1..=max_length {
        block = block.checked_mul(base)?;
        if remaining < block {
            return Some(password_at_length(remaining, charset, length));
        }
        remaining -= block;
    }
    None
}

/// The `index`-th candidate of exactly `length` characters matching
/// `pattern`: the wildcard fill is enumerated as a base-N string and woven
/// through the segments in order. Each `?` consumes one fill character and
/// the single `*` consumes the whole length surplus. `None` when the pattern
/// cannot produce `length` at all.
pub fn pattern_password_at_length(
    index: u64,
    pattern: &Pattern,
    charset: &[char],
    length: usize,
) -> Option<String> {
    if charset.is_empty() {
        return None;
    }
    let star_len = if pattern.star_count() > 0 {
        length.checked_sub(pattern.fixed_length())?
    } else {
        if length != pattern.fixed_length() {
            return None;
        }
        0
    };
    let wildcard_chars = pattern.any_one_count() + star_len;
    let fill = if wildcard_chars > 0 {
        password_at_length(index, charset, wildcard_chars)
    } else {
        String::new()
    };

    let mut fill_chars = fill.chars();
    let mut out = String::with_capacity(length);
    for segment in pattern.segments() {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::AnyOne => out.push(fill_chars.next()?),
            Segment::AnyMany => {
                for _ in 0..star_len {
                    out.push(fill_chars.next()?);
                }
            }
        }
    }
    Some(out)
}

/// Length-unioned pattern enumeration: `counts` holds the non-zero
/// per-length candidate counts in ascending length order; the global index
/// is resolved to its length window, then expanded locally.
pub fn pattern_password_at_global_index(
    index: u64,
    pattern: &Pattern,
    charset: &[char],
    counts: &[(usize, u64)],
) -> Option<String> {
    let mut remaining = index;
    for &(length, count) in counts {
        if remaining < count {
            return pattern_password_at_length(remaining, pattern, charset, length);
        }
        remaining -= count;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn charset(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn fixed_length_expansion_is_base_n() {
        let cs = charset("0123");
        assert_eq!(password_at_length(0, &cs, 4), "0000");
        assert_eq!(password_at_length(27, &cs, 4), "0123");
        assert_eq!(password_at_length(255, &cs, 4), "3333");
    }

    #[test]
    fn union_walks_lengths_shortest_first() {
        let cs = charset("ab");
        let expected = ["a", "b", "aa", "ab", "ba", "bb"];
        for (i, want) in expected.iter().enumerate() {
            assert_eq!(index_to_password(i as u64, &cs, 2).as_deref(), Some(*want));
        }
        assert_eq!(index_to_password(6, &cs, 2), None);
    }

    #[test]
    fn union_is_a_bijection() {
        let cs = charset("abc");
        let total = 3 + 9 + 27;
        let mut seen = HashSet::new();
        let mut last_len = 0;
        for i in 0..total {
            let password = index_to_password(i, &cs, 3).unwrap();
            assert!(password.len() >= last_len, "lengths must not shrink");
            last_len = password.len();
            assert!(seen.insert(password), "index {i} repeated a candidate");
        }
        assert_eq!(seen.len(), total as usize);
    }

    #[test]
    fn union_reports_overflow_as_impossible() {
        // 3^41 overflows u64 while the running total up to length 40 does not.
        let cs = charset("abc");
        assert_eq!(index_to_password(u64::MAX, &cs, 41), None);
    }

    #[test]
    fn pattern_expansion_weaves_the_fill() {
        let cs = charset("0123");
        let pattern = Pattern::parse("p?2?");
        assert_eq!(
            pattern_password_at_length(3, &pattern, &cs, 4).as_deref(),
            Some("p023")
        );
        assert_eq!(
            pattern_password_at_length(0, &pattern, &cs, 4).as_deref(),
            Some("p020")
        );
        assert_eq!(pattern_password_at_length(0, &pattern, &cs, 5), None);
    }

    #[test]
    fn star_consumes_the_length_surplus() {
        let cs = charset("xy");
        let pattern = Pattern::parse("a*b");
        assert_eq!(
            pattern_password_at_length(0, &pattern, &cs, 2).as_deref(),
            Some("ab")
        );
        assert_eq!(
            pattern_password_at_length(1, &pattern, &cs, 4).as_deref(),
            Some("axyb")
        );
        assert_eq!(pattern_password_at_length(0, &pattern, &cs, 1), None);
    }

    /// Simple backtracking check that a candidate fits the template.
    fn matches(segments: &[Segment], candidate: &[char], cs: &[char]) -> bool {
        match segments.split_first() {
            None => candidate.is_empty(),
            Some((Segment::Literal(text), rest)) => {
                let lit: Vec<char> = text.chars().collect();
                candidate.starts_with(&lit) && matches(rest, &candidate[lit.len()..], cs)
            }
            Some((Segment::AnyOne, rest)) => candidate
                .first()
                .is_some_and(|c| cs.contains(c) && matches(rest, &candidate[1..], cs)),
            Some((Segment::AnyMany, rest)) => (0..=candidate.len()).any(|take| {
                candidate[..take].iter().all(|c| cs.contains(c)) && matches(rest, &candidate[take..], cs)
            }),
        }
    }

    #[test]
    fn every_pattern_candidate_matches_and_is_unique() {
        let cs = charset("xyz");
        let pattern = Pattern::parse("x?*z");
        for length in 3..=5 {
            let count = pattern.combinations(cs.len() as u64, length).unwrap();
            let mut seen = HashSet::new();
            for i in 0..count {
                let candidate = pattern_password_at_length(i, &pattern, &cs, length).unwrap();
                assert_eq!(candidate.chars().count(), length);
                let chars: Vec<char> = candidate.chars().collect();
                assert!(matches(pattern.segments(), &chars, &cs), "{candidate}");
                assert!(seen.insert(candidate));
            }
            assert_eq!(seen.len(), count as usize);
        }
    }

    #[test]
    fn global_pattern_index_spans_length_windows() {
        let cs = charset("xy");
        let pattern = Pattern::parse("a*b");
        // lengths 2..=4 hold 1 + 2 + 4 candidates
        let counts = vec![(2usize, 1u64), (3, 2), (4, 4)];
        assert_eq!(
            pattern_password_at_global_index(0, &pattern, &cs, &counts).as_deref(),
            Some("ab")
        );
        assert_eq!(
            pattern_password_at_global_index(2, &pattern, &cs, &counts).as_deref(),
            Some("ayb")
        );
        assert_eq!(
            pattern_password_at_global_index(4, &pattern, &cs, &counts).as_deref(),
            Some("axyb")
        );
        assert_eq!(pattern_password_at_global_index(7, &pattern, &cs, &counts), None);
    }
}
