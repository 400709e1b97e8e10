//! Revision ordering between push messages.
//!
//! Backends may omit revisions entirely, so every comparison works on
//! `Option<Revision>` and a missing value never makes anything stale.

/// Monotonically increasing revision stamped on snapshots and deltas.
pub type Revision = u64;

/// True iff both revisions are present and `candidate < current`.
pub fn is_stale(candidate: Option<Revision>, current: Option<Revision>) -> bool {
    match (candidate, current) {
        (Some(candidate), Some(current)) => candidate < current,
        _ => false,
    }
}

/// True iff `candidate` is present and moves past `current`.
pub fn is_advance(candidate: Option<Revision>, current: Option<Revision>) -> bool {
    match (candidate, current) {
        (Some(candidate), Some(current)) => candidate > current,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_only_when_both_known_and_lower() {
        assert!(is_stale(Some(1), Some(2)));
        assert!(!is_stale(Some(2), Some(2)));
        assert!(!is_stale(Some(3), Some(2)));
        assert!(!is_stale(None, Some(2)));
        assert!(!is_stale(Some(1), None));
        assert!(!is_stale(None, None));
    }

    #[test]
    fn advance_requires_a_candidate() {
        assert!(is_advance(Some(3), Some(2)));
        assert!(is_advance(Some(0), None));
        assert!(!is_advance(Some(2), Some(2)));
        assert!(!is_advance(None, Some(2)));
        assert!(!is_advance(None, None));
    }
}
