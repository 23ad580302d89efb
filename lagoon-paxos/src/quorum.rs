//! Quorum arithmetic.

/// Strict majority of `total`.
pub fn majority(total: usize) -> usize {
    total / 2 + 1
}

/// True when `available` members form a majority of `total`.
pub fn is_quorum(available: usize, total: usize) -> bool {
    available >= majority(total)
}

/// Number of acks needed from `acceptors` when `allowed_failures` may fail.
///
/// With at least `2f + 1` acceptors, all but `f` must answer. Smaller sets
/// cannot tolerate `f` failures, so every acceptor must answer.
pub fn minimum_quorum_size(acceptors: usize, allowed_failures: usize) -> usize {
    if acceptors >= 2 * allowed_failures + 1 {
        acceptors - allowed_failures
    } else {
        acceptors
    }
}
