//! Edge traversal tracking for routed transitions.

use crate::envelope::Envelope;
use crate::pipeline::edge_key;

/// Count one `from -> to` traversal on the envelope.
///
/// Returns `false` when the traversal exceeds `limit` (0 means unlimited).
/// The attempt is counted either way so the audit shows the overflow.
pub fn record_traversal(envelope: &mut Envelope, from: &str, to: &str, limit: i32) -> bool {
    let count = envelope
        .pipeline
        .edge_traversals
        .entry(edge_key(from, to))
        .or_insert(0);
    *count += 1;
    limit <= 0 || *count <= limit
}

/// Number of recorded traversals of `from -> to`.
pub fn traversals(envelope: &Envelope, from: &str, to: &str) -> i32 {
    envelope
        .pipeline
        .edge_traversals
        .get(&edge_key(from, to))
        .copied()
        .unwrap_or(0)
}

/// Whether routing `from -> to` goes backwards in the stage order.
///
/// A self-loop (`to == from`) counts: re-running a stage starts a new
/// iteration, so self-looping agents stay under `max_iterations` even
/// without an edge limit. Stages missing from the order never loop back.
pub fn is_loop_back(stage_order: &[String], from: &str, to: &str) -> bool {
    let position = |stage: &str| stage_order.iter().position(|s| s == stage);
    match (position(from), position(to)) {
        (Some(from), Some(to)) => to <= from,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Vec<String> {
        ["intake", "planner", "executor", "critic"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_limit_allows_exactly_max_count() {
        let mut env = Envelope::new();
        for _ in 0..3 {
            assert!(record_traversal(&mut env, "critic", "planner", 3));
        }
        assert!(!record_traversal(&mut env, "critic", "planner", 3));
        assert_eq!(traversals(&env, "critic", "planner"), 4);
        assert_eq!(env.pipeline.edge_traversals["critic->planner"], 4);
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let mut env = Envelope::new();
        for _ in 0..50 {
            assert!(record_traversal(&mut env, "a", "b", 0));
        }
        assert_eq!(traversals(&env, "b", "a"), 0);
    }

    #[test]
    fn test_loop_back_detection() {
        let order = order();
        assert!(is_loop_back(&order, "critic", "planner"));
        assert!(!is_loop_back(&order, "planner", "executor"));
        assert!(!is_loop_back(&order, "critic", "end"));
    }

    #[test]
    fn test_self_loop_is_loop_back() {
        let order = order();
        assert!(is_loop_back(&order, "planner", "planner"));
        assert!(is_loop_back(&order, "critic", "critic"));
        assert!(!is_loop_back(&order, "ghost", "ghost"));
    }
}
