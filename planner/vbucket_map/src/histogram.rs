//! Per-turn vbucket counts, the balancer's working state.

use crate::NodeId;
use std::collections::HashSet;

/// Vbucket counts per node for a single chain turn.
///
/// Every candidate node is present from construction onwards, zero-filled if
/// it serves nothing on the turn, so that an idle node is still a candidate
/// for new placements. Entries keep server-list order; every pick and
/// tie-break walks that order, which is what makes planning deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    counts: Vec<(NodeId, usize)>,
}

impl Histogram {
    /// A zero count for every node in `servers`.
    pub fn zeroed(servers: &[NodeId]) -> Self {
        Self {
            counts: servers.iter().map(|node| (node.clone(), 0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, usize)> {
        self.counts.iter().map(|(node, count)| (node, *count))
    }

    /// The count for `node`, or `None` if it is not a candidate.
    pub fn count(&self, node: &NodeId) -> Option<usize> {
        self.counts
            .iter()
            .find(|(n, _)| n == node)
            .map(|(_, count)| *count)
    }

    /// Bumps `node` by one. Nodes outside the candidate set are ignored.
    pub fn increment(&mut self, node: &NodeId) {
        if let Some((_, count)) = self.counts.iter_mut().find(|(n, _)| n == node) {
            *count += 1;
        }
    }

    /// Drops `node` by one. Nodes outside the candidate set are ignored.
    pub fn decrement(&mut self, node: &NodeId) {
        if let Some((_, count)) = self.counts.iter_mut().find(|(n, _)| n == node) {
            *count = count.saturating_sub(1);
        }
    }

    /// First node with the lowest count whose identity is not in `avoid`.
    pub fn least_loaded(&self, avoid: &HashSet<NodeId>) -> Option<&NodeId> {
        self.counts
            .iter()
            .filter(|(node, _)| !avoid.contains(node))
            .min_by_key(|(_, count)| *count)
            .map(|(node, _)| node)
    }

    /// First node carrying the maximum count.
    pub fn max_entry(&self) -> Option<(&NodeId, usize)> {
        // `Iterator::max_by` keeps the last of equal elements; picks must
        // break ties on the first one.
        let mut best: Option<(&NodeId, usize)> = None;
        for (node, count) in &self.counts {
            if best.is_none_or(|(_, b)| *count > b) {
                best = Some((node, *count));
            }
        }
        best
    }

    /// First node carrying the minimum count.
    pub fn min_entry(&self) -> Option<(&NodeId, usize)> {
        self.counts
            .iter()
            .min_by_key(|(_, count)| *count)
            .map(|(node, count)| (node, *count))
    }

    /// Difference between the heaviest and lightest node, zero when empty.
    pub fn spread(&self) -> usize {
        match (self.max_entry(), self.min_entry()) {
            (Some((_, max)), Some((_, min))) => max - min,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn histogram(entries: &[(&str, usize)]) -> Histogram {
        let mut h = Histogram::zeroed(
            &entries.iter().map(|(name, _)| n(name)).collect::<Vec<_>>(),
        );
        for (name, count) in entries {
            for _ in 0..*count {
                h.increment(&n(name));
            }
        }
        h
    }

    #[test]
    fn counts_for_outsiders_are_ignored() {
        let mut h = Histogram::zeroed(&[n("a")]);
        h.increment(&n("z"));
        h.decrement(&n("z"));
        assert_eq!(h.count(&n("z")), None);
        assert_eq!(h.count(&n("a")), Some(0));
    }

    #[test]
    fn least_loaded_prefers_earliest_on_ties() {
        let h = histogram(&[("a", 1), ("b", 0), ("c", 0)]);
        assert_eq!(h.least_loaded(&HashSet::new()), Some(&n("b")));

        let avoid = [n("b")].into_iter().collect();
        assert_eq!(h.least_loaded(&avoid), Some(&n("c")));
    }

    #[test]
    fn least_loaded_is_none_when_everything_is_avoided() {
        let h = histogram(&[("a", 0)]);
        let avoid = [n("a")].into_iter().collect();
        assert_eq!(h.least_loaded(&avoid), None);
    }

    #[test]
    fn extremes_break_ties_on_first_encountered() {
        let h = histogram(&[("a", 2), ("b", 2), ("c", 1), ("d", 1)]);
        assert_eq!(h.max_entry(), Some((&n("a"), 2)));
        assert_eq!(h.min_entry(), Some((&n("c"), 1)));
        assert_eq!(h.spread(), 1);
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let mut h = histogram(&[("a", 0)]);
        h.decrement(&n("a"));
        assert_eq!(h.count(&n("a")), Some(0));
    }
}
