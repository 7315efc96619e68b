//! Replica repair: fill unassigned replica slots and replace ejected or
//! duplicated nodes.

use std::collections::HashSet;
use vbucket_map::{Chain, Histogram, NodeId, VBucketMap};

/// Rewrites every replica slot that is unassigned, duplicates a node already
/// placed earlier in its chain, or sits on a node being ejected.
///
/// Chains are walked in vbucket order and replicas left to right, with an
/// accumulator of the nodes already placed in the chain. Picks take the
/// least-utilized candidate from that turn's histogram, avoiding the
/// accumulator, the master and the eject set; a bad occupant additionally
/// avoids every node of the original chain so it cannot swap with a sibling.
/// Histograms are adjusted inline as picks happen. A slot with no legal
/// candidate is left (or becomes) unassigned. Masters are never touched.
///
/// `histograms` must hold one histogram per turn of the map.
pub fn new_replicas(
    map: &VBucketMap,
    eject: &HashSet<NodeId>,
    histograms: &mut [Histogram],
) -> VBucketMap {
    let chains = map
        .chains()
        .map(|chain| repair_chain(chain, eject, histograms))
        .collect();
    VBucketMap::from_chains(chains)
}

fn repair_chain(chain: &Chain, eject: &HashSet<NodeId>, histograms: &mut [Histogram]) -> Chain {
    let original = chain.slots().to_vec();
    let master = original.first().cloned().flatten();
    let mut slots = original.clone();
    let mut placed: HashSet<NodeId> = HashSet::new();

    for turn in 1..slots.len() {
        let histogram = &mut histograms[turn];
        let occupant = original[turn].clone();
        match occupant {
            None => {
                let avoid = avoid_set(&placed, master.as_ref(), eject, None);
                if let Some(pick) = histogram.least_loaded(&avoid).cloned() {
                    histogram.increment(&pick);
                    placed.insert(pick.clone());
                    slots[turn] = Some(pick);
                }
            }
            Some(node) if placed.contains(&node) || eject.contains(&node) => {
                // Extend the avoidance set with the whole original chain so
                // a replacement cannot swap with a sibling slot.
                let avoid = avoid_set(&placed, master.as_ref(), eject, Some(&original));
                let replacement = histogram.least_loaded(&avoid).cloned();
                histogram.decrement(&node);
                if let Some(pick) = &replacement {
                    histogram.increment(pick);
                    placed.insert(pick.clone());
                }
                slots[turn] = replacement;
            }
            Some(node) => {
                placed.insert(node);
            }
        }
    }
    Chain::new(slots)
}

fn avoid_set(
    placed: &HashSet<NodeId>,
    master: Option<&NodeId>,
    eject: &HashSet<NodeId>,
    original_chain: Option<&[Option<NodeId>]>,
) -> HashSet<NodeId> {
    let mut avoid: HashSet<NodeId> = placed.union(eject).cloned().collect();
    avoid.extend(master.cloned());
    if let Some(chain) = original_chain {
        avoid.extend(chain.iter().flatten().cloned());
    }
    avoid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{map, n, pool, seeded_map};
    use maplit::hashset;
    use quickcheck_macros::quickcheck;

    #[test]
    fn fills_unassigned_replicas_from_the_lightest_node() {
        let m = map(&[&[Some("a"), None], &[Some("b"), None]]);
        let servers = [n("a"), n("b"), n("c")];
        let mut histograms = m.histograms(&servers);

        let repaired = new_replicas(&m, &hashset! {}, &mut histograms);
        // Turn-1 counts start all zero; each pick takes the earliest legal
        // node, excluding the chain's own master.
        assert_eq!(
            repaired.chain(0).unwrap().slots(),
            &[Some(n("a")), Some(n("b"))]
        );
        assert_eq!(
            repaired.chain(1).unwrap().slots(),
            &[Some(n("b")), Some(n("a"))]
        );
    }

    #[test]
    fn replaces_ejected_replicas() {
        let m = map(&[&[Some("a"), Some("x")], &[Some("b"), Some("x")]]);
        let keep = [n("a"), n("b"), n("c")];
        let mut histograms = m.histograms(&keep);

        let repaired = new_replicas(&m, &hashset! { n("x") }, &mut histograms);
        for chain in repaired.chains() {
            assert!(!chain.contains(&n("x")));
        }
        // Earliest legal candidates win: `b` for vbucket 0, then `a`.
        assert_eq!(repaired.chain(0).unwrap().slots()[1], Some(n("b")));
        assert_eq!(repaired.chain(1).unwrap().slots()[1], Some(n("a")));
    }

    #[test]
    fn leaves_slot_unassigned_when_no_candidate_is_legal() {
        // Only `a` is a candidate and it is the master.
        let m = map(&[&[Some("a"), None]]);
        let servers = [n("a")];
        let mut histograms = m.histograms(&servers);

        let repaired = new_replicas(&m, &hashset! {}, &mut histograms);
        assert_eq!(repaired.chain(0).unwrap().slots(), &[Some(n("a")), None]);
    }

    #[test]
    fn clears_ejected_replica_when_nothing_can_replace_it() {
        let m = map(&[&[Some("a"), Some("x")]]);
        let servers = [n("a")];
        let mut histograms = m.histograms(&servers);

        let repaired = new_replicas(&m, &hashset! { n("x") }, &mut histograms);
        assert_eq!(repaired.chain(0).unwrap().slots(), &[Some(n("a")), None]);
    }

    #[test]
    fn duplicate_of_a_filled_slot_is_rewritten_not_swapped() {
        // Filling slot 1 takes `b` (lightest legal); slot 2 then holds a
        // duplicate and must avoid the whole original chain, landing on `c`.
        let m = map(&[&[Some("a"), None, Some("b")]]);
        let servers = [n("a"), n("b"), n("c")];
        let mut histograms = m.histograms(&servers);

        let repaired = new_replicas(&m, &hashset! {}, &mut histograms);
        let slots = repaired.chain(0).unwrap().slots();
        assert_eq!(slots[0], Some(n("a")));
        assert_eq!(slots[1], Some(n("b")));
        assert_eq!(slots[2], Some(n("c")));
    }

    #[test]
    fn masters_are_never_touched() {
        let m = map(&[&[Some("x"), Some("x")]]);
        let keep = [n("a")];
        let mut histograms = m.histograms(&keep);
        let repaired = new_replicas(&m, &hashset! { n("x") }, &mut histograms);
        // The ejected master stays; only the replica is evicted.
        assert_eq!(repaired.chain(0).unwrap().slots(), &[Some(n("x")), Some(n("a"))]);
    }

    #[quickcheck]
    fn repaired_chains_have_no_duplicates_or_ejected_replicas(
        seed: u64,
        vbuckets: u8,
        nodes: u8,
    ) -> bool {
        let servers = pool(nodes as usize % 6 + 3);
        let vbuckets = vbuckets as usize % 32 + 1;
        let m = seeded_map(&servers, vbuckets, 3, seed);
        let eject = hashset! { servers[0].clone() };
        let keep: Vec<_> = servers[1..].to_vec();
        let mut histograms = m.histograms(&keep);

        let repaired = new_replicas(&m, &eject, &mut histograms);
        repaired.chains().all(|chain| {
            let replicas: Vec<_> = chain.slots()[1..].iter().flatten().collect();
            let assigned: Vec<_> = chain.nodes().collect();
            let distinct: HashSet<_> = assigned.iter().collect();
            chain.len() == 3
                && distinct.len() == assigned.len()
                && replicas.iter().all(|node| !eject.contains(*node))
        })
    }

    #[quickcheck]
    fn repair_is_idempotent(seed: u64, vbuckets: u8, nodes: u8) -> bool {
        let servers = pool(nodes as usize % 6 + 3);
        let vbuckets = vbuckets as usize % 32 + 1;
        let m = seeded_map(&servers, vbuckets, 2, seed);
        let eject = hashset! { servers[0].clone() };
        let keep: Vec<_> = servers[1..].to_vec();

        let once = new_replicas(&m, &eject, &mut m.histograms(&keep));
        let twice = new_replicas(&once, &eject, &mut once.histograms(&keep));
        once == twice
    }
}
