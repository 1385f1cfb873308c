// This file is part of LATTICE.
//
// Copyright (C) 2022 Affidaty Spa.
//
// LATTICE is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// LATTICE is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with LATTICE. If not, see <https://www.gnu.org/licenses/>.

//! Transactions grouping for parallel execution.
//!
//! A block batch is partitioned into groups touching disjoint state
//! resources. Each group can then run on a private fork with no conflicts
//! with its siblings.

use crate::{base::schema::Transaction, contract::Runtime, Error, ErrorKind, Result};
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};

/// Group consolidation strategy applied after resources partitioning.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingStrategy {
    /// One group per connected component, regardless of the cores count.
    #[serde(rename = "naive")]
    Naive,
    /// Repeatedly merge the two smallest groups until the count fits the
    /// available cores.
    #[serde(rename = "mins-add-up")]
    MinsAddUp,
    /// Fill the biggest groups with the smallest ones up to a size
    /// threshold, leftovers collapse in the last group.
    #[serde(rename = "max-add-mins")]
    MaxAddMins,
}

/// Grouping outcome. Transactions are referenced by their position in the
/// original batch, receipts keep that position regardless of the group.
#[derive(Debug, Default)]
pub struct GroupedTransactions {
    /// Conflict-free groups, positions ascending within each group.
    pub groups: Vec<Vec<usize>>,
    /// Transactions left out of the batch with the resources detection
    /// error. These yield a failed receipt without touching the state.
    pub failed: Vec<(usize, Error)>,
}

/// Union-find over the batch positions.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        DisjointSet {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    // Keeps the smaller position as root so that components stay anchored
    // to their earliest transaction.
    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Partition the batch in connected components over the state resources
/// declared by the runtime for each transaction.
///
/// Transactions sharing at least one resource end up in the same group,
/// resource-free transactions each form their own group. Components are
/// reported in batch order.
pub fn group_naive(runtime: &dyn Runtime, txs: &[Transaction]) -> GroupedTransactions {
    let mut set = DisjointSet::new(txs.len());
    let mut owners: HashMap<String, usize> = HashMap::new();
    let mut excluded = vec![false; txs.len()];
    let mut failed = vec![];

    for (i, tx) in txs.iter().enumerate() {
        match runtime.resources(&tx.data) {
            Ok(resources) => {
                for resource in resources {
                    match owners.get(&resource) {
                        Some(&owner) => set.union(i, owner),
                        None => {
                            owners.insert(resource, i);
                        }
                    }
                }
            }
            Err(err) => {
                excluded[i] = true;
                failed.push((i, err));
            }
        }
    }

    let mut group_of: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = vec![];
    for i in 0..txs.len() {
        if excluded[i] {
            continue;
        }
        let root = set.find(i);
        match group_of.get(&root) {
            Some(&idx) => groups[idx].push(i),
            None => {
                group_of.insert(root, groups.len());
                groups.push(vec![i]);
            }
        }
    }

    GroupedTransactions { groups, failed }
}

/// Partition the batch and consolidate the groups for the given cores
/// count. A zero `cores` value is rejected.
pub fn group_with_cores(
    runtime: &dyn Runtime,
    strategy: GroupingStrategy,
    cores: usize,
    txs: &[Transaction],
) -> Result<GroupedTransactions> {
    if cores == 0 {
        return Err(Error::new_ext(
            ErrorKind::Other,
            "at least one execution core is required",
        ));
    }
    let mut grouped = group_naive(runtime, txs);
    grouped.groups = match strategy {
        GroupingStrategy::Naive => grouped.groups,
        GroupingStrategy::MinsAddUp => mins_add_up(grouped.groups, cores),
        GroupingStrategy::MaxAddMins => max_add_mins(grouped.groups, cores, txs.len()),
    };
    Ok(grouped)
}

fn mins_add_up(mut groups: Vec<Vec<usize>>, cores: usize) -> Vec<Vec<usize>> {
    while groups.len() > cores {
        // Smallest groups at the back, ties resolved by discovery order.
        groups.sort_by_key(|group| Reverse(group.len()));
        match (groups.pop(), groups.pop()) {
            (Some(smallest), Some(mut next)) => {
                next.extend(smallest);
                next.sort_unstable();
                groups.push(next);
            }
            _ => break,
        }
    }
    groups
}

fn max_add_mins(mut groups: Vec<Vec<usize>>, cores: usize, txs_count: usize) -> Vec<Vec<usize>> {
    if groups.len() <= cores {
        return groups;
    }
    let threshold = (txs_count / cores).max(1);
    groups.sort_by_key(|group| Reverse(group.len()));
    let mut deque: VecDeque<Vec<usize>> = groups.into();
    let mut merged: Vec<Vec<usize>> = Vec::with_capacity(cores);
    while let Some(mut group) = deque.pop_front() {
        if merged.len() + 1 == cores {
            // Last seat takes the leftovers.
            for rest in deque.drain(..) {
                group.extend(rest);
            }
            group.sort_unstable();
            merged.push(group);
            break;
        }
        while group.len() < threshold {
            match deque.pop_back() {
                Some(smallest) => group.extend(smallest),
                None => break,
            }
        }
        group.sort_unstable();
        merged.push(group);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_tx;
    use crate::contract::MockRuntime;

    fn create_batch(count: u8) -> Vec<Transaction> {
        (0..count)
            .map(|i| {
                let mut tx = create_test_tx();
                tx.data.nonce = vec![i];
                tx
            })
            .collect()
    }

    fn create_mock_runtime(table: fn(u8) -> Result<Vec<String>>) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_resources()
            .returning(move |data| table(data.nonce[0]));
        runtime
    }

    fn singleton_resources(i: u8) -> Result<Vec<String>> {
        Ok(vec![format!("res-{}", i)])
    }

    #[test]
    fn naive_groups_by_shared_resources() {
        let txs = create_batch(5);
        let runtime = create_mock_runtime(|i| {
            let resources = match i {
                0 => vec!["a", "b"],
                1 => vec!["c"],
                2 => vec!["b", "d"],
                3 => vec![],
                _ => vec!["d", "c"],
            };
            Ok(resources.into_iter().map(str::to_owned).collect())
        });

        let grouped = group_naive(&runtime, &txs);

        assert_eq!(grouped.groups, vec![vec![0, 1, 2, 4], vec![3]]);
        assert!(grouped.failed.is_empty());
    }

    #[test]
    fn naive_keeps_resource_free_apart() {
        let txs = create_batch(3);
        let runtime = create_mock_runtime(|_| Ok(vec![]));

        let grouped = group_naive(&runtime, &txs);

        assert_eq!(grouped.groups, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn naive_reports_detection_failures() {
        let txs = create_batch(3);
        let runtime = create_mock_runtime(|i| match i {
            1 => Err(Error::new(ErrorKind::SmartContractFault)),
            _ => singleton_resources(i),
        });

        let grouped = group_naive(&runtime, &txs);

        assert_eq!(grouped.groups, vec![vec![0], vec![2]]);
        assert_eq!(grouped.failed.len(), 1);
        assert_eq!(grouped.failed[0].0, 1);
        assert_eq!(grouped.failed[0].1.kind, ErrorKind::SmartContractFault);
    }

    #[test]
    fn cores_zero_is_rejected() {
        let txs = create_batch(2);
        let runtime = create_mock_runtime(singleton_resources);

        let err = group_with_cores(&runtime, GroupingStrategy::Naive, 0, &txs).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Other);
    }

    #[test]
    fn naive_strategy_ignores_cores() {
        let txs = create_batch(3);
        let runtime = create_mock_runtime(singleton_resources);

        let grouped = group_with_cores(&runtime, GroupingStrategy::Naive, 1, &txs).unwrap();

        assert_eq!(grouped.groups.len(), 3);
    }

    #[test]
    fn mins_add_up_merges_smallest_groups() {
        let txs = create_batch(4);
        let runtime = create_mock_runtime(singleton_resources);

        let grouped = group_with_cores(&runtime, GroupingStrategy::MinsAddUp, 2, &txs).unwrap();

        assert_eq!(grouped.groups, vec![vec![2, 3], vec![0, 1]]);
    }

    #[test]
    fn mins_add_up_with_enough_cores() {
        let txs = create_batch(3);
        let runtime = create_mock_runtime(singleton_resources);

        let grouped = group_with_cores(&runtime, GroupingStrategy::MinsAddUp, 8, &txs).unwrap();

        assert_eq!(grouped.groups.len(), 3);
    }

    #[test]
    fn max_add_mins_threshold_fill() {
        let txs = create_batch(6);
        let runtime = create_mock_runtime(|i| match i {
            0..=2 => Ok(vec!["x".to_owned()]),
            _ => singleton_resources(i),
        });

        let grouped = group_with_cores(&runtime, GroupingStrategy::MaxAddMins, 2, &txs).unwrap();

        assert_eq!(grouped.groups, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn max_add_mins_collapses_overflow() {
        let txs = create_batch(5);
        let runtime = create_mock_runtime(singleton_resources);

        let grouped = group_with_cores(&runtime, GroupingStrategy::MaxAddMins, 2, &txs).unwrap();

        assert_eq!(grouped.groups, vec![vec![0, 4], vec![1, 2, 3]]);
    }
}
