//! Dependency-cycle detection over a set of records.

use std::collections::HashMap;

use beacon_types::ServiceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnStack,
    Done,
}

/// Resolve each record's dependencies to indexes, by id first and then by name.
/// Unknown dependencies and self-edges are dropped.
fn adjacency(records: &[ServiceRecord]) -> Vec<Vec<usize>> {
    let mut by_id = HashMap::new();
    let mut by_name = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        by_id.insert(record.id.as_str(), i);
        by_name.entry(record.name.as_str()).or_insert(i);
    }

    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            record
                .dependencies
                .iter()
                .filter_map(|dep| by_id.get(dep.as_str()).or_else(|| by_name.get(dep.as_str())))
                .copied()
                .filter(|&j| j != i)
                .collect()
        })
        .collect()
}

/// Every dependency cycle, as the list of record ids along it with the first
/// id repeated at the end. Iterative DFS from each record in input order.
pub fn find_dependency_cycles(records: &[ServiceRecord]) -> Vec<Vec<String>> {
    let edges = adjacency(records);
    let mut state = vec![Visit::New; records.len()];
    let mut cycles = Vec::new();

    for start in 0..records.len() {
        if state[start] != Visit::New {
            continue;
        }
        state[start] = Visit::OnStack;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let Some(&child) = edges[node].get(frame.1) else {
                state[node] = Visit::Done;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match state[child] {
                Visit::New => {
                    state[child] = Visit::OnStack;
                    stack.push((child, 0));
                }
                Visit::OnStack => {
                    let from = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[from..].iter().map(|(n, _)| records[*n].id.clone()).collect();
                    cycle.push(records[child].id.clone());
                    cycles.push(cycle);
                }
                Visit::Done => {}
            }
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::{RawService, ServiceSource};

    fn record(name: &str, deps: &[&str]) -> ServiceRecord {
        let mut raw = RawService::new(name, "consul-service", ServiceSource::Consul);
        raw.dependencies = deps.iter().map(|d| d.to_string()).collect();
        ServiceRecord::from(raw)
    }

    #[test]
    fn test_no_cycles_in_a_chain() {
        let records = vec![record("a", &["b"]), record("b", &["c"]), record("c", &[])];
        assert!(find_dependency_cycles(&records).is_empty());
    }

    #[test]
    fn test_finds_cycle_by_name() {
        let records = vec![record("a", &["b"]), record("b", &["c"]), record("c", &["a"])];
        let cycles = find_dependency_cycles(&records);
        assert_eq!(cycles.len(), 1);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(cycles[0], vec![ids[0], ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn test_resolves_by_id() {
        let b = record("b", &[]);
        let a = record("a", &[b.id.as_str()]);
        let mut b = b;
        b.dependencies = vec![a.id.clone()];
        assert_eq!(find_dependency_cycles(&[a, b]).len(), 1);
    }

    #[test]
    fn test_self_edges_and_unknown_deps_ignored() {
        let records = vec![record("a", &["a", "missing"])];
        assert!(find_dependency_cycles(&records).is_empty());
    }
}
