//! Collapsing one pass's observations into unified records.

use std::collections::HashMap;

use beacon_types::{RawService, ServiceRecord, SourcePriority};

fn locations_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Group observations by `(name, type)` and merge each group.
///
/// Two observations with different known locations stay separate. Input
/// order is preserved for the first observation of each group, and every
/// merged record gets the stable id of its final dedup key.
pub fn unify(observations: Vec<RawService>, priority: &SourcePriority) -> Vec<ServiceRecord> {
    let mut records: Vec<ServiceRecord> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();

    for raw in observations {
        let incoming = ServiceRecord::from(raw);
        let key = (incoming.name.clone(), incoming.service_type.clone());
        let members = groups.entry(key).or_default();

        let target = members.iter().copied().find(|&i| {
            locations_compatible(records[i].location.as_deref(), incoming.location.as_deref())
        });
        match target {
            Some(i) => records[i].merge_observation(&incoming, priority),
            None => {
                members.push(records.len());
                records.push(incoming);
            }
        }
    }

    for record in &mut records {
        record.id = record.dedup_key().stable_id();
    }
    records
}
