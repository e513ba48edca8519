//! Secondary indexes over the registry's record set.

use std::collections::{BTreeSet, HashMap};

use beacon_types::{ServiceFilter, ServiceRecord};

type Index = HashMap<String, BTreeSet<String>>;

fn add(index: &mut Index, key: &str, id: &str) {
    index.entry(key.to_string()).or_default().insert(id.to_string());
}

fn drop_id(index: &mut Index, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Six lookup dimensions: name, type, status, tag, owner, source.
///
/// Callers remove a record before mutating it and insert it again after, so
/// every entry always describes the current record.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryIndexes {
    by_name: Index,
    by_type: Index,
    by_status: Index,
    by_tag: Index,
    by_owner: Index,
    by_source: Index,
}

impl RegistryIndexes {
    pub fn rebuild<'a>(records: impl IntoIterator<Item = &'a ServiceRecord>) -> Self {
        let mut indexes = Self::default();
        for record in records {
            indexes.insert(record);
        }
        indexes
    }

    pub fn insert(&mut self, record: &ServiceRecord) {
        let id = record.id.as_str();
        add(&mut self.by_name, &record.name, id);
        add(&mut self.by_type, &record.service_type, id);
        add(&mut self.by_status, &record.status, id);
        add(&mut self.by_source, record.source.as_str(), id);
        for tag in &record.tags {
            add(&mut self.by_tag, tag, id);
        }
        if let Some(owner) = &record.owner {
            add(&mut self.by_owner, owner, id);
        }
    }

    pub fn remove(&mut self, record: &ServiceRecord) {
        let id = record.id.as_str();
        drop_id(&mut self.by_name, &record.name, id);
        drop_id(&mut self.by_type, &record.service_type, id);
        drop_id(&mut self.by_status, &record.status, id);
        drop_id(&mut self.by_source, record.source.as_str(), id);
        for tag in &record.tags {
            drop_id(&mut self.by_tag, tag, id);
        }
        if let Some(owner) = &record.owner {
            drop_id(&mut self.by_owner, owner, id);
        }
    }

    /// Smallest candidate id set for a filter, or `None` when no indexed
    /// field is set and every record is a candidate.
    pub fn candidates(&self, filter: &ServiceFilter) -> Option<BTreeSet<String>> {
        let source = filter.source.map(|s| s.as_str().to_string());
        let lookups = [
            (&self.by_name, filter.name.as_ref()),
            (&self.by_type, filter.service_type.as_ref()),
            (&self.by_status, filter.status.as_ref()),
            (&self.by_tag, filter.tag.as_ref()),
            (&self.by_owner, filter.owner.as_ref()),
            (&self.by_source, source.as_ref()),
        ];

        let empty = BTreeSet::new();
        lookups
            .iter()
            .filter_map(|(index, key)| key.map(|k| index.get(k).unwrap_or(&empty)))
            .min_by_key(|ids| ids.len())
            .cloned()
    }

    /// Count of records per value of one dimension.
    pub fn counts(&self, dimension: IndexDimension) -> HashMap<String, usize> {
        let index = match dimension {
            IndexDimension::Name => &self.by_name,
            IndexDimension::Type => &self.by_type,
            IndexDimension::Status => &self.by_status,
            IndexDimension::Tag => &self.by_tag,
            IndexDimension::Owner => &self.by_owner,
            IndexDimension::Source => &self.by_source,
        };
        index.iter().map(|(k, ids)| (k.clone(), ids.len())).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDimension {
    Name,
    Type,
    Status,
    Tag,
    Owner,
    Source,
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::{RawService, ServiceSource};

    fn record(name: &str, service_type: &str, tag: &str) -> ServiceRecord {
        ServiceRecord::from(RawService::new(name, service_type, ServiceSource::Local).with_tag(tag))
    }

    #[test]
    fn test_remove_leaves_no_empty_keys() {
        let a = record("a", "node", "web");
        let mut indexes = RegistryIndexes::default();
        indexes.insert(&a);
        indexes.remove(&a);
        assert_eq!(indexes, RegistryIndexes::default());
    }

    #[test]
    fn test_candidates_picks_smallest_set() {
        let a = record("a", "node", "web");
        let b = record("b", "node", "worker");
        let c = record("c", "python", "web");
        let indexes = RegistryIndexes::rebuild([&a, &b, &c]);

        let filter = ServiceFilter {
            service_type: Some("node".into()),
            name: Some("b".into()),
            ..Default::default()
        };
        let ids = indexes.candidates(&filter).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&b.id));

        assert!(indexes.candidates(&ServiceFilter::default()).is_none());
        assert!(indexes
            .candidates(&ServiceFilter::by_type("go"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_counts() {
        let indexes = RegistryIndexes::rebuild([
            &record("a", "node", "web"),
            &record("b", "node", "web"),
        ]);
        assert_eq!(indexes.counts(IndexDimension::Type)["node"], 2);
        assert_eq!(indexes.counts(IndexDimension::Source)["local"], 2);
    }
}
