use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex},
};

/// Identity of one worker within a parallel load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadContext {
    /// Zero-based index of this worker among the copies of this node.
    pub copy_nr: usize,
    /// Number of workers running the load on this node.
    pub copies: usize,
    /// Index of this worker across every node taking part in the load.
    pub unique_nr: usize,
    /// Destination partition owned by this worker.
    pub partition_id: Option<String>,
    /// Connection the partition resolves to. Partitions sharing it write to
    /// the same table.
    pub destination: Option<String>,
}

/// Set of workers that share one truncate: the whole table, every partition
/// on one database, or a single partition with no known connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TruncateScope {
    Table,
    Destination(String),
    Partition(String),
}

impl LoadContext {
    pub fn single() -> Self {
        Self {
            copy_nr: 0,
            copies: 1,
            unique_nr: 0,
            partition_id: None,
            destination: None,
        }
    }

    pub fn new(copy_nr: usize, copies: usize, unique_nr: usize) -> Self {
        Self {
            copy_nr,
            copies,
            unique_nr,
            partition_id: None,
            destination: None,
        }
    }

    pub fn with_partition(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn with_destination(mut self, connection: impl Into<String>) -> Self {
        self.destination = Some(connection.into());
        self
    }

    /// Only the first worker of the first node, or the owner of a partition,
    /// may truncate.
    pub fn is_truncate_candidate(&self) -> bool {
        (self.copy_nr == 0 && self.unique_nr == 0) || self.partition_id.is_some()
    }

    pub fn truncate_scope(&self) -> TruncateScope {
        match (&self.partition_id, &self.destination) {
            (Some(_), Some(connection)) => TruncateScope::Destination(connection.clone()),
            (Some(id), None) => TruncateScope::Partition(id.clone()),
            (None, _) => TruncateScope::Table,
        }
    }
}

impl fmt::Display for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition_id {
            Some(id) => write!(f, "partition {id}"),
            None => write!(f, "copy {}/{}", self.copy_nr, self.copies),
        }
    }
}

/// Elects at most one truncating worker per scope.
///
/// Candidates still have to win [`TruncateGate::claim`], so two workers that
/// both believe they are the first copy cannot truncate twice.
#[derive(Debug, Clone, Default)]
pub struct TruncateGate {
    claimed: Arc<Mutex<HashSet<TruncateScope>>>,
}

impl TruncateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once per scope.
    pub fn claim(&self, scope: &TruncateScope) -> bool {
        let mut claimed = self
            .claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.insert(scope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_candidates() {
        assert!(LoadContext::single().is_truncate_candidate());
        assert!(LoadContext::new(0, 4, 0).is_truncate_candidate());
        assert!(!LoadContext::new(1, 4, 1).is_truncate_candidate());
        // first copy of a second node
        assert!(!LoadContext::new(0, 4, 4).is_truncate_candidate());
        assert!(LoadContext::new(2, 3, 2).with_partition("p2").is_truncate_candidate());
    }

    #[test]
    fn test_gate_claims_once_per_scope() {
        let gate = TruncateGate::new();
        let shared = gate.clone();

        assert!(gate.claim(&TruncateScope::Table));
        assert!(!shared.claim(&TruncateScope::Table));
        assert!(shared.claim(&TruncateScope::Partition("p1".into())));
        assert!(gate.claim(&TruncateScope::Partition("p2".into())));
        assert!(!gate.claim(&TruncateScope::Partition("p1".into())));
    }

    #[test]
    fn test_partitions_on_one_connection_share_a_scope() {
        let eu = LoadContext::new(0, 3, 0)
            .with_partition("eu")
            .with_destination("postgres://default/db");
        let us = LoadContext::new(1, 3, 1)
            .with_partition("us")
            .with_destination("postgres://default/db");
        let apac = LoadContext::new(2, 3, 2)
            .with_partition("apac")
            .with_destination("postgres://apac/db");

        assert_eq!(eu.truncate_scope(), us.truncate_scope());
        assert_ne!(eu.truncate_scope(), apac.truncate_scope());
        assert_eq!(
            LoadContext::single().with_partition("p1").truncate_scope(),
            TruncateScope::Partition("p1".into())
        );
        // a destination alone does not make a partition
        assert_eq!(
            LoadContext::single().with_destination("postgres://x").truncate_scope(),
            TruncateScope::Table
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(LoadContext::new(1, 3, 1).to_string(), "copy 1/3");
        assert_eq!(LoadContext::single().with_partition("eu").to_string(), "partition eu");
    }
}
