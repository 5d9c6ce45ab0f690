use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::VecDeque,
    fmt,
};

pub mod store;

pub use store::{
    KeyValueStore,
    MemoryStore,
    SledStore,
};

/// Fixed key the serialized history lives under.
pub const HISTORY_KEY: &str = "pop_tx_history";
pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxAction {
    Init,
    Explore,
    Fight,
    Claim,
    Equip,
}

impl TxAction {
    pub const ALL: [TxAction; 5] = [
        TxAction::Init,
        TxAction::Explore,
        TxAction::Fight,
        TxAction::Claim,
        TxAction::Equip,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TxAction::Init => "init",
            TxAction::Explore => "explore",
            TxAction::Fight => "fight",
            TxAction::Claim => "claim",
            TxAction::Equip => "equip",
        }
    }
}

impl fmt::Display for TxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cluster {
    #[default]
    Devnet,
    Testnet,
    MainnetBeta,
}

impl Cluster {
    pub fn query_name(self) -> &'static str {
        match self {
            Cluster::Devnet => "devnet",
            Cluster::Testnet => "testnet",
            Cluster::MainnetBeta => "mainnet-beta",
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cluster::Devnet => "Devnet",
            Cluster::Testnet => "Testnet",
            Cluster::MainnetBeta => "Mainnet Beta",
        };
        write!(f, "{name}")
    }
}

pub fn explorer_url(signature: &str, cluster: Cluster) -> String {
    format!(
        "https://explorer.solana.com/tx/{signature}?cluster={}",
        cluster.query_name()
    )
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub signature: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub action: TxAction,
    pub status: TxStatus,
    pub explorer_url: String,
    #[serde(default)]
    pub simulated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub pending: usize,
    /// Percentage of successful records, 0 when the history is empty.
    pub success_rate: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub init: usize,
    pub explore: usize,
    pub fight: usize,
    pub claim: usize,
    pub equip: usize,
}

impl ActionCounts {
    pub fn get(&self, action: TxAction) -> usize {
        match action {
            TxAction::Init => self.init,
            TxAction::Explore => self.explore,
            TxAction::Fight => self.fight,
            TxAction::Claim => self.claim,
            TxAction::Equip => self.equip,
        }
    }
}

/// Capacity-bounded, persisted record of submitted operations, newest first.
///
/// Every mutation is written through to the backing [`KeyValueStore`] before it returns.
pub struct TransactionHistory<S> {
    records: VecDeque<TransactionRecord>,
    capacity: usize,
    cluster: Cluster,
    store: S,
}

impl<S: KeyValueStore> TransactionHistory<S> {
    /// Load the persisted history. Unreadable data is logged and replaced by an empty
    /// history rather than failing the session.
    pub fn open(store: S, capacity: usize, cluster: Cluster) -> Result<Self> {
        if capacity == 0 {
            bail!("transaction history capacity must be at least 1");
        }
        let mut records = match store.get(HISTORY_KEY)? {
            Some(bytes) => match serde_json::from_slice::<Vec<TransactionRecord>>(&bytes) {
                Ok(records) => VecDeque::from(records),
                Err(err) => {
                    tracing::error!(%err, "failed to load transaction history; starting empty");
                    VecDeque::new()
                }
            },
            None => VecDeque::new(),
        };
        records.truncate(capacity);
        Ok(Self {
            records,
            capacity,
            cluster,
            store,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cluster(&self) -> Cluster {
        self.cluster
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Newest first.
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&TransactionRecord> {
        self.records.front()
    }

    pub fn get(&self, signature: &str) -> Option<&TransactionRecord> {
        self.records.iter().find(|r| r.signature == signature)
    }

    /// Append a record for an operation the remote accepted. It stays `pending` until
    /// [`Self::resolve`] is called.
    pub fn record_pending(&mut self, signature: &str, action: TxAction) -> Result<()> {
        let record = TransactionRecord {
            signature: signature.to_owned(),
            timestamp: Utc::now().timestamp_millis(),
            action,
            status: TxStatus::Pending,
            explorer_url: explorer_url(signature, self.cluster),
            simulated: false,
        };
        self.push(record)
    }

    /// Append a record that is already terminal, used for locally simulated actions.
    pub fn record_simulated(
        &mut self,
        signature: &str,
        action: TxAction,
        status: TxStatus,
    ) -> Result<()> {
        if !status.is_terminal() {
            bail!("simulated records must be created in a terminal status");
        }
        let record = TransactionRecord {
            signature: signature.to_owned(),
            timestamp: Utc::now().timestamp_millis(),
            action,
            status,
            explorer_url: String::new(),
            simulated: true,
        };
        self.push(record)
    }

    /// Move a pending record to its terminal status. A record transitions exactly once.
    pub fn resolve(&mut self, signature: &str, status: TxStatus) -> Result<()> {
        if !status.is_terminal() {
            bail!("cannot resolve {signature} back to pending");
        }
        let record = self
            .records
            .iter_mut()
            .find(|r| r.signature == signature)
            .ok_or_else(|| anyhow!("no transaction record for {signature}"))?;
        if record.status.is_terminal() {
            bail!(
                "transaction {signature} already resolved as {:?}",
                record.status
            );
        }
        record.status = status;
        self.save()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.save()
    }

    pub fn stats(&self) -> HistoryStats {
        let total = self.records.len();
        let count = |status: TxStatus| self.records.iter().filter(|r| r.status == status).count();
        let successful = count(TxStatus::Success);
        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        HistoryStats {
            total,
            successful,
            failed: count(TxStatus::Failed),
            pending: count(TxStatus::Pending),
            success_rate,
        }
    }

    pub fn action_counts(&self) -> ActionCounts {
        let mut counts = ActionCounts::default();
        for record in &self.records {
            match record.action {
                TxAction::Init => counts.init += 1,
                TxAction::Explore => counts.explore += 1,
                TxAction::Fight => counts.fight += 1,
                TxAction::Claim => counts.claim += 1,
                TxAction::Equip => counts.equip += 1,
            }
        }
        counts
    }

    fn push(&mut self, record: TransactionRecord) -> Result<()> {
        if self.get(&record.signature).is_some() {
            bail!("transaction {} is already recorded", record.signature);
        }
        self.records.push_front(record);
        self.records.truncate(self.capacity);
        self.save()
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_vec(&self.records)
            .context("Failed to serialize transaction history")?;
        self.store
            .put(HISTORY_KEY, &json)
            .context("Failed to persist transaction history")
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use proptest::prelude::*;

    fn history() -> TransactionHistory<MemoryStore> {
        TransactionHistory::open(MemoryStore::new(), 3, Cluster::Devnet).unwrap()
    }

    #[test]
    fn record_pending__over_capacity__evicts_oldest() {
        // given
        let mut history = history();

        // when
        for i in 0..5 {
            history.record_pending(&format!("sig{i}"), TxAction::Explore).unwrap();
        }

        // then
        let signatures: Vec<_> = history.records().into_iter().map(|r| r.signature).collect();
        assert_eq!(signatures, vec!["sig4", "sig3", "sig2"]);
    }

    #[test]
    fn resolve__pending_record__transitions_once() {
        // given
        let mut history = history();
        history.record_pending("abc", TxAction::Fight).unwrap();

        // when
        history.resolve("abc", TxStatus::Success).unwrap();
        let second = history.resolve("abc", TxStatus::Failed);

        // then
        assert!(second.is_err());
        assert_eq!(history.get("abc").unwrap().status, TxStatus::Success);
    }

    #[test]
    fn resolve__to_pending__is_rejected() {
        let mut history = history();
        history.record_pending("abc", TxAction::Fight).unwrap();

        assert!(history.resolve("abc", TxStatus::Pending).is_err());
        assert_eq!(history.get("abc").unwrap().status, TxStatus::Pending);
    }

    #[test]
    fn record_pending__duplicate_signature__is_rejected() {
        let mut history = history();
        history.record_pending("abc", TxAction::Init).unwrap();

        assert!(history.record_pending("abc", TxAction::Init).is_err());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn open__persisted_history__is_reloaded() {
        // given
        let store = MemoryStore::new();
        {
            let mut history =
                TransactionHistory::open(store.clone(), 10, Cluster::Devnet).unwrap();
            history.record_pending("one", TxAction::Init).unwrap();
            history.resolve("one", TxStatus::Success).unwrap();
            history
                .record_simulated("two", TxAction::Explore, TxStatus::Success)
                .unwrap();
        }

        // when
        let reloaded = TransactionHistory::open(store, 10, Cluster::Devnet).unwrap();

        // then
        let records = reloaded.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].signature, "two");
        assert!(records[0].simulated);
        assert_eq!(records[1].status, TxStatus::Success);
        assert_eq!(
            records[1].explorer_url,
            "https://explorer.solana.com/tx/one?cluster=devnet"
        );
    }

    #[test]
    fn open__corrupt_payload__starts_empty() {
        let store = MemoryStore::with_entry(HISTORY_KEY, b"not json");

        let history = TransactionHistory::open(store, 10, Cluster::Devnet).unwrap();

        assert!(history.is_empty());
    }

    #[test]
    fn open__payload_written_by_web_client__is_accepted() {
        // given
        let payload = br#"[{"signature":"5abc","timestamp":1700000000000,"action":"claim","status":"pending","explorerUrl":"https://explorer.solana.com/tx/5abc?cluster=devnet"}]"#;
        let store = MemoryStore::with_entry(HISTORY_KEY, payload);

        // when
        let history = TransactionHistory::open(store, 10, Cluster::Devnet).unwrap();

        // then
        let latest = history.latest().unwrap();
        assert_eq!(latest.action, TxAction::Claim);
        assert_eq!(latest.status, TxStatus::Pending);
        assert!(!latest.simulated);
    }

    #[test]
    fn clear__removes_records_and_persists() {
        // given
        let store = MemoryStore::new();
        let mut history = TransactionHistory::open(store.clone(), 5, Cluster::Devnet).unwrap();
        history.record_pending("a", TxAction::Init).unwrap();

        // when
        history.clear().unwrap();

        // then
        let reloaded = TransactionHistory::open(store, 5, Cluster::Devnet).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn stats__mixed_statuses__reports_counts_and_rate() {
        // given
        let mut history =
            TransactionHistory::open(MemoryStore::new(), 10, Cluster::Devnet).unwrap();
        history.record_pending("a", TxAction::Init).unwrap();
        history.record_pending("b", TxAction::Explore).unwrap();
        history.record_pending("c", TxAction::Fight).unwrap();
        history.record_pending("d", TxAction::Fight).unwrap();
        history.resolve("a", TxStatus::Success).unwrap();
        history.resolve("b", TxStatus::Success).unwrap();
        history.resolve("c", TxStatus::Failed).unwrap();

        // when
        let stats = history.stats();
        let counts = history.action_counts();

        // then
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(counts.get(TxAction::Fight), 2);
        assert_eq!(counts.get(TxAction::Claim), 0);
    }

    #[test]
    fn stats__empty_history__has_zero_rate() {
        let history = history();

        assert_eq!(history.stats().success_rate, 0.0);
    }

    proptest! {
        #[test]
        fn record_pending__n_plus_k_inserts__keeps_n_most_recent(
            capacity in 1usize..16,
            extra in 0usize..16,
        ) {
            let mut history =
                TransactionHistory::open(MemoryStore::new(), capacity, Cluster::Devnet).unwrap();
            let total = capacity + extra;
            for i in 0..total {
                history.record_pending(&format!("sig{i}"), TxAction::Explore).unwrap();
            }

            let signatures: Vec<_> =
                history.records().into_iter().map(|r| r.signature).collect();
            let expected: Vec<_> = (extra..total).rev().map(|i| format!("sig{i}")).collect();
            prop_assert_eq!(signatures, expected);
        }
    }
}
