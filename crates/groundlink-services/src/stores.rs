//! Latest-value stores filled by the receive loop.
//!
//! Each store keeps only what the operator can act on: the last
//! acknowledgement, the last configuration block per radio, the last
//! command output, and a bounded ring of telemetry updates.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::watch;

use groundlink_core::record::{AckRecord, CommandRecord};
use groundlink_core::wire::FrameType;

/// The server's answer to the last command.
#[derive(Debug, Clone)]
pub struct AckEntry {
    pub record: AckRecord,
    /// Arrived in a Nack frame.
    pub nack: bool,
    pub received_at: SystemTime,
}

/// A raw configuration block from one of the radios.
#[derive(Debug, Clone)]
pub struct ConfigBlock {
    pub data: Bytes,
    pub received_at: SystemTime,
}

/// Output of a spacecraft command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub record: CommandRecord,
    pub received_at: SystemTime,
}

/// One telemetry update with its arrival sequence number.
#[derive(Debug, Clone)]
pub struct TelemetryEntry {
    pub seq: u64,
    pub record: CommandRecord,
    pub received_at: SystemTime,
}

// ── Telemetry ring ────────────────────────────────────────────────────────────

/// Fixed-capacity ring of telemetry updates. The oldest entry is dropped
/// when a new one arrives at capacity.
pub struct TelemetryRing {
    entries: RwLock<VecDeque<TelemetryEntry>>,
    capacity: usize,
    /// Sequence number of the newest entry, zero before the first.
    latest: watch::Sender<u64>,
}

impl TelemetryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (latest, _) = watch::channel(0);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            latest,
        }
    }

    pub fn push(&self, record: CommandRecord) -> u64 {
        let seq = *self.latest.borrow() + 1;
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(TelemetryEntry {
                seq,
                record,
                received_at: SystemTime::now(),
            });
        }
        self.latest.send_replace(seq);
        seq
    }

    pub fn latest(&self) -> Option<TelemetryEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }

    /// Every buffered entry, oldest first.
    pub fn snapshot(&self) -> Vec<TelemetryEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Notified with the sequence number of each new entry.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.latest.subscribe()
    }
}

// ── Stores ────────────────────────────────────────────────────────────────────

struct StoresInner {
    ack: watch::Sender<Option<AckEntry>>,
    config: DashMap<FrameType, ConfigBlock>,
    command_output: watch::Sender<Option<CommandOutput>>,
    telemetry: TelemetryRing,
}

/// Shared handle to every receive-side store.
#[derive(Clone)]
pub struct LinkStores {
    inner: Arc<StoresInner>,
}

impl LinkStores {
    pub fn new(telemetry_capacity: usize) -> Self {
        let (ack, _) = watch::channel(None);
        let (command_output, _) = watch::channel(None);
        Self {
            inner: Arc::new(StoresInner {
                ack,
                config: DashMap::new(),
                command_output,
                telemetry: TelemetryRing::new(telemetry_capacity),
            }),
        }
    }

    pub fn record_ack(&self, record: AckRecord, nack: bool) {
        self.inner.ack.send_replace(Some(AckEntry {
            record,
            nack,
            received_at: SystemTime::now(),
        }));
    }

    pub fn latest_ack(&self) -> Option<AckEntry> {
        self.inner.ack.borrow().clone()
    }

    pub fn subscribe_ack(&self) -> watch::Receiver<Option<AckEntry>> {
        self.inner.ack.subscribe()
    }

    /// Keep `data` as the latest block for `kind` (ConfigUhf or ConfigXBand).
    pub fn record_config(&self, kind: FrameType, data: &[u8]) {
        self.inner.config.insert(
            kind,
            ConfigBlock {
                data: Bytes::copy_from_slice(data),
                received_at: SystemTime::now(),
            },
        );
    }

    pub fn config(&self, kind: FrameType) -> Option<ConfigBlock> {
        self.inner.config.get(&kind).map(|entry| entry.value().clone())
    }

    pub fn record_command_output(&self, record: CommandRecord) {
        self.inner.command_output.send_replace(Some(CommandOutput {
            record,
            received_at: SystemTime::now(),
        }));
    }

    pub fn latest_command_output(&self) -> Option<CommandOutput> {
        self.inner.command_output.borrow().clone()
    }

    pub fn telemetry(&self) -> &TelemetryRing {
        &self.inner.telemetry
    }
}
