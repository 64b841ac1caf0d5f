//! Append-only event log with a rolling digest.
//!
//! ```text
//! digest_0 = [0; 32]
//! digest_n = SHA-256(domain ‖ digest_{n-1} ‖ json(event_n))
//! ```
//!
//! Two vaults that executed the same operations end with the same digest,
//! which makes replay divergence cheap to detect. The log is never cloned
//! into frame snapshots: a frame takes a [`Checkpoint`] on entry and a failed
//! frame truncates back to it, so rollback costs only the events it drops.

use poolvault_types::VaultEvent;
use poolvault_types::constants::EVENT_DIGEST_DOMAIN;
use sha2::{Digest, Sha256};

/// Log length and digest at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    len: usize,
    digest: [u8; 32],
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<VaultEvent>,
    digest: [u8; 32],
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: VaultEvent) {
        let mut hasher = Sha256::new();
        hasher.update(EVENT_DIGEST_DOMAIN);
        hasher.update(self.digest);
        match serde_json::to_vec(&event) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(event.name().as_bytes()),
        }
        self.digest = hasher.finalize().into();

        tracing::trace!(
            event = event.name(),
            seq = self.events.len(),
            digest = %hex::encode(self.digest),
            "Event recorded"
        );
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[VaultEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&VaultEvent> {
        self.events.last()
    }

    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }

    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.events.len(),
            digest: self.digest,
        }
    }

    /// Drop every event recorded after `checkpoint` and restore its digest.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        if checkpoint.len < self.events.len() {
            tracing::trace!(
                dropped = self.events.len() - checkpoint.len,
                "Events rolled back"
            );
        }
        self.events.truncate(checkpoint.len);
        self.digest = checkpoint.digest;
    }

    /// Digest as lowercase hex.
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}
