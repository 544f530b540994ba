//! Packing engine.
//!
//! Splits an ordered list of messages into the fewest groups whose encoded
//! external message stays under the transport's size and depth ceilings.
//! Groups are encoded with the real wallet framing, so the measurement is
//! exactly what will be submitted.

use std::ops::Range;

use serde::Serialize;
use tracing::{debug, trace};

use crate::cell::{boc, Cell};
use crate::error::{BridgeError, BridgeResult};

/// External message size ceiling in bytes.
pub const DEFAULT_MAX_BOC_BYTES: usize = 65_535;
/// External message depth ceiling.
pub const DEFAULT_MAX_DEPTH: u16 = 512;

/// Ceilings one group must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingLimits {
    /// Wallet-specific message count ceiling.
    pub max_messages: usize,
    pub max_boc_bytes: usize,
    pub max_depth: u16,
}

impl PackingLimits {
    /// Count ceiling with the default size and depth ceilings.
    pub fn with_max_messages(max_messages: usize) -> Self {
        Self {
            max_messages,
            max_boc_bytes: DEFAULT_MAX_BOC_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_boc_bytes(mut self, bytes: usize) -> Self {
        self.max_boc_bytes = bytes;
        self
    }

    pub fn with_max_depth(mut self, depth: u16) -> Self {
        self.max_depth = depth;
        self
    }
}

/// A packed group and the encoding that proved it fits.
#[derive(Debug, Clone)]
pub struct MessageGroup<T> {
    /// Indices of `messages` in the input list.
    pub range: Range<usize>,
    pub messages: Vec<T>,
    pub encoded: Cell,
    pub boc_bytes: usize,
}

enum Fit {
    Fits(Cell, usize),
    TooLarge(String),
}

fn measure<T, F>(slice: &[T], limits: &PackingLimits, encode: &mut F) -> BridgeResult<Fit>
where
    F: FnMut(&[T]) -> BridgeResult<Cell>,
{
    let cell = match encode(slice) {
        Ok(cell) => cell,
        Err(BridgeError::CellOverflow(reason)) => return Ok(Fit::TooLarge(reason)),
        Err(e) => return Err(e),
    };
    let size = boc::serialize(&cell)?.len();
    if size > limits.max_boc_bytes {
        return Ok(Fit::TooLarge(format!(
            "{} bytes > {} byte ceiling",
            size, limits.max_boc_bytes
        )));
    }
    if cell.depth() > limits.max_depth {
        return Ok(Fit::TooLarge(format!(
            "depth {} > {} ceiling",
            cell.depth(),
            limits.max_depth
        )));
    }
    Ok(Fit::Fits(cell, size))
}

/// Pack `messages` into ordered groups under `limits`.
///
/// Each round starts from the largest count the ceiling allows and halves
/// until the group fits, then searches back up between the fitting and the
/// failing size so each group is as large as possible. A lone message that
/// does not fit is reported as [`BridgeError::MessageTooLarge`].
pub fn pack_messages<T, F>(
    messages: &[T],
    limits: &PackingLimits,
    mut encode: F,
) -> BridgeResult<Vec<MessageGroup<T>>>
where
    T: Clone,
    F: FnMut(&[T]) -> BridgeResult<Cell>,
{
    if limits.max_messages == 0 {
        return Err(BridgeError::StructuralLimit(
            "message count ceiling is zero".into(),
        ));
    }

    let mut groups = Vec::new();
    let mut cursor = 0;

    while cursor < messages.len() {
        let remaining = messages.len() - cursor;
        let mut candidate = limits.max_messages.min(remaining);
        let mut failing_bound = candidate + 1;
        let mut last_reason = String::new();

        let (mut size, mut cell, mut bytes) = loop {
            if candidate == 0 {
                return Err(BridgeError::MessageTooLarge {
                    index: cursor,
                    reason: last_reason,
                });
            }
            match measure(&messages[cursor..cursor + candidate], limits, &mut encode)? {
                Fit::Fits(cell, bytes) => break (candidate, cell, bytes),
                Fit::TooLarge(reason) => {
                    trace!(cursor, candidate, %reason, "group does not fit, halving");
                    last_reason = reason;
                    failing_bound = candidate;
                    candidate /= 2;
                }
            }
        };

        while failing_bound - size > 1 {
            let mid = size + (failing_bound - size) / 2;
            match measure(&messages[cursor..cursor + mid], limits, &mut encode)? {
                Fit::Fits(c, b) => {
                    size = mid;
                    cell = c;
                    bytes = b;
                }
                Fit::TooLarge(_) => failing_bound = mid,
            }
        }

        debug!(
            start = cursor,
            count = size,
            boc_bytes = bytes,
            depth = cell.depth(),
            "packed message group"
        );
        groups.push(MessageGroup {
            range: cursor..cursor + size,
            messages: messages[cursor..cursor + size].to_vec(),
            encoded: cell,
            boc_bytes: bytes,
        });
        cursor += size;
    }

    Ok(groups)
}

// ═══════════════════════════════════════════════════════════════════════════════
// MULTI-GROUP DISPATCH REPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of one group in a multi-group send.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub group_index: usize,
    pub message_range: Range<usize>,
    pub success: bool,
    /// Submitted, but the wallet never showed it as processed. Such a group
    /// counts as sent and must not be resent.
    pub unconfirmed: bool,
    /// Hash of the submitted external message, when one was submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-group results of a multi-group send. Dispatch stops at the first
/// failed group; later groups are counted in `unsent_groups`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSendReport {
    pub groups: Vec<GroupReport>,
    /// Index of the last message handed to the chain.
    pub last_sent_message: Option<usize>,
    pub unsent_groups: usize,
    pub total_messages: usize,
}

impl BatchSendReport {
    pub fn new(total_groups: usize, total_messages: usize) -> Self {
        Self {
            groups: Vec::with_capacity(total_groups),
            last_sent_message: None,
            unsent_groups: total_groups,
            total_messages,
        }
    }

    pub fn record_sent(&mut self, range: Range<usize>, external_hash: Option<String>) {
        if range.end > 0 {
            self.last_sent_message = Some(range.end - 1);
        }
        self.push(range, true, external_hash, None);
    }

    pub fn record_failed(&mut self, range: Range<usize>, error: &BridgeError) {
        self.push(range, false, None, Some(error.to_string()));
    }

    /// Record a group that reached the chain without confirmation.
    pub fn record_unconfirmed(
        &mut self,
        range: Range<usize>,
        external_hash: String,
        reason: String,
    ) {
        if range.end > 0 {
            self.last_sent_message = Some(range.end - 1);
        }
        self.groups.push(GroupReport {
            group_index: self.groups.len(),
            message_range: range,
            success: false,
            unconfirmed: true,
            external_hash: Some(external_hash),
            error: Some(reason),
        });
        self.unsent_groups = self.unsent_groups.saturating_sub(1);
    }

    fn push(
        &mut self,
        range: Range<usize>,
        success: bool,
        external_hash: Option<String>,
        error: Option<String>,
    ) {
        self.groups.push(GroupReport {
            group_index: self.groups.len(),
            message_range: range,
            success,
            unconfirmed: false,
            external_hash,
            error,
        });
        self.unsent_groups = self.unsent_groups.saturating_sub(1);
        if !success {
            // The failed group counts as unsent too.
            self.unsent_groups += 1;
        }
    }

    /// Every group was sent.
    pub fn is_complete(&self) -> bool {
        self.unsent_groups == 0 && self.groups.iter().all(|g| g.success)
    }

    pub fn messages_sent(&self) -> usize {
        self.last_sent_message.map(|i| i + 1).unwrap_or(0)
    }

    pub fn first_failure(&self) -> Option<&GroupReport> {
        self.groups.iter().find(|g| !g.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;
    use std::sync::Arc;

    /// One ref per message, chained so every message adds a level of depth.
    fn chain_encoder(payload_bytes: usize) -> impl FnMut(&[u32]) -> BridgeResult<Cell> {
        move |slice: &[u32]| {
            let mut tail: Option<Arc<Cell>> = None;
            for id in slice.iter().rev() {
                let mut b = CellBuilder::new();
                b.store_uint(*id as u64, 32)?;
                b.store_bytes(&vec![0xaa; payload_bytes])?;
                if let Some(t) = tail.take() {
                    b.store_ref(t)?;
                }
                tail = Some(Arc::new(b.build()?));
            }
            let mut root = CellBuilder::new();
            root.store_uint(slice.len() as u64, 16)?;
            if let Some(t) = tail {
                root.store_ref(t)?;
            }
            root.build()
        }
    }

    fn flatten(groups: &[MessageGroup<u32>]) -> Vec<u32> {
        groups.iter().flat_map(|g| g.messages.clone()).collect()
    }

    #[test]
    fn test_empty_input_yields_no_groups() {
        let limits = PackingLimits::with_max_messages(4);
        let groups = pack_messages::<u32, _>(&[], &limits, chain_encoder(4)).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_300_messages_with_254_ceiling() {
        let messages: Vec<u32> = (0..300).collect();
        let limits = PackingLimits::with_max_messages(254);
        let groups = pack_messages(&messages, &limits, chain_encoder(8)).unwrap();

        assert!(groups.len() >= 2);
        assert!(groups.iter().all(|g| g.messages.len() <= 254));
        assert_eq!(flatten(&groups), messages);
        assert_eq!(groups[0].range.start, 0);
        for pair in groups.windows(2) {
            assert_eq!(pair[0].range.end, pair[1].range.start);
        }
    }

    #[test]
    fn test_size_ceiling_forces_split() {
        let messages: Vec<u32> = (0..40).collect();
        // Each message carries ~100 bytes, so 10 messages cannot fit 700 bytes.
        let limits = PackingLimits::with_max_messages(254).with_max_boc_bytes(700);
        let groups = pack_messages(&messages, &limits, chain_encoder(100)).unwrap();

        assert!(groups.len() > 1);
        assert!(groups.iter().all(|g| g.boc_bytes <= 700));
        assert_eq!(flatten(&groups), messages);
    }

    #[test]
    fn test_groups_are_maximal_near_the_ceiling() {
        let messages: Vec<u32> = (0..50).collect();
        let limits = PackingLimits::with_max_messages(254).with_max_boc_bytes(1_000);
        let mut encode = chain_encoder(60);
        let groups = pack_messages(&messages, &limits, &mut encode).unwrap();

        for pair in groups.windows(2) {
            let merged_end = pair[0].range.end + 1;
            let grown = &messages[pair[0].range.start..merged_end];
            let cell = encode(grown).unwrap();
            let size = boc::serialize(&cell).unwrap().len();
            assert!(size > 1_000, "group {:?} could have taken one more", pair[0].range);
        }
    }

    #[test]
    fn test_depth_ceiling() {
        let messages: Vec<u32> = (0..20).collect();
        let limits = PackingLimits::with_max_messages(254).with_max_depth(5);
        let groups = pack_messages(&messages, &limits, chain_encoder(0)).unwrap();
        assert!(groups.iter().all(|g| g.encoded.depth() <= 5));
        assert!(groups.iter().all(|g| g.messages.len() == 5 || g.range.end == 20));
        assert_eq!(flatten(&groups), messages);
    }

    #[test]
    fn test_oversized_single_message_is_fatal() {
        let messages: Vec<u32> = (0..3).collect();
        let limits = PackingLimits::with_max_messages(4).with_max_boc_bytes(20);
        let err = pack_messages(&messages, &limits, chain_encoder(64)).unwrap_err();
        assert!(matches!(err, BridgeError::MessageTooLarge { index: 0, .. }));
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let limits = PackingLimits::with_max_messages(0);
        let err = pack_messages(&[1u32], &limits, chain_encoder(0)).unwrap_err();
        assert!(matches!(err, BridgeError::StructuralLimit(_)));
    }

    #[test]
    fn test_report_stops_at_first_failure() {
        let mut report = BatchSendReport::new(3, 30);
        report.record_sent(0..10, Some("aa".into()));
        report.record_failed(10..20, &BridgeError::Rpc("rejected".into()));

        assert!(!report.is_complete());
        assert_eq!(report.last_sent_message, Some(9));
        assert_eq!(report.messages_sent(), 10);
        assert_eq!(report.unsent_groups, 2);
        assert_eq!(report.first_failure().unwrap().group_index, 1);
    }

    #[test]
    fn test_unconfirmed_group_counts_as_sent() {
        let mut report = BatchSendReport::new(3, 30);
        report.record_sent(0..10, Some("aa".into()));
        report.record_unconfirmed(10..20, "bb".into(), "seqno stuck".into());

        assert!(!report.is_complete());
        assert_eq!(report.messages_sent(), 20);
        assert_eq!(report.unsent_groups, 1);
        let group = report.first_failure().unwrap();
        assert!(group.unconfirmed);
        assert_eq!(group.external_hash.as_deref(), Some("bb"));
    }
}
