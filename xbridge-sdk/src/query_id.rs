//! Replay protection for local-key wallets.
//!
//! Highload wallets reject any `(query_id, created_at)` they have already
//! processed inside their timeout window, so a sender hands out tokens that
//! strictly increase across consecutive calls. Standard wallets use the
//! on-chain sequence number instead, read fresh before every send.

use std::cmp::Ordering;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

/// Largest bit number inside one shift.
pub const MAX_BIT_NUMBER: u16 = 1022;
/// Largest shift value (13 bits).
pub const MAX_SHIFT: u16 = 8191;

const BITS_PER_SHIFT: u32 = MAX_BIT_NUMBER as u32 + 1;

// ═══════════════════════════════════════════════════════════════════════════════
// HIGHLOAD QUERY ID
// ═══════════════════════════════════════════════════════════════════════════════

/// 23-bit highload query id: 13-bit shift plus 10-bit bit number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HighloadQueryId {
    shift: u16,
    bit_number: u16,
}

impl HighloadQueryId {
    pub fn new(shift: u16, bit_number: u16) -> BridgeResult<Self> {
        if shift > MAX_SHIFT || bit_number > MAX_BIT_NUMBER {
            return Err(BridgeError::ReplayWindowExhausted(format!(
                "query id ({}, {}) out of range",
                shift, bit_number
            )));
        }
        Ok(Self { shift, bit_number })
    }

    /// Query id at position `sequence` in iteration order.
    pub fn from_sequence(sequence: u32) -> BridgeResult<Self> {
        let shift = sequence / BITS_PER_SHIFT;
        let bit_number = sequence % BITS_PER_SHIFT;
        if shift > MAX_SHIFT as u32 {
            return Err(BridgeError::ReplayWindowExhausted(format!(
                "sequence {} beyond query id space",
                sequence
            )));
        }
        Self::new(shift as u16, bit_number as u16)
    }

    pub fn shift(&self) -> u16 {
        self.shift
    }

    pub fn bit_number(&self) -> u16 {
        self.bit_number
    }

    /// Position in iteration order.
    pub fn sequence(&self) -> u32 {
        self.shift as u32 * BITS_PER_SHIFT + self.bit_number as u32
    }

    /// Wire form: `shift << 10 | bit_number`.
    pub fn packed(&self) -> u32 {
        ((self.shift as u32) << 10) | self.bit_number as u32
    }

    /// The last pair is reserved for emergency use and never handed out.
    pub fn has_next(&self) -> bool {
        !(self.shift == MAX_SHIFT && self.bit_number >= MAX_BIT_NUMBER - 1)
    }

    pub fn next(&self) -> BridgeResult<Self> {
        if !self.has_next() {
            return Err(BridgeError::ReplayWindowExhausted(
                "all highload query ids used".into(),
            ));
        }
        if self.bit_number == MAX_BIT_NUMBER {
            Ok(Self {
                shift: self.shift + 1,
                bit_number: 0,
            })
        } else {
            Ok(Self {
                shift: self.shift,
                bit_number: self.bit_number + 1,
            })
        }
    }
}

impl Ord for HighloadQueryId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence().cmp(&other.sequence())
    }
}

impl PartialOrd for HighloadQueryId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPLAY TOKEN
// ═══════════════════════════════════════════════════════════════════════════════

/// `(created_at, query_id)` pair attached to one highload external message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplayToken {
    pub created_at: u64,
    pub query_id: HighloadQueryId,
}

impl ReplayToken {
    /// `created_at << 23 | packed query id`.
    pub fn as_u64(&self) -> u64 {
        (self.created_at << 23) | self.query_id.packed() as u64
    }
}

/// Issues strictly increasing replay tokens for one sender instance.
#[derive(Debug, Clone)]
pub struct ReplayGuard {
    safety_margin_secs: u64,
    next_query_id: Option<HighloadQueryId>,
    last: Option<ReplayToken>,
}

impl ReplayGuard {
    /// Start at a random shift so restarted processes rarely reuse ids.
    pub fn new(safety_margin_secs: u64) -> Self {
        let shift = rand::thread_rng().gen_range(0..=MAX_SHIFT / 2);
        Self::starting_at(safety_margin_secs, HighloadQueryId { shift, bit_number: 0 })
    }

    pub fn starting_at(safety_margin_secs: u64, start: HighloadQueryId) -> Self {
        Self {
            safety_margin_secs,
            next_query_id: Some(start),
            last: None,
        }
    }

    pub fn last_issued(&self) -> Option<ReplayToken> {
        self.last
    }

    /// Issue the next token for wall-clock time `now` (unix seconds).
    pub fn issue(&mut self, now: u64) -> BridgeResult<ReplayToken> {
        let query_id = self.next_query_id.ok_or_else(|| {
            BridgeError::ReplayWindowExhausted("all highload query ids used".into())
        })?;

        let mut created_at = now.saturating_sub(self.safety_margin_secs);
        if let Some(last) = self.last {
            if created_at <= last.created_at {
                created_at = last.created_at + 1;
            }
        }

        let token = ReplayToken {
            created_at,
            query_id,
        };
        self.next_query_id = if query_id.has_next() {
            Some(query_id.next()?)
        } else {
            None
        };
        self.last = Some(token);

        debug!(
            created_at,
            shift = query_id.shift(),
            bit_number = query_id.bit_number(),
            "issued replay token"
        );
        Ok(token)
    }

    /// How long to wait before `token` is no longer in the future.
    pub fn wait_before_send(token: &ReplayToken, now: u64) -> Option<Duration> {
        (token.created_at > now).then(|| Duration::from_secs(token.created_at - now))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEQNO
// ═══════════════════════════════════════════════════════════════════════════════

/// Sequence-number bookkeeping for standard wallets.
///
/// The seqno lives on chain; this only remembers the last value signed so a
/// stale read cannot produce a second message with the same seqno.
#[derive(Debug, Clone, Default)]
pub struct SeqnoDiscipline {
    last_signed: Option<u32>,
}

impl SeqnoDiscipline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a freshly read chain seqno before signing with it.
    pub fn check(&self, chain_seqno: u32) -> BridgeResult<u32> {
        if let Some(last) = self.last_signed {
            if chain_seqno <= last {
                return Err(BridgeError::Rpc(format!(
                    "seqno {} already used (last signed {})",
                    chain_seqno, last
                )));
            }
        }
        Ok(chain_seqno)
    }

    /// Record a seqno whose message was accepted for submission.
    pub fn commit(&mut self, seqno: u32) {
        self.last_signed = Some(seqno);
    }

    /// Whether the chain has applied the last signed message.
    pub fn has_advanced(&self, chain_seqno: u32) -> bool {
        match self.last_signed {
            Some(last) => chain_seqno > last,
            None => true,
        }
    }

    pub fn last_signed(&self) -> Option<u32> {
        self.last_signed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_iteration_order() {
        let q = HighloadQueryId::new(0, MAX_BIT_NUMBER).unwrap();
        let n = q.next().unwrap();
        assert_eq!((n.shift(), n.bit_number()), (1, 0));
        assert!(n > q);
        assert_eq!(HighloadQueryId::from_sequence(n.sequence()).unwrap(), n);
        assert_eq!(n.packed(), 1 << 10);
    }

    #[test]
    fn test_last_pair_is_reserved() {
        let penultimate = HighloadQueryId::new(MAX_SHIFT, MAX_BIT_NUMBER - 2).unwrap();
        assert!(penultimate.has_next());
        let last = penultimate.next().unwrap();
        assert!(!last.has_next());
        assert!(matches!(
            last.next(),
            Err(BridgeError::ReplayWindowExhausted(_))
        ));
        assert!(HighloadQueryId::new(MAX_SHIFT + 1, 0).is_err());
    }

    #[test]
    fn test_tokens_increase_within_one_second() {
        let mut guard = ReplayGuard::new(30);
        let now = 1_700_000_000;
        let a = guard.issue(now).unwrap();
        let b = guard.issue(now).unwrap();
        let c = guard.issue(now).unwrap();

        assert_eq!(a.created_at, now - 30);
        assert!(b > a && c > b);
        assert!(b.created_at > a.created_at);
        assert!(b.query_id > a.query_id);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_bumped_token_requests_wait() {
        let mut guard = ReplayGuard::starting_at(0, HighloadQueryId::default());
        let now = 1_000;
        let a = guard.issue(now).unwrap();
        assert!(ReplayGuard::wait_before_send(&a, now).is_none());
        let b = guard.issue(now).unwrap();
        assert_eq!(b.created_at, now + 1);
        assert_eq!(
            ReplayGuard::wait_before_send(&b, now),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_guard_exhaustion() {
        let start = HighloadQueryId::new(MAX_SHIFT, MAX_BIT_NUMBER - 1).unwrap();
        let mut guard = ReplayGuard::starting_at(0, start);
        guard.issue(10).unwrap();
        assert!(matches!(
            guard.issue(11),
            Err(BridgeError::ReplayWindowExhausted(_))
        ));
    }

    #[test]
    fn test_seqno_discipline() {
        let mut seqno = SeqnoDiscipline::new();
        assert!(seqno.has_advanced(0));
        assert_eq!(seqno.check(4).unwrap(), 4);
        seqno.commit(4);
        assert!(!seqno.has_advanced(4));
        assert!(seqno.check(4).is_err());
        assert!(seqno.has_advanced(5));
        assert_eq!(seqno.check(5).unwrap(), 5);
        assert_eq!(seqno.last_signed(), Some(4));
    }
}
