//! Splitting a byte stream into wire-sized segments, and reassembling it
//! back out of segments delivered in arbitrary order.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::wire::MAX_PAYLOAD;
use crate::Error;

/// Number of segments a stream of `len` bytes splits into at `MAX_PAYLOAD`
/// bytes per segment. A zero-length stream still produces exactly one
/// (empty) segment so the LAST flag has somewhere to land.
pub fn total_segments(len: u64) -> u32 {
    if len == 0 {
        return 1;
    }
    let payload = MAX_PAYLOAD as u64;
    (len.div_ceil(payload)) as u32
}

/// Splits an in-memory buffer into segments on demand.
///
/// The reference design works from a random-access source (the original
/// engine consumes a "random-access byte source"); since the server reads
/// whole files into memory before serving them, a plain `Bytes` buffer is
/// sufficient here and avoids a seek-heavy file-handle abstraction. `Bytes`
/// is cheap to hold by value (ref-counted), so the segmenter owns its data
/// instead of borrowing it, letting callers keep it alongside the source
/// bytes for the life of a session.
pub struct Segmenter {
    data: Bytes,
    total_segs: u32,
}

impl Segmenter {
    pub fn new(data: Bytes) -> Self {
        let total_segs = total_segments(data.len() as u64);
        Segmenter { data, total_segs }
    }

    pub fn total_segs(&self) -> u32 {
        self.total_segs
    }

    /// Returns the payload for segment `seq`, or `None` if out of range.
    pub fn segment(&self, seq: u32) -> Option<Bytes> {
        if seq >= self.total_segs {
            return None;
        }
        let start = seq as usize * MAX_PAYLOAD;
        let end = (start + MAX_PAYLOAD).min(self.data.len());
        Some(self.data.slice(start..end))
    }

    pub fn is_last(&self, seq: u32) -> bool {
        seq + 1 == self.total_segs
    }
}

/// Accumulates (seq, payload) pairs delivered in any order and reports
/// completion and reassembled bytes.
#[derive(Debug, Default)]
pub struct Reassembler {
    total_segs: Option<u32>,
    segments: BTreeMap<u32, Bytes>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_segs(&self) -> Option<u32> {
        self.total_segs
    }

    /// Records the expected segment count. Idempotent: later calls with a
    /// differing value are ignored, since `total_segs` is only ever learned
    /// once from the first DATA packet per the engine's own invariant.
    pub fn set_total_segs(&mut self, total_segs: u32) {
        if self.total_segs.is_none() {
            self.total_segs = Some(total_segs);
        }
    }

    /// Inserts a segment. Returns `Ok(true)` if this was a new segment,
    /// `Ok(false)` if it was an identical duplicate. Conflicting bytes for an
    /// already-stored seq are a hard error.
    pub fn insert(&mut self, seq: u32, payload: Bytes) -> Result<bool, Error> {
        match self.segments.get(&seq) {
            Some(existing) if existing == &payload => Ok(false),
            Some(_) => Err(Error::InconsistentPayload(seq)),
            None => {
                self.segments.insert(seq, payload);
                Ok(true)
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        match self.total_segs {
            Some(total) => self.segments.len() as u32 >= total,
            None => false,
        }
    }

    /// Ordered set of missing sequence numbers in `[0, total_segs)`, or an
    /// empty vec if `total_segs` is not yet known.
    pub fn missing(&self) -> Vec<u32> {
        let Some(total) = self.total_segs else {
            return Vec::new();
        };
        (0..total).filter(|seq| !self.segments.contains_key(seq)).collect()
    }

    /// Same as [`missing`](Self::missing) but capped to the first `limit`
    /// entries, for bounding RESEND batch size.
    pub fn missing_batch(&self, limit: usize) -> Vec<u32> {
        let mut missing = self.missing();
        missing.truncate(limit);
        missing
    }

    /// Concatenates stored segments in seq order. Panics if incomplete —
    /// callers must check [`is_complete`](Self::is_complete) first, matching
    /// the engine's own "never emit unless every seq is present" invariant.
    pub fn assemble(&self) -> Vec<u8> {
        assert!(self.is_complete(), "assemble called before completion");
        let mut out = Vec::new();
        for payload in self.segments.values() {
            out.extend_from_slice(payload);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn total_segments_zero_byte_file() {
        assert_eq!(total_segments(0), 1);
    }

    #[test]
    fn total_segments_exact_multiple() {
        assert_eq!(total_segments(MAX_PAYLOAD as u64 * 3), 3);
    }

    #[test]
    fn total_segments_one_byte_over() {
        assert_eq!(total_segments(MAX_PAYLOAD as u64 * 3 + 1), 4);
    }

    #[test]
    fn segmenter_last_flag_on_final_segment() {
        let data = Bytes::from(vec![0u8; MAX_PAYLOAD * 2 + 10]);
        let seg = Segmenter::new(data);
        assert_eq!(seg.total_segs(), 3);
        assert!(!seg.is_last(0));
        assert!(!seg.is_last(1));
        assert!(seg.is_last(2));
        assert_eq!(seg.segment(2).unwrap().len(), 10);
        assert!(seg.segment(3).is_none());
    }

    #[test]
    fn reassembler_rejects_conflicting_bytes() {
        let mut r = Reassembler::new();
        r.set_total_segs(2);
        r.insert(0, Bytes::from_static(b"a")).unwrap();
        let err = r.insert(0, Bytes::from_static(b"b")).unwrap_err();
        assert!(matches!(err, Error::InconsistentPayload(0)));
    }

    #[test]
    fn reassembler_duplicate_insert_is_idempotent() {
        let mut r = Reassembler::new();
        r.set_total_segs(1);
        assert!(r.insert(0, Bytes::from_static(b"a")).unwrap());
        assert!(!r.insert(0, Bytes::from_static(b"a")).unwrap());
    }

    #[test]
    fn reassembler_no_phantom_completion() {
        let mut r = Reassembler::new();
        r.set_total_segs(3);
        r.insert(0, Bytes::from_static(b"a")).unwrap();
        r.insert(1, Bytes::from_static(b"b")).unwrap();
        assert!(!r.is_complete());
        r.insert(2, Bytes::from_static(b"c")).unwrap();
        assert!(r.is_complete());
        assert_eq!(r.assemble(), b"abc");
    }

    #[test]
    fn reassembler_missing_reports_gaps() {
        let mut r = Reassembler::new();
        r.set_total_segs(5);
        r.insert(1, Bytes::from_static(b"x")).unwrap();
        r.insert(3, Bytes::from_static(b"y")).unwrap();
        assert_eq!(r.missing(), vec![0, 2, 4]);
        assert_eq!(r.missing_batch(2), vec![0, 2]);
    }

    proptest! {
        #[test]
        fn prop_reassembly_any_order(data in proptest::collection::vec(any::<u8>(), 0..8192), seed in any::<u64>()) {
            let segmenter = Segmenter::new(Bytes::from(data.clone()));
            let total = segmenter.total_segs();
            let mut order: Vec<u32> = (0..total).collect();
            // deterministic shuffle without rand: reverse in blocks keyed by seed
            let stride = (seed % 7 + 1) as usize;
            if stride > 1 {
                for chunk in order.chunks_mut(stride) {
                    chunk.reverse();
                }
            }
            let mut r = Reassembler::new();
            r.set_total_segs(total);
            for seq in order {
                let payload = segmenter.segment(seq).unwrap();
                r.insert(seq, payload).unwrap();
            }
            prop_assert!(r.is_complete());
            prop_assert_eq!(r.assemble(), data);
        }
    }
}
