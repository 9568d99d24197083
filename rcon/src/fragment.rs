//! Reassembly buffers for split GoldSrc responses.
//!
//! Buckets are keyed by packet id and expire a fixed interval after their
//! first fragment arrives. Expiry is deadline-based: the owner polls
//! [FragmentStore::next_deadline] and purges, so no timer is armed per
//! bucket.

use crate::goldsrc::Fragment;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct FragmentStore {
    ttl: Duration,
    buckets: HashMap<i32, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    parts: Vec<Option<Vec<u8>>>,
    received: u8,
    deadline: Instant,
}

impl FragmentStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            buckets: HashMap::new(),
        }
    }

    /// Buffers one fragment. Returns the payload concatenation in index
    /// order once every index of the packet is present.
    pub fn insert(&mut self, now: Instant, fragment: &Fragment<'_>) -> Option<Vec<u8>> {
        if fragment.total == 0 || fragment.index >= fragment.total {
            return None;
        }

        let bucket = self
            .buckets
            .entry(fragment.packet_id)
            .or_insert_with(|| Bucket {
                parts: vec![None; fragment.total as usize],
                received: 0,
                deadline: now + self.ttl,
            });

        if bucket.parts.len() != fragment.total as usize {
            // Fragment count disagrees with the open bucket; the datagram
            // cannot belong to it.
            return None;
        }

        let slot = &mut bucket.parts[fragment.index as usize];
        if slot.is_none() {
            *slot = Some(fragment.payload.to_vec());
            bucket.received += 1;
        }

        if usize::from(bucket.received) < bucket.parts.len() {
            return None;
        }

        let bucket = self.buckets.remove(&fragment.packet_id)?;
        let mut assembled = Vec::new();
        for part in bucket.parts {
            assembled.extend_from_slice(&part?);
        }

        Some(assembled)
    }

    /// Drops every bucket whose deadline has passed. Incomplete buckets are
    /// discarded without ever completing.
    pub fn purge_expired(&mut self, now: Instant) {
        self.buckets.retain(|_, bucket| bucket.deadline > now);
    }

    /// Earliest open-bucket deadline, if any bucket is open.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buckets.values().map(|bucket| bucket.deadline).min()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment<'a>(packet_id: i32, total: u8, index: u8, payload: &'a [u8]) -> Fragment<'a> {
        Fragment {
            packet_id,
            total,
            index,
            payload,
        }
    }

    #[test]
    fn reassembles_in_index_order_regardless_of_arrival() {
        let mut store = FragmentStore::new(Duration::from_secs(2));
        let now = Instant::now();

        assert_eq!(store.insert(now, &fragment(1, 3, 2, b"!")), None);
        assert_eq!(store.insert(now, &fragment(1, 3, 0, b"Hello ")), None);
        let assembled = store.insert(now, &fragment(1, 3, 1, b"World")).unwrap();

        assert_eq!(assembled, b"Hello World!");
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_fragments_do_not_complete_a_bucket() {
        let mut store = FragmentStore::new(Duration::from_secs(2));
        let now = Instant::now();

        assert_eq!(store.insert(now, &fragment(1, 2, 0, b"Hello ")), None);
        assert_eq!(store.insert(now, &fragment(1, 2, 0, b"Hello ")), None);
        assert!(!store.is_empty());
    }

    #[test]
    fn interleaved_packet_ids_complete_independently() {
        let mut store = FragmentStore::new(Duration::from_secs(2));
        let now = Instant::now();

        assert_eq!(store.insert(now, &fragment(1, 2, 0, b"one ")), None);
        assert_eq!(store.insert(now, &fragment(2, 2, 1, b"four")), None);
        assert_eq!(
            store.insert(now, &fragment(1, 2, 1, b"two")).unwrap(),
            b"one two"
        );
        assert_eq!(
            store.insert(now, &fragment(2, 2, 0, b"three ")).unwrap(),
            b"three four"
        );
    }

    #[test]
    fn partial_bucket_expires_without_completion() {
        let mut store = FragmentStore::new(Duration::from_secs(2));
        let start = Instant::now();

        assert_eq!(store.insert(start, &fragment(1, 2, 0, b"Hello ")), None);
        assert_eq!(store.next_deadline(), Some(start + Duration::from_secs(2)));

        store.purge_expired(start + Duration::from_secs(3));
        assert!(store.is_empty());

        // The straggler arrives after expiry and opens a fresh bucket that
        // never completes on its own.
        assert_eq!(
            store.insert(start + Duration::from_secs(3), &fragment(1, 2, 1, b"World")),
            None
        );
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let mut store = FragmentStore::new(Duration::from_secs(2));
        let now = Instant::now();

        assert_eq!(store.insert(now, &fragment(1, 0, 0, b"x")), None);
        assert_eq!(store.insert(now, &fragment(1, 2, 2, b"x")), None);
        assert!(store.is_empty());
    }
}
