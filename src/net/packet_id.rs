//! 12-bit packet id generation.
//!
//! Ids wrap mod 4096 and skip zero so a fresh header never looks like an
//! unset one. The start point is randomized per generator to keep two
//! restarts of the same client from replaying the same id sequence.

use std::sync::atomic::{AtomicU16, Ordering};

use rand::Rng;

#[derive(Debug)]
pub struct PacketIdGenerator {
    current: AtomicU16,
}

impl PacketIdGenerator {
    pub fn new() -> Self {
        let seed = rand::thread_rng().gen_range(1..=0x0FFF);
        Self::starting_at(seed)
    }

    pub fn starting_at(seed: u16) -> Self {
        Self {
            current: AtomicU16::new(seed & 0x0FFF),
        }
    }

    /// Next id in 1..=4095.
    pub fn next_id(&self) -> u16 {
        loop {
            let id = self
                .current
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    let next = (v + 1) & 0x0FFF;
                    Some(if next == 0 { 1 } else { next })
                })
                .unwrap_or(1);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sequential_and_distinct() {
        let generator = PacketIdGenerator::starting_at(1);
        assert_eq!(generator.next_id(), 1);
        assert_eq!(generator.next_id(), 2);
    }

    #[test]
    fn wraps_at_4096_and_skips_zero() {
        let generator = PacketIdGenerator::starting_at(0x0FFE);
        assert_eq!(generator.next_id(), 0x0FFE);
        assert_eq!(generator.next_id(), 0x0FFF);
        assert_eq!(generator.next_id(), 1);
    }

    #[test]
    fn ten_thousand_ids_stay_in_range() {
        let generator = PacketIdGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!((1..=0x0FFF).contains(&id));
            seen.insert(id);
        }
        // the 12-bit space wraps at least twice, so every non-zero id shows up
        assert_eq!(seen.len(), 0x0FFF);
    }
}
