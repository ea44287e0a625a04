use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

use crate::platform::{CountingSemaphore, Platform, SlotId, WAIT_FOREVER};
use crate::registry::{bit, Registry};

/// Set bits of `mask`, lowest first
struct SetBits(u32);

impl Iterator for SetBits {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        if self.0 == 0 {
            return None;
        }
        let slot = self.0.trailing_zeros() as SlotId;
        self.0 &= self.0 - 1;
        Some(slot)
    }
}

/// Body of the interrupt daemon task shared by every filtered interrupt.
///
/// Bits are taken and cleared in one step after waking, so an edge arriving
/// while a batch is processed lands in the next batch. Within a slot the
/// debouncer orders the expiry and the edge by the edge's capture tick.
pub(crate) fn run<P: Platform>(registry: &'static Registry<P>, wake: &P::Semaphore, stop: &AtomicBool) {
    info!(target: "filtered_interrupt", "interrupt daemon task started");

    loop {
        wake.take(WAIT_FOREVER);
        if stop.load(Ordering::Acquire) {
            break;
        }

        let (edges, expiries) = registry.take_pending();
        let now = registry.platform().now();
        for slot in SetBits(edges | expiries) {
            let Some(shared) = registry.resolve(slot) else {
                continue;
            };
            let edge = (edges & bit(slot) != 0).then(|| registry.edge(slot));
            shared.on_batch(expiries & bit(slot) != 0, edge, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_bits_ascending() {
        let slots: Vec<SlotId> = SetBits(0b1000_0000_0000_0000_0000_0000_0010_0101).collect();
        assert_eq!(slots, [0, 2, 5, 31]);
        assert_eq!(SetBits(0).next(), None);
    }
}
