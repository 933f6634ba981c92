use crate::common::FrameId;

#[derive(Debug, Clone, Copy, Default)]
struct ClockSlot {
    /// Unpinned and holding a page
    evictable: bool,
    /// Touched since the hand last passed
    referenced: bool,
}

/// Clock (second-chance) replacement policy.
///
/// A hand rotates over the frame slots. A sweep skips slots that are not
/// evictable, clears the reference bit of referenced slots, and stops at the
/// first evictable slot whose bit is already clear. Two full turns without a
/// victim mean every frame is pinned.
///
/// Not internally synchronized: the buffer pool only calls it under its state lock.
#[derive(Debug)]
pub struct ClockReplacer {
    slots: Vec<ClockSlot>,
    hand: usize,
    num_evictable: usize,
}

impl ClockReplacer {
    /// Creates a replacer tracking `num_frames` slots, none of them evictable.
    pub fn new(num_frames: usize) -> Self {
        Self {
            slots: vec![ClockSlot::default(); num_frames],
            hand: 0,
            num_evictable: 0,
        }
    }

    /// Sets the reference bit of a frame that was just pinned.
    pub fn record_access(&mut self, frame_id: FrameId) {
        if let Some(slot) = self.slots.get_mut(frame_id.as_usize()) {
            slot.referenced = true;
        }
    }

    /// Marks a frame as a candidate (pin count 0) or not (pinned).
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(slot) = self.slots.get_mut(frame_id.as_usize()) {
            if slot.evictable != evictable {
                slot.evictable = evictable;
                if evictable {
                    self.num_evictable += 1;
                } else {
                    self.num_evictable -= 1;
                }
            }
        }
    }

    /// Selects a victim and stops tracking it.
    /// Returns None if no frame qualifies within two turns of the hand.
    pub fn evict(&mut self) -> Option<FrameId> {
        let n = self.slots.len();

        for step in 0..2 * n {
            let idx = (self.hand + step) % n;
            let slot = &mut self.slots[idx];

            if !slot.evictable {
                continue;
            }
            if slot.referenced {
                slot.referenced = false;
                continue;
            }

            *slot = ClockSlot::default();
            self.num_evictable -= 1;
            self.hand = (idx + 1) % n;
            return Some(FrameId::new(idx as u32));
        }

        None
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.num_evictable
    }

    /// Returns the current hand position.
    pub fn hand(&self) -> usize {
        self.hand
    }
}
