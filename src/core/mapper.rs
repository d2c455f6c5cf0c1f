//! Virtual position mapping for the looping feed.
//!
//! The feed pretends to have `VIRTUAL_EXTENT` entries. Every virtual
//! position maps onto the finite backing collection with `v mod dataSize`;
//! the helpers here pick start positions with equal headroom in both
//! directions and decide when the list must be silently moved away from the
//! numeric edges of that range.
//!
//! All functions are total: `data_size <= 0` never divides and yields the
//! documented neutral value instead.
//!
//! ```text
//!   0 ............ cycle k-1 | cycle k | cycle k+1 ............ VIRTUAL_EXTENT
//!                            ^ start_virtual_position() lands near the middle
//! ```

/// Scroll offset in the virtual feed.
pub type VirtualPosition = i64;

/// Number of virtual positions exposed to list widgets (32-bit index space).
pub const VIRTUAL_EXTENT: i64 = i32::MAX as i64;

/// Returned by `map_to_real_index` for an empty collection.
pub const NO_INDEX: i64 = -1;

/// Default divisor for the smooth-loop threshold (`data_size / 2`).
pub const DEFAULT_LOOP_THRESHOLD_DIVISOR: i64 = 2;

/// Real index for a virtual position, or `NO_INDEX` when empty.
pub fn map_to_real_index(virtual_position: VirtualPosition, data_size: i64) -> i64 {
    if data_size <= 0 {
        return NO_INDEX;
    }
    virtual_position.rem_euclid(data_size)
}

/// Item count to report to the list widget.
pub fn infinite_count(data_size: i64) -> i64 {
    if data_size <= 0 { 0 } else { VIRTUAL_EXTENT }
}

/// Cycle (lap through the collection) a virtual position belongs to.
pub fn cycle_of(virtual_position: VirtualPosition, data_size: i64) -> i64 {
    if data_size <= 0 {
        return 0;
    }
    virtual_position.div_euclid(data_size)
}

/// Start position near the middle of the virtual range.
///
/// Aligned so that `result mod data_size == preferred_real_index` when the
/// preferred index is in range, `0` otherwise.
pub fn start_virtual_position(data_size: i64, preferred_real_index: i64) -> VirtualPosition {
    if data_size <= 0 {
        return 0;
    }
    let base = VIRTUAL_EXTENT / 2;
    let aligned = base - base % data_size;
    if (0..data_size).contains(&preferred_real_index) {
        let candidate = aligned + preferred_real_index;
        if candidate < VIRTUAL_EXTENT {
            return candidate;
        }
    }
    aligned
}

/// Same cycle as `current`, different real index.
///
/// Used for direct jumps ("show item X") without losing headroom.
/// Out-of-range indices leave `current` unchanged.
pub fn convert_to_virtual_position(
    real_index: i64,
    current: VirtualPosition,
    data_size: i64,
) -> VirtualPosition {
    if data_size <= 0 || !(0..data_size).contains(&real_index) {
        return current;
    }
    cycle_of(current, data_size) * data_size + real_index
}

/// Smooth-loop target with the default `data_size / 2` threshold.
pub fn smooth_loop_target(current: VirtualPosition, data_size: i64, direction: i64) -> VirtualPosition {
    LoopPolicy::default().smooth_loop_target(current, data_size, direction)
}

/// True when `virtual_position` is within one cycle of either edge of the range.
///
/// Cheap early warning: the caller schedules a silent re-centering.
pub fn needs_loop_reset(virtual_position: VirtualPosition, data_size: i64) -> bool {
    if data_size <= 0 {
        return false;
    }
    let cycle = cycle_of(virtual_position, data_size);
    let total_cycles = VIRTUAL_EXTENT / data_size;
    cycle <= 1 || cycle >= total_cycles - 1
}

/// Position near the middle of the range showing the same real item.
pub fn recenter_target(virtual_position: VirtualPosition, data_size: i64) -> VirtualPosition {
    if data_size <= 0 {
        return 0;
    }
    start_virtual_position(data_size, map_to_real_index(virtual_position, data_size))
}

/// Tunable part of the loop logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    /// threshold = data_size / divisor (clamped to >= 1)
    pub threshold_divisor: i64,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self { threshold_divisor: DEFAULT_LOOP_THRESHOLD_DIVISOR }
    }
}

impl LoopPolicy {
    pub fn new(threshold_divisor: i64) -> Self {
        Self { threshold_divisor: threshold_divisor.max(1) }
    }

    pub fn threshold(&self, data_size: i64) -> i64 {
        if data_size <= 0 {
            return 0;
        }
        data_size / self.threshold_divisor.max(1)
    }

    /// Target position for seamless looping while scrolling.
    ///
    /// Forward (`direction > 0`): when the real index is strictly past
    /// `data_size - threshold`, jump to the start of the next cycle.
    /// Backward (`direction < 0`): when the real index is strictly below
    /// `threshold`, jump to the last index of the previous cycle.
    /// Exactly at the threshold nothing happens, so the position can't
    /// oscillate. Targets outside `[0, VIRTUAL_EXTENT)` are never returned.
    pub fn smooth_loop_target(&self, current: VirtualPosition, data_size: i64, direction: i64) -> VirtualPosition {
        if data_size <= 0 {
            return current;
        }
        let threshold = self.threshold(data_size);
        let real = map_to_real_index(current, data_size);
        let cycle = cycle_of(current, data_size);

        let target = if direction > 0 && real > data_size - threshold {
            (cycle + 1) * data_size
        } else if direction < 0 && real < threshold {
            cycle * data_size - 1
        } else {
            return current;
        };

        if (0..VIRTUAL_EXTENT).contains(&target) {
            target
        } else {
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_to_real_index() {
        let size = 5;
        assert_eq!(map_to_real_index(0, size), 0);
        assert_eq!(map_to_real_index(1, size), 1);
        assert_eq!(map_to_real_index(4, size), 4);
        assert_eq!(map_to_real_index(5, size), 0);
        assert_eq!(map_to_real_index(7, size), 2);
        assert_eq!(map_to_real_index(10, 0), NO_INDEX);
        assert_eq!(map_to_real_index(10, -3), NO_INDEX);
    }

    #[test]
    fn test_map_always_in_range() {
        for size in 1..=13 {
            for v in [-1_000_003, -7, -1, 0, 1, 12, 999, VIRTUAL_EXTENT - 1, VIRTUAL_EXTENT] {
                let real = map_to_real_index(v, size);
                assert!((0..size).contains(&real), "v={} size={} real={}", v, size, real);
            }
        }
    }

    #[test]
    fn test_infinite_count() {
        assert_eq!(infinite_count(0), 0);
        assert_eq!(infinite_count(-1), 0);
        assert_eq!(infinite_count(1), VIRTUAL_EXTENT);
        assert_eq!(infinite_count(100), VIRTUAL_EXTENT);
    }

    #[test]
    fn test_start_virtual_position_aligned_near_middle() {
        let middle = VIRTUAL_EXTENT / 2;
        for size in [1, 2, 3, 5, 10, 77, 1000] {
            let start = start_virtual_position(size, 0);
            assert_eq!(start % size, 0);
            assert!((start - middle).abs() < size);
        }
        assert_eq!(start_virtual_position(10, 0), 1_073_741_820);
        assert_eq!(start_virtual_position(0, 3), 0);
    }

    #[test]
    fn test_start_virtual_position_with_preferred_index() {
        assert_eq!(start_virtual_position(10, 3) % 10, 3);
        assert_eq!(start_virtual_position(10, 7) % 10, 7);
        // out of range falls back to the aligned position
        assert_eq!(start_virtual_position(10, 12) % 10, 0);
        assert_eq!(start_virtual_position(10, -1) % 10, 0);
    }

    #[test]
    fn test_convert_to_virtual_position() {
        let size = 10;
        let current = 1_073_741_820;
        let cycle = current / size;
        assert_eq!(convert_to_virtual_position(5, current, size), cycle * size + 5);
        // keeps the cycle even when current isn't cycle-aligned
        assert_eq!(convert_to_virtual_position(2, current + 8, size), cycle * size + 2);
        // out of range: no-op
        assert_eq!(convert_to_virtual_position(10, current, size), current);
        assert_eq!(convert_to_virtual_position(-1, current, size), current);
        assert_eq!(convert_to_virtual_position(0, current, 0), current);
    }

    #[test]
    fn test_smooth_loop_target_forward() {
        let size = 10;
        // real 5 is exactly at the threshold: no jump
        assert_eq!(smooth_loop_target(105, size, 1), 105);
        // real 8 > 5: next cycle start
        assert_eq!(smooth_loop_target(108, size, 1), 110);
        // wrong direction: unchanged
        assert_eq!(smooth_loop_target(108, size, -1), 108);
    }

    #[test]
    fn test_smooth_loop_target_backward() {
        let size = 10;
        assert_eq!(smooth_loop_target(105, size, -1), 105);
        // real 3 < 5: last index of the previous cycle
        assert_eq!(smooth_loop_target(103, size, -1), 99);
        assert_eq!(smooth_loop_target(103, size, 0), 103);
    }

    #[test]
    fn test_smooth_loop_target_idempotent() {
        for size in 1..=12 {
            for v in 20..(20 + 3 * size) {
                for dir in [-1, 1] {
                    let once = smooth_loop_target(v, size, dir);
                    let twice = smooth_loop_target(once, size, dir);
                    assert_eq!(once, twice, "v={} size={} dir={}", v, size, dir);
                    // never more than one cycle away
                    assert!((once - v).abs() <= size);
                }
            }
        }
    }

    #[test]
    fn test_smooth_loop_target_stays_in_range() {
        let size = 10;
        // first cycle, backward: previous cycle doesn't exist
        assert_eq!(smooth_loop_target(2, size, -1), 2);
        // last full cycle, forward: next cycle start would be out of range
        let last_cycle_start = (VIRTUAL_EXTENT / size - 1) * size;
        let target = smooth_loop_target(last_cycle_start + 9, size, 1);
        assert!(target < VIRTUAL_EXTENT);
        assert_eq!(smooth_loop_target(5, 0, 1), 5);
    }

    #[test]
    fn test_loop_policy_threshold() {
        let policy = LoopPolicy::new(4);
        assert_eq!(policy.threshold(10), 2);
        // real 8 > 10 - 2: jump
        assert_eq!(policy.smooth_loop_target(108, 10, 1), 110);
        // real 7 is not > 8
        assert_eq!(policy.smooth_loop_target(107, 10, 1), 107);
        assert_eq!(LoopPolicy::new(0).threshold_divisor, 1);
    }

    #[test]
    fn test_needs_loop_reset() {
        let size = 10;
        assert!(needs_loop_reset(0, size));
        assert!(needs_loop_reset(15, size));
        assert!(!needs_loop_reset(start_virtual_position(size, 0), size));
        assert!(needs_loop_reset(VIRTUAL_EXTENT - 1, size));
        assert!(!needs_loop_reset(0, 0));
    }

    #[test]
    fn test_recenter_target_keeps_item() {
        let size = 7;
        let near_edge = 12;
        let target = recenter_target(near_edge, size);
        assert_eq!(map_to_real_index(target, size), map_to_real_index(near_edge, size));
        assert!(!needs_loop_reset(target, size));
        assert_eq!(recenter_target(12, 0), 0);
    }

    #[test]
    fn test_scenario_pool_slot_and_real_index() {
        // dataSize=5, poolSize=2, virtualPosition=7
        assert_eq!(map_to_real_index(7, 5), 2);
        assert_eq!(7_i64.rem_euclid(2), 1);
    }
}
