//! Current-time hooks (C9): pre/post wall-clock adjustment callbacks that
//! pause and resume the controller around large clock jumps.
//!
//! Grounded on the reference firmware's `current_time.c` (`_pre_cb`/
//! `_post_cb`, `_time_is_in_range`) for the trigger condition, re-expressed
//! as a plain predicate, [`classify_offset`], rather than the firmware's
//! registered callback pair: the pause/resume side effects it used to
//! trigger live on `Controller` (`on_time_pre_hook`/`on_time_post_hook`),
//! which calls this function to decide whether to act.

/// Decision returned by the pre-hook: whether the pending adjustment is
/// large enough to require pausing the controller before it applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreHookDecision {
    PassThrough,
    PauseController,
}

/// `|offset_s| > duration_s / 10` triggers a pause; smaller adjustments
/// pass through without disturbing the running epoch.
pub fn classify_offset(offset_s: i64, duration_s: u64) -> PreHookDecision {
    let threshold = (duration_s / 10) as i64;
    if offset_s.unsigned_abs() as i64 > threshold {
        PreHookDecision::PauseController
    } else {
        PreHookDecision::PassThrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_offset_pauses() {
        // duration_s=600 -> threshold 60; offset +120 exceeds it.
        assert_eq!(classify_offset(120, 600), PreHookDecision::PauseController);
    }

    #[test]
    fn small_offset_passes_through() {
        assert_eq!(classify_offset(5, 600), PreHookDecision::PassThrough);
    }

    #[test]
    fn negative_large_offset_pauses() {
        assert_eq!(classify_offset(-120, 600), PreHookDecision::PauseController);
    }

    #[test]
    fn boundary_offset_passes_through() {
        // exactly duration_s/10 is not strictly greater than the threshold.
        assert_eq!(classify_offset(60, 600), PreHookDecision::PassThrough);
    }
}
