/// Per-session activity counter and closing flag.
///
/// Both directions of a session touch the same `Activity`, so one idle sweep
/// sees whether the session did anything in either direction since the
/// previous sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    counter: u32,
    closing: bool,
}

impl Activity {
    /// A fresh session counts as active once, so a sweep that runs right
    /// after accept does not reap it before it had a chance to move bytes.
    pub fn new() -> Self {
        Self {
            counter: 1,
            closing: false,
        }
    }

    /// Record one successful read. Zero is reserved for "nothing happened
    /// since the last sweep", so wraparound skips it.
    pub fn touch(&mut self) {
        self.counter = self.counter.wrapping_add(1);
        if self.counter == 0 {
            self.counter = 1;
        }
    }

    /// Read and reset the counter. A return value of zero means the session
    /// was idle for the whole interval.
    pub fn take(&mut self) -> u32 {
        std::mem::take(&mut self.counter)
    }

    pub fn mark_closing(&mut self) {
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_survives_first_sweep() {
        let mut activity = Activity::new();
        assert_ne!(activity.take(), 0);
        assert_eq!(activity.take(), 0);
    }

    #[test]
    fn touch_after_reset_reports_activity() {
        let mut activity = Activity::new();
        activity.take();
        activity.touch();
        activity.touch();
        assert_eq!(activity.take(), 2);
    }

    #[test]
    fn wraparound_never_lands_on_zero() {
        let mut activity = Activity {
            counter: u32::MAX,
            closing: false,
        };
        activity.touch();
        assert_eq!(activity.take(), 1);
    }

    #[test]
    fn closing_is_sticky() {
        let mut activity = Activity::new();
        assert!(!activity.is_closing());
        activity.mark_closing();
        activity.take();
        activity.touch();
        assert!(activity.is_closing());
    }
}
