//! Local typing debounce. One `typing` when input starts, one
//! `typing_stopped` once input has been quiet for the configured period. Each
//! keystroke pushes the single pending deadline out; it never stacks.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Started,
    Stopped,
}

#[derive(Debug)]
pub struct TypingDebounce {
    quiet: Duration,
    stop_at: Option<Instant>,
}

impl TypingDebounce {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            stop_at: None,
        }
    }

    /// Records input activity. A deadline that already elapsed without being
    /// polled closes the old session before the new one opens.
    pub fn on_input(&mut self, now: Instant) -> Vec<TypingSignal> {
        let mut signals = Vec::new();
        if let Some(TypingSignal::Stopped) = self.poll(now) {
            signals.push(TypingSignal::Stopped);
        }
        if self.stop_at.is_none() {
            signals.push(TypingSignal::Started);
        }
        self.stop_at = Some(now + self.quiet);
        signals
    }

    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.stop_at {
            Some(deadline) if deadline <= now => {
                self.stop_at = None;
                Some(TypingSignal::Stopped)
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.stop_at
    }

    pub fn is_active(&self) -> bool {
        self.stop_at.is_some()
    }

    /// Drops the pending stop without emitting it.
    pub fn reset(&mut self) {
        self.stop_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_of_input_produce_one_start_and_one_stop() {
        let mut debounce = TypingDebounce::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);

        assert_eq!(debounce.on_input(at(0)), vec![TypingSignal::Started]);
        assert!(debounce.on_input(at(400)).is_empty());
        assert!(debounce.on_input(at(900)).is_empty());

        assert_eq!(debounce.deadline(), Some(at(1900)));
        assert_eq!(debounce.poll(at(1000)), None);
        assert_eq!(debounce.poll(at(1899)), None);
        assert_eq!(debounce.poll(at(1900)), Some(TypingSignal::Stopped));
        assert_eq!(debounce.poll(at(5000)), None);
        assert!(!debounce.is_active());
    }

    #[test]
    fn input_after_an_unpolled_deadline_restarts_the_session() {
        let mut debounce = TypingDebounce::new(Duration::from_millis(1000));
        let t0 = Instant::now();

        debounce.on_input(t0);
        let signals = debounce.on_input(t0 + Duration::from_millis(2500));
        assert_eq!(signals, vec![TypingSignal::Stopped, TypingSignal::Started]);
    }

    #[test]
    fn reset_discards_the_pending_stop() {
        let mut debounce = TypingDebounce::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        debounce.on_input(t0);
        debounce.reset();
        assert_eq!(debounce.poll(t0 + Duration::from_secs(5)), None);
    }
}
