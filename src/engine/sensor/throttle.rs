use std::time::{Duration, Instant};

/// Sampling window applied to every physical sensor.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Opens at most once per window. The sensor engine uses it to limit how
/// often a Reading change is announced, not which value is kept.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    pub fn accept(&mut self, at: Instant) -> bool {
        let open = match self.last_accepted {
            Some(last) => at.saturating_duration_since(last) >= self.window,
            None => true,
        };
        if open {
            self.last_accepted = Some(at);
        }
        open
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(SAMPLE_INTERVAL)
    }
}
