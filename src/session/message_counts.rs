/// Per-session statistics: message counts per type per direction plus
/// session up/down totals.
#[derive(Clone, Copy, Debug, Default)]
pub struct Counters {
    pub open: u64,
    pub update: u64,
    pub keepalive: u64,
    pub notification: u64,
    pub refresh: u64,
    pub operational: u64,
}

impl Counters {
    fn increment(&mut self, kind: u8) {
        match kind {
            1 => self.open += 1,
            2 => self.update += 1,
            3 => self.notification += 1,
            4 => self.keepalive += 1,
            5 => self.refresh += 1,
            6 => self.operational += 1,
            _ => (),
        }
    }

    pub fn total(&self) -> u64 {
        self.open + self.update + self.keepalive + self.notification + self.refresh
            + self.operational
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MessageCounts {
    received: Counters,
    sent: Counters,
    pub sessions_up: u64,
    pub sessions_down: u64,
}

impl MessageCounts {
    pub fn new() -> Self {
        MessageCounts::default()
    }

    pub fn received(&self) -> &Counters {
        &self.received
    }
    pub fn increment_received(&mut self, kind: u8) {
        self.received.increment(kind);
    }

    pub fn sent(&self) -> &Counters {
        &self.sent
    }
    pub fn increment_sent(&mut self, kind: u8) {
        self.sent.increment(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_kind() {
        let mut counts = MessageCounts::new();
        counts.increment_received(2);
        counts.increment_received(2);
        counts.increment_received(4);
        counts.increment_sent(1);
        assert_eq!(counts.received().update, 2);
        assert_eq!(counts.received().keepalive, 1);
        assert_eq!(counts.received().total(), 3);
        assert_eq!(counts.sent().open, 1);
    }
}
