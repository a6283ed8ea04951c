//! Per-stream sequence tracking for loss concealment

/// How an arriving sequence number relates to the last accepted one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    /// First packet of the stream, nothing to compare against
    First,
    /// Exactly one greater than the previous packet
    InOrder,
    /// Packets are missing; `missing` is the unclamped count
    Gap { missing: u16 },
    /// Duplicate or older than the previous packet
    Late,
}

/// Last accepted sequence number of one stream direction
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: Option<u16>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// A tracker that has already accepted `seq`
    pub fn starting_at(seq: u16) -> Self {
        Self { last: Some(seq) }
    }

    /// Classify `seq` and advance the tracker to it
    pub fn advance(&mut self, seq: u16) -> SequenceStatus {
        let status = self.classify(seq);
        self.last = Some(seq);
        status
    }

    /// Classify `seq` without touching the tracker
    pub fn classify(&self, seq: u16) -> SequenceStatus {
        let Some(last) = self.last else {
            return SequenceStatus::First;
        };

        let expected = last.wrapping_add(1);
        let distance = seq.wrapping_sub(expected);
        match distance {
            0 => SequenceStatus::InOrder,
            // Forward distances up to half the sequence space are losses
            d if d < 0x8000 => SequenceStatus::Gap { missing: d },
            _ => SequenceStatus::Late,
        }
    }

    pub fn last(&self) -> Option<u16> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl SequenceStatus {
    /// Number of silent frames to synthesize, bounded by `max`
    pub fn frames_to_conceal(self, max: usize) -> usize {
        match self {
            SequenceStatus::Gap { missing } => (missing as usize).min(max),
            _ => 0,
        }
    }
}
