use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Wrap-aware "`a` is newer than `b`" for 32-bit sequence numbers.
#[inline]
pub fn sequence_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Smoothed round-trip estimate, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    smoothed: f32,
    variance: f32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            smoothed: 100.0,
            variance: 50.0,
        }
    }
}

impl RttEstimator {
    const GAIN: f32 = 1.0 / 8.0;
    const VARIANCE_GAIN: f32 = 1.0 / 4.0;

    pub fn sample(&mut self, rtt: Duration) {
        let ms = rtt.as_secs_f32() * 1000.0;
        self.variance += Self::VARIANCE_GAIN * ((ms - self.smoothed).abs() - self.variance);
        self.smoothed += Self::GAIN * (ms - self.smoothed);
    }

    pub fn smoothed_ms(&self) -> f32 {
        self.smoothed
    }

    pub fn variance_ms(&self) -> f32 {
        self.variance
    }
}

#[derive(Debug, Clone)]
pub struct InFlight {
    pub sequence: u32,
    pub last_sent: Instant,
    pub attempts: u32,
    pub datagram: Vec<u8>,
}

/// Reliable datagrams waiting for an ack, oldest first.
#[derive(Debug)]
pub struct ResendQueue {
    in_flight: VecDeque<InFlight>,
    limit: usize,
    rtt: RttEstimator,
}

impl ResendQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            in_flight: VecDeque::new(),
            limit: limit.max(1),
            rtt: RttEstimator::default(),
        }
    }

    /// Queues a sent datagram. `false` when the queue is full; nothing is
    /// queued then, and the link can no longer promise delivery.
    pub fn push(&mut self, sequence: u32, datagram: Vec<u8>, now: Instant) -> bool {
        if self.is_full() {
            return false;
        }
        self.in_flight.push_back(InFlight {
            sequence,
            last_sent: now,
            attempts: 1,
            datagram,
        });
        true
    }

    /// Drops everything covered by `ack` and its history bits. Bit `n`
    /// stands for `ack - n - 1`. Returns how many datagrams were released.
    pub fn acknowledge(&mut self, ack: u32, history: u32, now: Instant) -> usize {
        let covered = |sequence: u32| {
            if sequence == ack {
                return true;
            }
            if !sequence_newer(ack, sequence) {
                return false;
            }
            let age = ack.wrapping_sub(sequence);
            age <= 32 && history & (1 << (age - 1)) != 0
        };

        let before = self.in_flight.len();
        let mut samples = Vec::new();
        self.in_flight.retain(|datagram| {
            if !covered(datagram.sequence) {
                return true;
            }
            // A resent datagram's ack cannot be matched to one send.
            if datagram.attempts == 1 {
                samples.push(now.saturating_duration_since(datagram.last_sent));
            }
            false
        });
        for rtt in samples {
            self.rtt.sample(rtt);
        }
        before - self.in_flight.len()
    }

    /// Datagrams unacknowledged for `interval` since they were last sent.
    pub fn due(&mut self, now: Instant, interval: Duration) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        for datagram in &mut self.in_flight {
            if now.saturating_duration_since(datagram.last_sent) >= interval {
                datagram.last_sent = now;
                datagram.attempts += 1;
                due.push(datagram.datagram.clone());
            }
        }
        due
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.in_flight.len() >= self.limit
    }
}

/// What has been received from one peer: the newest sequence plus a 32-bit
/// history of the ones before it, and a short memory for duplicate checks.
#[derive(Debug, Default)]
pub struct ReceiveWindow {
    latest: Option<u32>,
    history: u32,
    seen: VecDeque<u32>,
}

impl ReceiveWindow {
    const MEMORY: usize = 128;

    pub fn new() -> Self {
        Self::default()
    }

    /// `false` if `sequence` was already accepted.
    pub fn accept(&mut self, sequence: u32) -> bool {
        if self.seen.contains(&sequence) {
            return false;
        }
        if self.seen.len() == Self::MEMORY {
            self.seen.pop_front();
        }
        self.seen.push_back(sequence);

        match self.latest {
            None => self.latest = Some(sequence),
            Some(latest) if sequence_newer(sequence, latest) => {
                let shift = sequence.wrapping_sub(latest);
                self.history = match shift {
                    1..=31 => (self.history << shift) | (1 << (shift - 1)),
                    32 => 1 << 31,
                    _ => 0,
                };
                self.latest = Some(sequence);
            }
            Some(latest) => {
                let age = latest.wrapping_sub(sequence);
                if (1..=32).contains(&age) {
                    self.history |= 1 << (age - 1);
                }
            }
        }
        true
    }

    /// `(ack, history)` to stamp on the next outgoing frame.
    pub fn ack_header(&self) -> (u32, u32) {
        (self.latest.unwrap_or(0), self.history)
    }
}
