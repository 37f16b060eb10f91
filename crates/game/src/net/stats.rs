use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

/// Drops a share of outgoing datagrams. Lets reliability be exercised on a
/// clean loopback link.
#[derive(Debug, Clone)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    rng: XorShift,
}

impl Default for PacketLossSimulation {
    fn default() -> Self {
        Self {
            enabled: false,
            loss_percent: 0.0,
            rng: XorShift::seeded(),
        }
    }
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        Self {
            enabled: loss_percent > 0.0,
            loss_percent: loss_percent.clamp(0.0, 100.0),
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = XorShift::new(seed);
        self
    }

    pub fn should_drop(&mut self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        self.rng.next_percent() < self.loss_percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_resent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

#[derive(Debug, Clone)]
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn seeded() -> Self {
        Self::new(RandomState::new().hash_one(0x5EED_u64))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in `[0, 100)`.
    fn next_percent(&mut self) -> f32 {
        (self.next_u64() % 10_000) as f32 / 100.0
    }
}
