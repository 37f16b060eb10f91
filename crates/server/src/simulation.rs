use glam::Vec3;

use voxnet::Transform;

/// Half-extent of the square arena bots stay inside.
pub const ARENA_HALF_EXTENT: f32 = 32.0;

pub fn apply_movement(transform: &mut Transform, move_dir: Vec3, speed: f32, dt: f32) {
    if move_dir.length_squared() < 1e-6 {
        return;
    }

    transform.position += move_dir * speed * dt;
    // Face the direction of travel; yaw is measured in degrees from +Z.
    let flat = Vec3::new(move_dir.x, 0.0, move_dir.z);
    if flat.length_squared() > 1e-6 {
        transform.rotation.y = flat.x.atan2(flat.z).to_degrees().rem_euclid(360.0);
    }
}

/// Server-driven player that walks towards a random point, then picks another.
#[derive(Debug, Clone)]
pub struct Bot {
    target: Vec3,
    rng: u64,
}

impl Bot {
    pub fn new(seed: u64) -> Self {
        let mut bot = Self {
            target: Vec3::ZERO,
            rng: seed.max(1),
        };
        bot.target = bot.random_point();
        bot
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    /// Direction to move this tick.
    pub fn wander(&mut self, position: Vec3) -> Vec3 {
        let mut to_target = self.target - position;
        to_target.y = 0.0;
        if to_target.length() < 0.5 {
            self.target = self.random_point();
            return Vec3::ZERO;
        }
        to_target.normalize_or_zero()
    }

    fn random_point(&mut self) -> Vec3 {
        let x = self.next_unit() * ARENA_HALF_EXTENT;
        let z = self.next_unit() * ARENA_HALF_EXTENT;
        Vec3::new(x, 1.0, z)
    }

    /// Uniform in `[-1, 1)`.
    fn next_unit(&mut self) -> f32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        (x % 20_000) as f32 / 10_000.0 - 1.0
    }
}
