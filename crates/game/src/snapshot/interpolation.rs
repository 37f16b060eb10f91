use std::collections::{BTreeMap, VecDeque};

use glam::Vec3;

use crate::net::PlayerId;

use super::entity::{EntityId, PlayerSnapshot, ProjectileState, Transform};
use super::world::Snapshot;

pub const DEFAULT_INTERPOLATION_DELAY_TICKS: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    /// How far behind the estimated server tick rendering runs.
    pub delay_ticks: f64,
    pub max_snapshots: usize,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            delay_ticks: DEFAULT_INTERPOLATION_DELAY_TICKS,
            max_snapshots: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationState {
    Empty,
    /// One snapshot held; it is rendered as-is.
    Single,
    /// At least two snapshots held; rendering blends a bracketing pair.
    Interpolating,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedWorld {
    pub from_tick: u32,
    pub to_tick: u32,
    pub alpha: f32,
    pub players: BTreeMap<PlayerId, PlayerSnapshot>,
    pub projectiles: BTreeMap<EntityId, ProjectileState>,
}

/// Client-side snapshot history ordered by server tick.
#[derive(Debug)]
pub struct SnapshotInterpolator {
    config: InterpolationConfig,
    snapshots: VecDeque<Snapshot>,
}

impl Default for SnapshotInterpolator {
    fn default() -> Self {
        Self::new(InterpolationConfig::default())
    }
}

impl SnapshotInterpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        let capacity = config.max_snapshots.max(2);
        Self {
            config: InterpolationConfig {
                max_snapshots: capacity,
                ..config
            },
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    pub fn state(&self) -> InterpolationState {
        match self.snapshots.len() {
            0 => InterpolationState::Empty,
            1 => InterpolationState::Single,
            _ => InterpolationState::Interpolating,
        }
    }

    /// Accepts the snapshot only if it is newer than everything held.
    pub fn push(&mut self, snapshot: Snapshot) -> bool {
        if let Some(latest) = self.latest_tick() {
            if snapshot.server_tick <= latest {
                log::trace!(
                    "dropping stale snapshot {} (latest {})",
                    snapshot.server_tick,
                    latest
                );
                return false;
            }
        }

        if self.snapshots.len() >= self.config.max_snapshots {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
        true
    }

    pub fn latest_tick(&self) -> Option<u32> {
        self.snapshots.back().map(|s| s.server_tick)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn ticks(&self) -> Vec<u32> {
        self.snapshots.iter().map(|s| s.server_tick).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn render_tick(&self, server_tick_estimate: f64) -> f64 {
        server_tick_estimate - self.config.delay_ticks
    }

    pub fn sample(&self, target_tick: f64) -> Option<InterpolatedWorld> {
        match self.state() {
            InterpolationState::Empty => None,
            InterpolationState::Single => {
                let only = self.snapshots.front()?;
                Some(InterpolatedWorld {
                    from_tick: only.server_tick,
                    to_tick: only.server_tick,
                    alpha: 0.0,
                    players: only.players.clone(),
                    projectiles: only.projectiles.clone(),
                })
            }
            InterpolationState::Interpolating => {
                let left = self.bracket(target_tick);
                let from = &self.snapshots[left];
                let to = &self.snapshots[left + 1];
                let alpha = interpolation_alpha(
                    from.server_tick as f64,
                    target_tick,
                    to.server_tick as f64,
                );
                Some(blend(from, to, alpha))
            }
        }
    }

    /// Samples at `target_tick`, then discards snapshots that can no longer
    /// bracket any later target.
    pub fn update(&mut self, target_tick: f64) -> Option<InterpolatedWorld> {
        let world = self.sample(target_tick);
        self.prune(target_tick);
        world
    }

    pub fn prune(&mut self, target_tick: f64) {
        if self.snapshots.len() < 2 {
            return;
        }
        let left = self.bracket(target_tick);
        let removable = left.min(self.snapshots.len() - 2);
        self.snapshots.drain(..removable);
    }

    pub fn reset(&mut self) {
        self.snapshots.clear();
    }

    /// Index of the left snapshot of the pair used for `target_tick`.
    /// Requires at least two snapshots.
    fn bracket(&self, target_tick: f64) -> usize {
        let last_pair = self.snapshots.len() - 2;
        self.snapshots
            .iter()
            .zip(self.snapshots.iter().skip(1))
            .position(|(_, right)| target_tick < right.server_tick as f64)
            .unwrap_or(last_pair)
    }
}

/// Blend factor toward `right`, computed in double precision and clamped to
/// `[0, 1]`.
pub fn interpolation_alpha(left: f64, mid: f64, right: f64) -> f32 {
    let span = right - left;
    if span <= 0.0 {
        return 1.0;
    }
    ((mid - left) / span).clamp(0.0, 1.0) as f32
}

/// Weight of the left sample: `1 - (mid - left) / (right - left)`.
pub fn interpolation_weight(left: f64, mid: f64, right: f64) -> f32 {
    let span = right - left;
    if span <= 0.0 {
        return 0.0;
    }
    (1.0 - (mid - left) / span).clamp(0.0, 1.0) as f32
}

/// Shortest-arc blend of two angles in degrees. The result is in `[0, 360)`.
pub fn interpolate_deg(from: f32, to: f32, alpha: f32) -> f32 {
    let (from, to, alpha) = (
        (from as f64).to_radians(),
        (to as f64).to_radians(),
        alpha as f64,
    );
    let x = (1.0 - alpha) * from.cos() + alpha * to.cos();
    let y = (1.0 - alpha) * from.sin() + alpha * to.sin();
    let degrees = y.atan2(x).to_degrees().rem_euclid(360.0) as f32;
    if degrees >= 360.0 { 0.0 } else { degrees }
}

fn interpolate_rotation(from: Vec3, to: Vec3, alpha: f32) -> Vec3 {
    Vec3::new(
        interpolate_deg(from.x, to.x, alpha),
        interpolate_deg(from.y, to.y, alpha),
        interpolate_deg(from.z, to.z, alpha),
    )
}

fn interpolate_player(from: &PlayerSnapshot, to: &PlayerSnapshot, alpha: f32) -> PlayerSnapshot {
    let discrete = if alpha < 0.5 { from } else { to };
    PlayerSnapshot {
        transform: Transform {
            position: from.transform.position.lerp(to.transform.position, alpha),
            rotation: interpolate_rotation(from.transform.rotation, to.transform.rotation, alpha),
            scale: from.transform.scale.lerp(to.transform.scale, alpha),
        },
        weapon_state: discrete.weapon_state,
        weapon_type_id: discrete.weapon_type_id,
    }
}

fn interpolate_projectile(
    from: &ProjectileState,
    to: &ProjectileState,
    alpha: f32,
) -> ProjectileState {
    ProjectileState {
        position: from.position.lerp(to.position, alpha),
        velocity: from.velocity.lerp(to.velocity, alpha),
        owner: to.owner,
    }
}

/// Entities known to only one side are held at that state.
fn blend_maps<K: Ord + Copy, V: Copy>(
    from: &BTreeMap<K, V>,
    to: &BTreeMap<K, V>,
    mut lerp: impl FnMut(&V, &V) -> V,
) -> BTreeMap<K, V> {
    let mut out: BTreeMap<K, V> = to.clone();
    for (id, from_state) in from {
        let blended = match to.get(id) {
            Some(to_state) => lerp(from_state, to_state),
            None => *from_state,
        };
        out.insert(*id, blended);
    }
    out
}

fn blend(from: &Snapshot, to: &Snapshot, alpha: f32) -> InterpolatedWorld {
    InterpolatedWorld {
        from_tick: from.server_tick,
        to_tick: to.server_tick,
        alpha,
        players: blend_maps(&from.players, &to.players, |a, b| {
            interpolate_player(a, b, alpha)
        }),
        projectiles: blend_maps(&from.projectiles, &to.projectiles, |a, b| {
            interpolate_projectile(a, b, alpha)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_player(tick: u32, id: PlayerId, x: f32, yaw: f32) -> Snapshot {
        let mut transform = Transform::from_position(Vec3::new(x, 0.0, 0.0));
        transform.rotation.y = yaw;
        Snapshot::new(tick).with_player(id, PlayerSnapshot::new(transform))
    }

    fn angle_distance(a: f32, b: f32) -> f32 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn stale_snapshots_are_dropped() {
        let mut interp = SnapshotInterpolator::default();
        assert!(interp.push(Snapshot::new(5)));
        assert!(!interp.push(Snapshot::new(3)));
        assert!(interp.push(Snapshot::new(7)));
        assert!(!interp.push(Snapshot::new(7)));

        assert_eq!(interp.ticks(), vec![5, 7]);
    }

    #[test]
    fn state_transitions() {
        let mut interp = SnapshotInterpolator::default();
        assert_eq!(interp.state(), InterpolationState::Empty);
        assert!(interp.sample(0.0).is_none());

        interp.push(snapshot_with_player(10, 1, 4.0, 0.0));
        assert_eq!(interp.state(), InterpolationState::Single);
        let single = interp.sample(123.0).unwrap();
        assert_eq!(single.alpha, 0.0);
        assert_eq!(single.players[&1].transform.position.x, 4.0);

        interp.push(snapshot_with_player(20, 1, 8.0, 0.0));
        assert_eq!(interp.state(), InterpolationState::Interpolating);
    }

    #[test]
    fn alpha_is_clamped_to_the_bracket() {
        let mut interp = SnapshotInterpolator::default();
        interp.push(snapshot_with_player(10, 1, 0.0, 0.0));
        interp.push(snapshot_with_player(20, 1, 10.0, 0.0));

        let mid = interp.sample(15.0).unwrap();
        assert_eq!(mid.alpha, 0.5);
        assert!((mid.players[&1].transform.position.x - 5.0).abs() < 1e-5);

        for early in [10.0, 3.0] {
            let world = interp.sample(early).unwrap();
            assert_eq!(world.alpha, 0.0);
            assert_eq!(world.players[&1].transform.position.x, 0.0);
        }

        for late in [20.0, 31.0] {
            let world = interp.sample(late).unwrap();
            assert_eq!(world.alpha, 1.0);
            assert_eq!(world.players[&1].transform.position.x, 10.0);
        }
    }

    #[test]
    fn picks_the_bracketing_pair() {
        let mut interp = SnapshotInterpolator::default();
        for (tick, x) in [(10, 0.0), (12, 2.0), (14, 4.0), (16, 6.0)] {
            interp.push(snapshot_with_player(tick, 1, x, 0.0));
        }

        let world = interp.sample(13.5).unwrap();
        assert_eq!((world.from_tick, world.to_tick), (12, 14));
        assert_eq!(world.alpha, 0.75);
        assert!((world.players[&1].transform.position.x - 3.5).abs() < 1e-5);
    }

    #[test]
    fn one_sided_entities_are_held() {
        let mut interp = SnapshotInterpolator::default();
        interp.push(
            snapshot_with_player(10, 1, 0.0, 0.0)
                .with_player(2, PlayerSnapshot::new(Transform::from_position(Vec3::Y))),
        );
        interp.push(
            snapshot_with_player(20, 1, 10.0, 0.0)
                .with_player(3, PlayerSnapshot::new(Transform::from_position(Vec3::Z))),
        );

        let world = interp.sample(15.0).unwrap();
        assert_eq!(world.players.len(), 3);
        assert_eq!(world.players[&2].transform.position, Vec3::Y);
        assert_eq!(world.players[&3].transform.position, Vec3::Z);
    }

    #[test]
    fn yaw_wraps_the_short_way() {
        let result = interpolate_deg(350.0, 10.0, 0.5);
        assert!(angle_distance(result, 0.0) < 1e-3, "got {result}");
        assert!(angle_distance(result, 180.0) > 170.0);

        let quarter = interpolate_deg(350.0, 10.0, 0.25);
        assert!(angle_distance(quarter, 355.0) < 0.1, "got {quarter}");

        let plain = interpolate_deg(90.0, 180.0, 0.5);
        assert!((plain - 135.0).abs() < 1e-3);
    }

    #[test]
    fn player_rotation_uses_shortest_arc() {
        let mut interp = SnapshotInterpolator::default();
        interp.push(snapshot_with_player(10, 1, 0.0, 350.0));
        interp.push(snapshot_with_player(20, 1, 0.0, 10.0));

        let yaw = interp.sample(15.0).unwrap().players[&1].transform.rotation.y;
        assert!(angle_distance(yaw, 0.0) < 1e-3, "got {yaw}");
    }

    #[test]
    fn weight_keeps_precision_for_small_deltas() {
        let left = 4_000_000_000.0;
        let right = left + 1.0;
        let mid = left + 0.25;

        assert_eq!(interpolation_alpha(left, mid, right), 0.25);
        assert_eq!(interpolation_weight(left, mid, right), 0.75);
        assert_eq!(interpolation_alpha(5.0, 5.0, 5.0), 1.0);
    }

    #[test]
    fn render_tick_applies_delay() {
        let interp = SnapshotInterpolator::new(InterpolationConfig {
            delay_ticks: 3.0,
            ..Default::default()
        });
        assert_eq!(interp.render_tick(100.0), 97.0);
    }

    #[test]
    fn update_prunes_superseded_snapshots() {
        let mut interp = SnapshotInterpolator::default();
        for tick in [10, 12, 14, 16] {
            interp.push(Snapshot::new(tick));
        }

        interp.update(15.0);
        assert_eq!(interp.ticks(), vec![14, 16]);

        interp.update(40.0);
        assert_eq!(interp.ticks(), vec![14, 16]);
    }

    #[test]
    fn history_is_capped() {
        let mut interp = SnapshotInterpolator::new(InterpolationConfig {
            max_snapshots: 3,
            ..Default::default()
        });
        for tick in 1..=5 {
            interp.push(Snapshot::new(tick));
        }
        assert_eq!(interp.ticks(), vec![3, 4, 5]);
    }
}
