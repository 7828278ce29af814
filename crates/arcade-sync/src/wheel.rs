//! Spin math for the wheel game.

use rand::Rng;

/// Extra whole turns added to every spin so it reads as a spin.
pub const EXTRA_TURNS: f64 = 5.0;

const FULL_TURN: f64 = 360.0;

/// Where a spin ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spin {
    /// Absolute wheel rotation in degrees after the spin.
    pub rotation: f64,
    /// Index of the sector under the pointer, in active-sector order.
    pub index: usize,
}

/// Pick a sector uniformly and a landing angle uniformly inside it.
///
/// Returns `None` with no sectors to land on.
pub fn spin<R: Rng + ?Sized>(sectors: usize, current_rotation: f64, rng: &mut R) -> Option<Spin> {
    if sectors == 0 {
        return None;
    }
    let per_sector = FULL_TURN / sectors as f64;
    let index = rng.random_range(0..sectors);
    let target = index as f64 * per_sector + rng.random_range(0.0..per_sector);
    Some(Spin {
        rotation: rotation_for(target, current_rotation),
        index,
    })
}

/// Rotation that brings `target` degrees under the pointer from `current`.
fn rotation_for(target: f64, current: f64) -> f64 {
    let current = current % FULL_TURN;
    let mut delta = (-target - current) % FULL_TURN;
    if delta < 0.0 {
        delta += FULL_TURN;
    }
    current + FULL_TURN * EXTRA_TURNS + delta
}

/// Sector index under the pointer for an absolute `rotation`.
pub fn landed_index(sectors: usize, rotation: f64) -> Option<usize> {
    if sectors == 0 {
        return None;
    }
    let per_sector = FULL_TURN / sectors as f64;
    let under_pointer = (-rotation).rem_euclid(FULL_TURN);
    Some(((under_pointer / per_sector) as usize).min(sectors - 1))
}
