use glam::Vec3;

use crate::buffer::{Buffer, Wire};
use crate::net::{PlayerId, ProtocolError};

pub type EntityId = u32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in degrees: pitch, yaw, roll.
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub const SIZE: usize = Vec3::SIZE * 3;

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn write_to(&self, buf: &mut Buffer) {
        buf.write(&self.position);
        buf.write(&self.rotation);
        buf.write(&self.scale);
    }

    pub fn read_from(buf: &mut Buffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            position: buf.read()?,
            rotation: buf.read()?,
            scale: buf.read()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum WeaponState {
    #[default]
    Idle = 0,
    Firing = 1,
    Reloading = 2,
    Switching = 3,
}

impl TryFrom<u8> for WeaponState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Firing),
            2 => Ok(Self::Reloading),
            3 => Ok(Self::Switching),
            other => Err(ProtocolError::UnknownWeaponState(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerSnapshot {
    pub transform: Transform,
    pub weapon_state: WeaponState,
    pub weapon_type_id: u8,
}

impl PlayerSnapshot {
    pub const SIZE: usize = Transform::SIZE + 2;

    pub fn new(transform: Transform) -> Self {
        Self {
            transform,
            ..Default::default()
        }
    }

    pub fn write_to(&self, buf: &mut Buffer) {
        self.transform.write_to(buf);
        buf.write(&(self.weapon_state as u8));
        buf.write(&self.weapon_type_id);
    }

    pub fn read_from(buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let transform = Transform::read_from(buf)?;
        let weapon_state = WeaponState::try_from(buf.read::<u8>()?)?;
        let weapon_type_id = buf.read()?;
        Ok(Self {
            transform,
            weapon_state,
            weapon_type_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProjectileState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub owner: PlayerId,
}

impl ProjectileState {
    pub const SIZE: usize = Vec3::SIZE * 2 + 1;

    pub fn write_to(&self, buf: &mut Buffer) {
        buf.write(&self.position);
        buf.write(&self.velocity);
        buf.write(&self.owner);
    }

    pub fn read_from(buf: &mut Buffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            position: buf.read()?,
            velocity: buf.read()?,
            owner: buf.read()?,
        })
    }
}
