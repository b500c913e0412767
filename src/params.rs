//! Tunable simulation constants.
//!
//! Every parameter is declared once in [`DECLARATIONS`] with its default, the range a control
//! panel should offer and whether changing it can be patched into the live uniform buffer or
//! needs the grid and pipelines rebuilt. The store itself never clamps.

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};

use crate::error::{DimensionError, SimError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamId {
    Width,
    Height,
    WorkgroupSize,
    Timestep,
    K1,
    K2,
    K3,
    K31,
    K32,
    K33,
    StatusMax,
    StatusBorder,
    AngleDiv,
    Dist1,
    Dist2,
}

impl ParamId {
    pub const ALL: [ParamId; 15] = [
        ParamId::Width,
        ParamId::Height,
        ParamId::WorkgroupSize,
        ParamId::Timestep,
        ParamId::K1,
        ParamId::K2,
        ParamId::K3,
        ParamId::K31,
        ParamId::K32,
        ParamId::K33,
        ParamId::StatusMax,
        ParamId::StatusBorder,
        ParamId::AngleDiv,
        ParamId::Dist1,
        ParamId::Dist2,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ParamId::Width => "width",
            ParamId::Height => "height",
            ParamId::WorkgroupSize => "workgroup_size",
            ParamId::Timestep => "timestep",
            ParamId::K1 => "k1",
            ParamId::K2 => "k2",
            ParamId::K3 => "k3",
            ParamId::K31 => "k31",
            ParamId::K32 => "k32",
            ParamId::K33 => "k33",
            ParamId::StatusMax => "status_max",
            ParamId::StatusBorder => "status_border",
            ParamId::AngleDiv => "angle_div",
            ParamId::Dist1 => "dist_1",
            ParamId::Dist2 => "dist_2",
        }
    }

    pub fn from_name(name: &str) -> Option<ParamId> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// How a change to a parameter reaches the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamClass {
    /// Written straight into the live uniform buffer (or host-side frame state).
    HotPatch,
    /// Invalidates buffer sizes or pipelines; the grid is reallocated.
    Structural,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
    pub step: Option<f32>,
}

impl ParamRange {
    const fn continuous(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            step: None,
        }
    }

    const fn stepped(min: f32, max: f32, step: f32) -> Self {
        Self {
            min,
            max,
            step: Some(step),
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ParamDecl {
    pub id: ParamId,
    pub default: f32,
    pub range: ParamRange,
    pub class: ParamClass,
    /// f32 slot inside [`UniformParams`], if the value lives on the device.
    pub uniform_slot: Option<usize>,
}

const fn decl(
    id: ParamId,
    default: f32,
    range: ParamRange,
    class: ParamClass,
    uniform_slot: Option<usize>,
) -> ParamDecl {
    ParamDecl {
        id,
        default,
        range,
        class,
        uniform_slot,
    }
}

/// Declaration table, indexed by [`ParamId`] discriminant.
pub const DECLARATIONS: [ParamDecl; 15] = {
    use ParamClass::{HotPatch, Structural};
    use ParamRange as R;
    [
        decl(ParamId::Width, 128.0, R::stepped(3.0, 256.0, 1.0), Structural, None),
        decl(ParamId::Height, 128.0, R::stepped(3.0, 256.0, 1.0), Structural, None),
        decl(ParamId::WorkgroupSize, 8.0, R::stepped(4.0, 16.0, 4.0), Structural, None),
        decl(ParamId::Timestep, 1.0, R::stepped(1.0, 60.0, 1.0), HotPatch, None),
        decl(ParamId::K1, 0.395, R::continuous(0.01, 1.0), HotPatch, Some(0)),
        decl(ParamId::K2, 0.967, R::continuous(0.01, 1.0), HotPatch, Some(1)),
        decl(ParamId::K3, 0.0391, R::continuous(0.001, 0.25), HotPatch, Some(2)),
        decl(ParamId::K31, 0.9995, R::continuous(0.1, 1.2), HotPatch, Some(3)),
        decl(ParamId::K32, 0.95, R::continuous(0.1, 1.2), HotPatch, Some(4)),
        decl(ParamId::K33, 0.9, R::continuous(0.1, 1.25), HotPatch, Some(5)),
        decl(ParamId::StatusMax, 15.0, R::continuous(3.0, 25.0), HotPatch, Some(6)),
        decl(ParamId::StatusBorder, 7.0, R::continuous(1.0, 15.0), HotPatch, Some(7)),
        decl(ParamId::AngleDiv, 7.0, R::continuous(1.0, 15.0), HotPatch, Some(8)),
        // The neighbourhood radii reseed the grid when changed.
        decl(ParamId::Dist1, 3.0, R::continuous(1.0, 7.0), Structural, Some(9)),
        decl(ParamId::Dist2, 2.0, R::continuous(1.0, 7.0), Structural, Some(10)),
    ]
};

/// Uniform block read by the compute shader.
///
/// Field order is the wire order; `_pad` rounds the block up to 48 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformParams {
    pub k1: f32,
    pub k2: f32,
    pub k3: f32,
    pub k31: f32,
    pub k32: f32,
    pub k33: f32,
    pub status_max: f32,
    pub status_border: f32,
    pub angle_div: f32,
    pub dist_1: f32,
    pub dist_2: f32,
    _pad: f32,
}

pub const UNIFORM_FIELDS: usize = 11;
const UNIFORM_WORDS: usize = size_of::<UniformParams>() / size_of::<f32>();

const fn uniform_offset(id: ParamId) -> Option<usize> {
    match id {
        ParamId::K1 => Some(offset_of!(UniformParams, k1)),
        ParamId::K2 => Some(offset_of!(UniformParams, k2)),
        ParamId::K3 => Some(offset_of!(UniformParams, k3)),
        ParamId::K31 => Some(offset_of!(UniformParams, k31)),
        ParamId::K32 => Some(offset_of!(UniformParams, k32)),
        ParamId::K33 => Some(offset_of!(UniformParams, k33)),
        ParamId::StatusMax => Some(offset_of!(UniformParams, status_max)),
        ParamId::StatusBorder => Some(offset_of!(UniformParams, status_border)),
        ParamId::AngleDiv => Some(offset_of!(UniformParams, angle_div)),
        ParamId::Dist1 => Some(offset_of!(UniformParams, dist_1)),
        ParamId::Dist2 => Some(offset_of!(UniformParams, dist_2)),
        ParamId::Width | ParamId::Height | ParamId::WorkgroupSize | ParamId::Timestep => None,
    }
}

// The declared slots and the struct layout must agree.
const _: () = {
    assert!(size_of::<UniformParams>() == 48);
    assert!(offset_of!(UniformParams, _pad) == UNIFORM_FIELDS * 4);
    let mut i = 0;
    while i < DECLARATIONS.len() {
        let d = &DECLARATIONS[i];
        assert!(d.id.index() == i);
        match (d.uniform_slot, uniform_offset(d.id)) {
            (Some(slot), Some(offset)) => assert!(slot * 4 == offset),
            (None, None) => {}
            _ => panic!("uniform slot declaration disagrees with UniformParams"),
        }
        i += 1;
    }
};

/// Integer grid settings taken from the structural parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridOptions {
    pub width: u32,
    pub height: u32,
    pub workgroup_size: u32,
}

/// Structural parameters addressed by the resize path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dimension {
    Width,
    Height,
    WorkgroupSize,
}

impl Dimension {
    pub fn param(self) -> ParamId {
        match self {
            Dimension::Width => ParamId::Width,
            Dimension::Height => ParamId::Height,
            Dimension::WorkgroupSize => ParamId::WorkgroupSize,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParameterStore {
    decls: Vec<ParamDecl>,
    values: Vec<f32>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        Self {
            decls: DECLARATIONS.to_vec(),
            values: DECLARATIONS.iter().map(|d| d.default).collect(),
        }
    }

    /// Override the range advertised for `id`.
    pub fn with_range(mut self, id: ParamId, range: ParamRange) -> Self {
        self.decls[id.index()].range = range;
        self
    }

    pub fn with_value(mut self, id: ParamId, value: f32) -> Self {
        self.set(id, value);
        self
    }

    pub fn declarations(&self) -> &[ParamDecl] {
        &self.decls
    }

    pub fn declaration(&self, id: ParamId) -> &ParamDecl {
        &self.decls[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<&ParamDecl> {
        ParamId::from_name(name).map(|id| self.declaration(id))
    }

    pub fn get(&self, id: ParamId) -> f32 {
        self.values[id.index()]
    }

    pub fn set(&mut self, id: ParamId, value: f32) {
        self.values[id.index()] = value;
    }

    pub fn range(&self, id: ParamId) -> ParamRange {
        self.declaration(id).range
    }

    pub fn class(&self, id: ParamId) -> ParamClass {
        self.declaration(id).class
    }

    /// Pack the uniform-backed parameters by their declared slots.
    pub fn uniforms(&self) -> UniformParams {
        let mut words = [0.0f32; UNIFORM_WORDS];
        for d in &self.decls {
            if let Some(slot) = d.uniform_slot {
                words[slot] = self.values[d.id.index()];
            }
        }
        bytemuck::cast(words)
    }

    /// Host-side step count that `whole_time` wraps at. Never below one.
    pub fn timestep(&self) -> u32 {
        let steps = self.get(ParamId::Timestep);
        if steps.is_finite() && steps >= 1.0 {
            steps.min(u32::MAX as f32) as u32
        } else {
            1
        }
    }

    pub fn grid_options(&self) -> Result<GridOptions, SimError> {
        let raw = |id| self.get(id);
        let parsed = (
            whole(raw(ParamId::Width)),
            whole(raw(ParamId::Height)),
            whole(raw(ParamId::WorkgroupSize)),
        );
        match parsed {
            (Some(width), Some(height), Some(workgroup_size)) => Ok(GridOptions {
                width,
                height,
                workgroup_size,
            }),
            _ => {
                let bad = [ParamId::Width, ParamId::Height, ParamId::WorkgroupSize]
                    .into_iter()
                    .map(raw)
                    .find(|v| whole(*v).is_none())
                    .unwrap_or(f32::NAN);
                Err(SimError::InvalidDimensions {
                    width: raw(ParamId::Width) as u32,
                    height: raw(ParamId::Height) as u32,
                    reason: DimensionError::NotWhole { value: bad },
                })
            }
        }
    }
}

fn whole(value: f32) -> Option<u32> {
    if !value.is_finite() || value < 1.0 || value.fract() != 0.0 || value > u32::MAX as f32 {
        return None;
    }
    Some(value as u32)
}
