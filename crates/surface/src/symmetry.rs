//! Symmetric dab replication.
//!
//! The surface keeps a current and a pending symmetry state; pending
//! changes are applied only in `begin_atomic`, never while dabs are being
//! queued. Each state expands into an array of affine transforms that map
//! the painted dab position onto its mirror/rotation clones.

use glam::{Affine2, Mat2, Vec2};
use std::f32::consts::PI;

/// Kinds of symmetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetryType {
    Vertical,
    Horizontal,
    VertHorz,
    Rotational,
    Snowflake,
}

/// One complete symmetry configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetryState {
    pub kind: SymmetryType,
    pub center_x: f32,
    pub center_y: f32,
    /// Symmetry line angle in degrees.
    pub angle: f32,
    /// Number of symmetry lines; at least 2 for the rotational kinds.
    pub num_lines: u32,
}

impl Default for SymmetryState {
    fn default() -> Self {
        Self { kind: SymmetryType::Vertical, center_x: 0.0, center_y: 0.0, angle: 0.0, num_lines: 2 }
    }
}

/// How many transforms a state expands into.
pub fn num_matrices_required(state: &SymmetryState) -> usize {
    match state.kind {
        SymmetryType::Vertical | SymmetryType::Horizontal => 1,
        SymmetryType::VertHorz => 3,
        SymmetryType::Rotational => state.num_lines as usize - 1,
        SymmetryType::Snowflake => 2 * state.num_lines as usize - 1,
    }
}

// Reflection across a line through the origin at `angle` radians.
fn reflect(transform: Affine2, angle: f32) -> Affine2 {
    let x = angle.cos();
    let y = angle.sin();
    let factor = Affine2::from_mat2(Mat2::from_cols(
        Vec2::new(x * x - y * y, 2.0 * x * y),
        Vec2::new(2.0 * x * y, y * y - x * x),
    ));
    factor * transform
}

// Clockwise rotation about the origin.
fn rotate_cw(transform: Affine2, angle: f32) -> Affine2 {
    Affine2::from_mat2(Mat2::from_angle(-angle)) * transform
}

/// Current and pending symmetry state plus the derived transform cache.
pub struct SymmetryData {
    current: SymmetryState,
    pending: SymmetryState,
    pending_changes: bool,
    pub active: bool,
    matrices: Vec<Affine2>,
}

impl Default for SymmetryData {
    fn default() -> Self {
        Self::new()
    }
}

impl SymmetryData {
    pub fn new() -> Self {
        let mut data = Self {
            current: SymmetryState::default(),
            pending: SymmetryState::default(),
            pending_changes: true,
            active: false,
            matrices: Vec::new(),
        };
        data.recalculate();
        data
    }

    /// The state the transforms were last computed for.
    pub fn current(&self) -> &SymmetryState {
        &self.current
    }

    pub fn matrices(&self) -> &[Affine2] {
        &self.matrices
    }

    /// Stage a new symmetry configuration. Nothing is recomputed until
    /// [`SymmetryData::update`] runs at the next `begin_atomic`.
    pub fn set_pending(
        &mut self,
        active: bool,
        center_x: f32,
        center_y: f32,
        angle: f32,
        kind: SymmetryType,
        num_lines: u32,
    ) {
        self.active = active;
        self.pending = SymmetryState {
            kind,
            center_x,
            center_y,
            angle,
            num_lines: num_lines.max(2),
        };
        self.pending_changes = true;
    }

    /// Recompute the transform array if the pending state differs.
    pub fn update(&mut self) {
        if !self.pending_changes || self.current == self.pending {
            return;
        }
        self.recalculate();
    }

    fn recalculate(&mut self) {
        let state = self.pending;
        self.current = state;
        self.pending_changes = false;

        let required = num_matrices_required(&state);
        self.matrices.clear();
        self.matrices.resize(required, Affine2::IDENTITY);

        let center = Vec2::new(state.center_x, state.center_y);
        let mut angle = state.angle * (PI / 180.0);
        let rot_angle = 2.0 * PI / state.num_lines as f32;
        let m = Affine2::from_translation(-center);

        match state.kind {
            SymmetryType::Vertical | SymmetryType::Horizontal => {
                if state.kind == SymmetryType::Vertical {
                    angle += PI / 2.0;
                }
                self.matrices[0] = reflect(m, -angle);
            }
            SymmetryType::VertHorz => {
                let v_angle = angle + PI / 2.0;
                self.matrices[0] = reflect(m, -angle);
                self.matrices[1] = reflect(self.matrices[0], -v_angle);
                self.matrices[2] = reflect(self.matrices[1], -angle);
            }
            SymmetryType::Snowflake => {
                let n = state.num_lines as usize;
                let base_idx = n - 1;
                for i in 0..n {
                    self.matrices[base_idx + i] = reflect(
                        rotate_cw(m, rot_angle * i as f32),
                        -(i as f32) * rot_angle - angle,
                    );
                }
                for i in 1..n {
                    self.matrices[i - 1] = rotate_cw(m, rot_angle * i as f32);
                }
            }
            SymmetryType::Rotational => {
                for i in 1..state.num_lines as usize {
                    self.matrices[i - 1] = rotate_cw(m, rot_angle * i as f32);
                }
            }
        }

        for matrix in &mut self.matrices {
            *matrix = Affine2::from_translation(center) * *matrix;
        }
    }
}
