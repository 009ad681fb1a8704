use std::fmt;

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscapeKind {
    /// Left the grid while still inside the clip band. The particle was clamped back in.
    Grid,
    /// Left the vertical clip band. The particle was deactivated.
    ClipBand,
}

/// A particle that tried to leave the simulated region during a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryEscape {
    pub particle: usize,
    /// Position the particle tried to move to.
    pub position: Vec3,
    pub kind: EscapeKind,
}

/// Summary of one simulation step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Particles transferred to the grid.
    pub scattered: usize,
    /// Particles whose cell was fixed and skipped the transfer.
    pub rejected: usize,
    /// Collider and fixed cell contacts, including rejected particles.
    pub collisions: usize,
    /// Particles deactivated by the clip band.
    pub deactivated: usize,
    pub escapes: Vec<BoundaryEscape>,
}

impl StepReport {
    pub fn grid_escapes(&self) -> usize {
        self.escapes.iter().filter(|e| e.kind == EscapeKind::Grid).count()
    }

}

/// Counts summed over many steps. Individual escapes are not kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub steps: u64,
    pub scattered: u64,
    pub rejected: u64,
    pub collisions: u64,
    pub deactivated: u64,
    pub grid_escapes: u64,
}

impl RunTotals {
    pub fn add(&mut self, report: &StepReport) {
        self.steps += 1;
        self.scattered += report.scattered as u64;
        self.rejected += report.rejected as u64;
        self.collisions += report.collisions as u64;
        self.deactivated += report.deactivated as u64;
        self.grid_escapes += report.grid_escapes() as u64;
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scattered, {} rejected, {} collisions, {} deactivated, {} grid escapes",
            self.scattered,
            self.rejected,
            self.collisions,
            self.deactivated,
            self.grid_escapes(),
        )
    }
}

impl fmt::Display for RunTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps, {} scattered, {} rejected, {} collisions, {} deactivated, {} grid escapes",
            self.steps,
            self.scattered,
            self.rejected,
            self.collisions,
            self.deactivated,
            self.grid_escapes,
        )
    }
}
