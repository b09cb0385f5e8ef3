use std::fmt::{Debug, Display};

use tileplan_ir::{Elem, GraphError, MatrixIdent, RegisterLayout, TileSize};
use tileplan_runtime::{ExecutionError, LaunchError};

use crate::components::PlanState;

/// Errors that can occur while building a matmul plan.
pub enum MatmulSetupError {
    /// A required hardware feature is not available.
    Unavailable(MatmulAvailabilityError),

    /// The tiling parameters break an invariant.
    InvalidConfig(ConfigurationError),

    /// The register layout of the tensor core can't be used for the configured tile.
    Layout(LayoutMappingError),

    /// The built graph breaks its ordering contract.
    Graph(GraphError),

    /// A plan stage was emitted out of order.
    Plan { from: PlanState, to: PlanState },

    /// A plan stage needs a handle no earlier stage produced.
    MissingHandle {
        state: PlanState,
        handle: &'static str,
    },
}

/// A feature required by the plan is not available on the device.
pub enum MatmulAvailabilityError {
    /// The device executes planes of another width.
    PlaneDimUnsupported { plane_dim: u32 },

    /// The block has more threads than the device allows.
    CubeDimTooBig { requested: u32, max: u32 },

    /// The staged tiles don't fit in shared memory.
    SharedMemoryTooBig { requested: usize, max: usize },

    /// The device has no tensor-core instruction for the given element types and tile size.
    MmaInstructionUnavailable {
        input: Elem,
        output: Elem,
        size: TileSize,
    },
}

/// An invariant of the tiling parameters doesn't hold.
///
/// Raised before any graph node or device resource is created.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    invariant: &'static str,
    values: Vec<(&'static str, u32)>,
}

impl ConfigurationError {
    pub fn new(invariant: &'static str, values: &[(&'static str, u32)]) -> Self {
        Self {
            invariant,
            values: values.to_vec(),
        }
    }

    /// The violated invariant, written as the check that failed.
    pub fn invariant(&self) -> &'static str {
        self.invariant
    }

    /// Name and value of every parameter involved in the invariant.
    pub fn values(&self) -> &[(&'static str, u32)] {
        &self.values
    }
}

/// A register layout is not a usable mapping for the configured tile.
#[derive(Clone, PartialEq, Eq)]
pub enum LayoutMappingError {
    /// The layout is not defined for the tile size or plane width.
    Undefined {
        layout: RegisterLayout,
        size: TileSize,
        plane_dim: u32,
    },

    /// The layout was written for another tile or plane.
    TileMismatch {
        expected: TileSize,
        found: TileSize,
        plane_dim: u32,
    },

    /// A position depends on something else than the lane.
    NotConstant {
        ident: MatrixIdent,
        lane: u32,
        nth: u32,
    },

    /// A position falls outside of the tile.
    OutOfTile {
        ident: MatrixIdent,
        lane: u32,
        nth: u32,
        row: u32,
        col: u32,
    },

    /// Two register elements map to the same position.
    NotInjective {
        ident: MatrixIdent,
        row: u32,
        col: u32,
    },

    /// A position of the tile is held by no register element.
    NotSurjective {
        ident: MatrixIdent,
        row: u32,
        col: u32,
    },

    /// An element staged into shared memory reached the instruction, or a result reached the
    /// block tile, at another position than the layout assigns.
    RoundTrip {
        ident: MatrixIdent,
        row: u32,
        col: u32,
    },
}

/// Errors that can occur while launching a matmul.
pub enum MatmulLaunchError {
    /// The plan couldn't be built.
    Setup(MatmulSetupError),

    /// The runtime couldn't compile the plan.
    Launch(LaunchError),

    /// The runtime failed while executing the plan.
    Execution(ExecutionError),

    /// The output is not accurate enough.
    Accuracy(AccuracyError),
}

/// The output is further from the reference than tolerated.
#[derive(Clone, Copy, PartialEq)]
pub struct AccuracyError {
    pub metric: f64,
    pub tolerance: f64,
}

impl From<MatmulAvailabilityError> for MatmulSetupError {
    fn from(value: MatmulAvailabilityError) -> Self {
        Self::Unavailable(value)
    }
}

impl From<ConfigurationError> for MatmulSetupError {
    fn from(value: ConfigurationError) -> Self {
        Self::InvalidConfig(value)
    }
}

impl From<LayoutMappingError> for MatmulSetupError {
    fn from(value: LayoutMappingError) -> Self {
        Self::Layout(value)
    }
}

impl From<GraphError> for MatmulSetupError {
    fn from(value: GraphError) -> Self {
        Self::Graph(value)
    }
}

impl From<MatmulSetupError> for MatmulLaunchError {
    fn from(value: MatmulSetupError) -> Self {
        Self::Setup(value)
    }
}

impl From<LaunchError> for MatmulLaunchError {
    fn from(value: LaunchError) -> Self {
        Self::Launch(value)
    }
}

impl From<ExecutionError> for MatmulLaunchError {
    fn from(value: ExecutionError) -> Self {
        Self::Execution(value)
    }
}

impl From<AccuracyError> for MatmulLaunchError {
    fn from(value: AccuracyError) -> Self {
        Self::Accuracy(value)
    }
}

impl Display for MatmulSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Debug for MatmulSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatmulSetupError::Unavailable(err) => {
                writeln!(
                    f,
                    "Unable to launch matmul because a required feature is unavailable: {err:?}"
                )
            }
            MatmulSetupError::InvalidConfig(err) => {
                writeln!(
                    f,
                    "Unable to launch matmul because the config is invalid: {err}"
                )
            }
            MatmulSetupError::Layout(err) => {
                writeln!(
                    f,
                    "Unable to launch matmul because the register layout is unusable: {err:?}"
                )
            }
            MatmulSetupError::Graph(err) => {
                writeln!(f, "Matmul plan breaks its ordering contract: {err}")
            }
            MatmulSetupError::Plan { from, to } => {
                writeln!(f, "Matmul plan can't go from {from:?} to {to:?}")
            }
            MatmulSetupError::MissingHandle { state, handle } => {
                writeln!(f, "Matmul plan stage {state:?} is missing its `{handle}` handle")
            }
        }
    }
}

impl Debug for MatmulAvailabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatmulAvailabilityError::PlaneDimUnsupported { plane_dim } => {
                writeln!(
                    f,
                    "Plane dimension unsupported: {plane_dim}. Only 32 is supported."
                )
            }
            MatmulAvailabilityError::CubeDimTooBig { requested, max } => {
                writeln!(f, "Cube dim too big {requested}, maximum is {max}")
            }
            MatmulAvailabilityError::SharedMemoryTooBig { requested, max } => {
                writeln!(
                    f,
                    "Shared memory too big: {requested} bytes, maximum is {max} bytes"
                )
            }
            MatmulAvailabilityError::MmaInstructionUnavailable {
                input,
                output,
                size,
            } => writeln!(
                f,
                "Mma on inputs {:?} and outputs {:?} with shape m={:?}, n={:?}, k={:?} not supported.",
                input,
                output,
                size.m(),
                size.n(),
                size.k()
            ),
        }
    }
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` doesn't hold with", self.invariant)?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

impl Debug for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl Debug for LayoutMappingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutMappingError::Undefined {
                layout,
                size,
                plane_dim,
            } => writeln!(
                f,
                "Layout {layout} is not defined for {size} on planes of {plane_dim}"
            ),
            LayoutMappingError::TileMismatch {
                expected,
                found,
                plane_dim,
            } => writeln!(
                f,
                "Layout maps {found}, but {expected} on planes of {plane_dim} is needed"
            ),
            LayoutMappingError::NotConstant { ident, lane, nth } => writeln!(
                f,
                "Position of {ident} element {nth} of lane {lane} doesn't fold to a literal"
            ),
            LayoutMappingError::OutOfTile {
                ident,
                lane,
                nth,
                row,
                col,
            } => writeln!(
                f,
                "{ident} element {nth} of lane {lane} maps outside of the tile at ({row}, {col})"
            ),
            LayoutMappingError::NotInjective { ident, row, col } => {
                writeln!(f, "{ident} position ({row}, {col}) is held by two elements")
            }
            LayoutMappingError::NotSurjective { ident, row, col } => {
                writeln!(f, "{ident} position ({row}, {col}) is held by no element")
            }
            LayoutMappingError::RoundTrip { ident, row, col } => {
                writeln!(f, "{ident} position ({row}, {col}) changed after a round trip")
            }
        }
    }
}

impl Display for MatmulLaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Debug for MatmulLaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatmulLaunchError::Setup(err) => write!(f, "{err:?}"),
            MatmulLaunchError::Launch(err) => write!(f, "{err:?}"),
            MatmulLaunchError::Execution(err) => write!(f, "{err}"),
            MatmulLaunchError::Accuracy(err) => write!(f, "{err}"),
        }
    }
}

impl Display for AccuracyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Mean squared error {} is above the tolerance {}",
            self.metric, self.tolerance
        )
    }
}

impl Debug for AccuracyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}
