pub mod block;
pub mod comm;
pub mod crd;
pub mod integ;
pub mod leg;
pub mod session;
pub mod sha;
pub mod shc;
pub mod shs;

mod sweep;
mod traits;

pub use comm::{Communicator, LocalCluster, SharedCommunicator, SingleProcess, SingleWriter};
pub use crd::{CellKind, CellSet, PointKind, PointSet, RowChunk};
pub use session::Session;
pub use shc::{OrderChunk, Shc};
pub use shs::Derivatives;
pub use traits::{Analysis, RoundTrip, Synthesis};
