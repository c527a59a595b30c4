//! Transfer tasks and the registry that tracks them

mod registry;
pub(crate) mod task;

pub use registry::{
    ActiveTransfer, TransferDirection, TransferGuard, TransferId, TransferInfo, TransferRegistry,
    TransferSpec,
};
