//! Owned-output storage for one account
//!
//! [`TransfersContainer`] keeps every output the account received and which of
//! them were spent. Lock state is computed per query from the container's
//! current height.

pub mod output_status;
pub mod stored_output;
pub mod transfers_container;

pub use output_status::*;
pub use stored_output::*;
pub use transfers_container::{
    ContainerParameters, DetachResult, TransfersContainer, TransfersContainerState,
};
