//! Named operations exposed over a JSON boundary.
//!
//! An [`Operation`] takes JSON arguments and returns JSON data. The
//! [`OperationRegistry`] resolves operations by name, enforces [`Access`]
//! and wraps every outcome in an [`Envelope`].

mod operation;
mod registry;

pub use operation::{
    parse_arguments, unwrap_arguments, Access, Envelope, ErrorBody, Operation, OperationError,
    Result,
};
pub use registry::OperationRegistry;
