mod authz;
mod error;
mod handler;
mod router;

pub use authz::*;
pub use error::recover_error;
pub use router::routes;
