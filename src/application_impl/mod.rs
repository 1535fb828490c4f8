mod token_service_fake;
mod token_service_impl;

pub use token_service_fake::*;
pub use token_service_impl::*;
