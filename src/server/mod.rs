mod admission;
mod channel;
mod port;
mod presence_hub;
mod server;

pub use admission::*;
pub use channel::*;
pub use port::*;
pub use presence_hub::*;
pub use server::*;
