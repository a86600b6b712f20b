//! Data flowing through a materialization: keys, checkpoints, requests and change events.

mod checkpoint;
mod event;
mod key;
mod request;

pub use checkpoint::*;
pub use event::*;
pub use key::*;
pub use request::*;
