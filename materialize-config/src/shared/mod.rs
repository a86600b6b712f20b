mod base;
mod batch;
mod collection;
mod driver;
mod endpoint;
mod resource;

pub use base::*;
pub use batch::*;
pub use collection::*;
pub use driver::*;
pub use endpoint::*;
pub use resource::*;
