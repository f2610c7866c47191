mod health;
mod manifest;
mod policy;
mod spec;

pub use health::*;
pub use manifest::*;
pub use policy::*;
pub use spec::*;
