pub mod backend;
pub mod docker;
pub mod helpers;

pub use backend::*;
pub use docker::*;
pub use helpers::*;
