pub mod discovery;
pub mod error;
pub mod loader;
pub mod merge;
pub mod model;
pub mod validation;

pub use discovery::*;
pub use error::*;
pub use loader::*;
pub use merge::*;
pub use model::*;
pub use validation::*;
