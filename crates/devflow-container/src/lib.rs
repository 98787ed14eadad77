pub mod converter;
pub mod docker;
pub mod error;
pub mod exec;
pub mod port;
pub mod process;
pub mod waiter;

pub use converter::*;
pub use docker::*;
pub use error::*;
pub use exec::*;
pub use port::*;
pub use process::*;
pub use waiter::*;
