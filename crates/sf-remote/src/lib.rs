pub mod error;
pub mod executor;
pub mod mock;
pub mod path;
pub mod quote;

pub use error::*;
pub use executor::*;
pub use mock::*;
pub use path::*;
pub use quote::*;
