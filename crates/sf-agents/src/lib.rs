pub mod adapter;
pub mod error;
pub mod setup;
pub mod tmux;

pub use adapter::*;
pub use error::*;
pub use setup::*;
pub use tmux::*;
