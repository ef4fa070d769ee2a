pub mod error;
pub mod layout;
pub mod lock;
pub mod worktree;

pub use error::*;
pub use layout::*;
pub use lock::*;
pub use worktree::*;
