pub mod endpoint;
pub mod event;
pub mod state;

pub use endpoint::*;
pub use event::*;
pub use state::*;
