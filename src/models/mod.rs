pub mod diagnostics;
pub mod entry;
pub mod error;
pub mod health;
pub mod identity;
pub mod messages;

pub use diagnostics::*;
pub use entry::*;
pub use error::*;
pub use health::*;
pub use identity::*;
pub use messages::*;
