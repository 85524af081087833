pub mod config;
pub mod counter;
pub mod dispatcher;
pub mod identity;
pub mod lifecycle;
pub mod pacing;
pub mod responder;
pub mod sender;
pub mod stats;
pub mod topology;

pub use config::*;
pub use counter::*;
pub use dispatcher::*;
pub use identity::*;
pub use lifecycle::*;
pub use pacing::*;
pub use responder::*;
pub use sender::*;
pub use stats::*;
pub use topology::*;
