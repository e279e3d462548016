pub mod component;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod signal;

pub use component::{shutdown_fn, Shutdown, ShutdownFn};
pub use config::{ConfigLoader, GraceConfig};
pub use context::ShutdownContext;
pub use coordinator::{DeadlineArming, Grace, GraceBuilder, GracePhase};
pub use error::{ComponentError, GraceError};
pub use signal::{trigger_channel, ShutdownSignal, TriggerReceiver, TriggerSender};
