//! Ring promotion: the per-intent state machine, its controller and the
//! event-driven driver that feeds it.

pub mod controller;
pub mod driver;
pub mod locks;
pub mod state;

pub use controller::{ControllerSettings, PromotionController, SubmitIntent};
pub use driver::{ControllerEvent, DriverHandle, PromotionDriver};
pub use locks::IntentLocks;
pub use state::{transition, RingPhase};
