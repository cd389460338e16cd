//! Slotguard: the safety core of a driving-test booking assistant.
//!
//! A booking attempt moves through a [`machine::BookingStateMachine`]. No
//! booking action runs until the user approves it through a
//! [`confirm::ConfirmationGate`]; the action itself runs under a per-pupil
//! [`lock::LockManager`] key and inside a [`stealth::StealthCoordinator`],
//! which scores risk and paces the interaction with delays from a
//! [`timing::TimingEngine`]. [`flow::BookingFlow`] wires these together.

pub mod config;
pub mod confirm;
pub mod flow;
pub mod lock;
pub mod machine;
pub mod model;
pub mod mouse;
pub mod stealth;
pub mod storage;
pub mod timing;
pub mod validate;
