//! Multi-session VNC driver.
//!
//! A [`SessionManager`] keeps many named RFB connections open at once. Each
//! connection decodes server updates on its own task; [`SessionManager::step`]
//! is the single synchronization point that pushes queued input to every
//! requested connection and returns one batched [`StepResult`] of
//! observations, update counters and errors.
//!
//! # Error Handling
//!
//! Only `connect` returns an error directly. Failures that happen while a
//! connection is running surface as that connection's entry in
//! [`StepResult::errors`] on the next step and never affect other
//! connections.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
mod dispatcher;
pub mod errors;
pub mod observation;
pub mod profile;
pub mod session;
pub mod sink;

pub use config::DriverConfig;
pub use errors::{DriverError, ErrorKind, ErrorReport};
pub use observation::{Info, Observation, StepResult};
pub use session::{parse_address, ConnectOptions, SessionManager};
pub use sink::{NullSink, PngSink, PresentationSink};

pub use rfb_client::{Event, Frame, Rect};
