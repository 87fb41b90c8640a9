//! Orchestration engine behind the eggsmith live-image builder.
//!
//! The crate sequences privileged penguins-eggs invocations, streams their
//! output, keeps elapsed-time counters and copies the resulting image with
//! progress reporting. Front-ends drive a [`workflow::WorkflowController`] on
//! a worker thread and render the [`events::EngineEvent`]s it posts.

pub mod artifact;
pub mod config;
pub mod copy;
pub mod credential;
pub mod eggs_yaml;
pub mod error;
pub mod events;
pub mod logging;
pub mod output;
pub mod runner;
pub mod sequencer;
pub mod timer;
pub mod toolchain;
pub mod workflow;

pub use config::EggsmithConfig;
pub use credential::SessionCredential;
pub use error::{EggsmithError, EggsmithResult};
pub use events::{EngineEvent, EventBus, EventReceiver};
pub use runner::{CommandDescriptor, CommandExecutor, ShellRunner};
pub use workflow::{WorkflowController, WorkflowState};
