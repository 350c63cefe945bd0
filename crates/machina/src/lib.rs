//! In-process task orchestration runtime for long-running bot-style
//! workloads: periodic **emits**, on-demand **executes** gated by named
//! **concurrent groups**, and the [`Machina`] scheduler that drives all
//! registered work to completion.
//!
//! ```no_run
//! use machina::{BodyError, Machina, EmitOptions};
//!
//! # async fn run() -> Result<(), machina::MachinaError> {
//! let bot = Machina::new();
//! bot.emit("heartbeat", EmitOptions { count: Some(3), ..Default::default() }, |event| async move {
//!     println!("epoch {}", event.epoch);
//!     Ok::<(), BodyError>(())
//! })?;
//! bot.run().await
//! # }
//! ```

pub mod clock;
pub mod config;
mod driver;
pub mod emit;
pub mod error;
pub mod event;
pub mod execute;
pub mod group;
pub mod interval;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod time_semaphore;

pub use clock::{Clock, SystemClock};
pub use config::MachinaConfig;
pub use emit::{EmitHandler, EmitOptions};
pub use error::{BodyError, MachinaError, MachinaResult};
pub use event::Event;
pub use execute::ExecuteHandle;
pub use group::{ConcurrentGroup, GroupLimits};
pub use interval::{interval_to_duration, interval_to_seconds};
pub use resolver::{DependencyResolver, NoopResolver, ResolvedArgs};
pub use retry::{NoRetry, RetryPolicy};
pub use scheduler::Machina;
pub use time_semaphore::{Permit, TimeSemaphore};
