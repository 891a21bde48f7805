//! `eco-core`
//!
//! Core trait definitions and types for the eco experiment-control layer.
//!
//! ## Building Blocks
//!
//! - [`Detector`] / [`Adjustable`]: capability traits every device wrapper
//!   implements
//! - [`AdjustableExt`]: `set_target_value` / `mv` / `umv` / `wm`
//!   convenience surface shared by all adjustables
//! - [`Changer`]: handle on an in-flight value change
//! - [`Alias`] / [`Namespace`]: dotted device names bound to channels
//! - [`Assembly`]: composite devices with status snapshots
//! - [`EcoError`]: framework error type
//!
//! ## Example
//!
//! ```rust,no_run
//! use eco_core::{Adjustable, AdjustableExt, AdjustableMemory};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let delay: Arc<dyn Adjustable> = Arc::new(AdjustableMemory::new("delay", 0.0));
//! let mut changer = delay.set_target_value(1.5)?;
//! changer.wait().await?;
//! assert_eq!(delay.wm().await?, 1.5);
//! # Ok(())
//! # }
//! ```

pub mod adjustable;
pub mod alias;
pub mod assembly;
pub mod changer;
pub mod error;
pub mod task;
pub mod virtual_adjustable;

pub use adjustable::{Adjustable, AdjustableExt, Detector, DetectorExt, Limits};
pub use alias::{Alias, AliasRecord, Namespace};
pub use assembly::{Assembly, Member, MemberRole, StatusSnapshot};
pub use changer::{Changer, Stopper, wait_changers};
pub use error::{EcoError, EcoResult};
pub use task::{TaskHandle, TaskStatus};
pub use virtual_adjustable::{AdjustableFs, AdjustableMemory, AdjustableVirtual, DetectorVirtual};
