//! Run workflow
//!
//! - today: one preread run (calendar, per-meeting preparation, dispatch)
//! - digest: ordering and rendering of the day's results
//! - deliver: once-per-day delivery guard

pub mod deliver;
pub mod digest;
pub mod today;

pub use deliver::DeliveryGuard;
pub use digest::{assemble_digest, DigestDocument};
pub use today::{PrereadRun, RunReport};
