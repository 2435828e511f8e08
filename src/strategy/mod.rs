//! Trading strategy: entry scanning, streamed exit monitoring, and boot-time
//! reconciliation against the venue.

mod monitor;
mod reconciler;
mod scanner;

pub use monitor::ExitMonitor;
pub use reconciler::{reconcile, ReconcileReport};
pub use scanner::{BuyCandidate, ScanSummary, Scanner};
