pub mod quota_checker;
pub mod reconciliation;
pub mod scheduler;

pub use quota_checker::BlobStoreQuotaUsageChecker;
pub use reconciliation::{ReconciliationJob, SoftDeleteReconciler, SweepSummary};
pub use scheduler::{JobHandle, PeriodicJob, PeriodicJobService};
