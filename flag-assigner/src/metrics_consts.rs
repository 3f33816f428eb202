pub const BALANCE_RUNS: &str = "flag_assigner_balance_runs";
pub const BALANCE_RUN_MS: &str = "flag_assigner_balance_run_ms";
pub const LISTING_FAILURES: &str = "flag_assigner_listing_failures";

pub const ASSIGNMENTS_CREATED: &str = "flag_assigner_assignments_created";
pub const ASSIGNMENTS_DELETED: &str = "flag_assigner_assignments_deleted";
pub const ASSIGNMENTS_EVICTED: &str = "flag_assigner_assignments_evicted";
pub const OPERATIONS_SKIPPED: &str = "flag_assigner_operations_skipped";

pub const MALFORMED_TEMPLATES: &str = "flag_assigner_malformed_templates";

// Snapshot of the last pass, labelled by worker
pub const WORKER_CURRENT_LOAD: &str = "flag_assigner_worker_current_load";
pub const WORKER_TARGET_LOAD: &str = "flag_assigner_worker_target_load";
