//! Database schema for jobs and runners.

/// Compliance jobs.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS compliance_jobs (
    id BIGSERIAL PRIMARY KEY,
    parent_id BIGINT REFERENCES compliance_jobs(id) ON DELETE SET NULL,
    benchmark_id TEXT NOT NULL,
    integration_id TEXT NOT NULL,
    resource_collection_id TEXT,
    trigger_type VARCHAR(32) NOT NULL,
    status VARCHAR(32) NOT NULL,
    are_all_runners_queued BOOLEAN NOT NULL DEFAULT FALSE,
    with_incidents BOOLEAN NOT NULL DEFAULT FALSE,
    created_by TEXT NOT NULL,
    failure_message TEXT,
    started_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Runners; `key_id` is the flat uniqueness key `job|query|integration`.
pub const CREATE_RUNNERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS compliance_runners (
    id BIGSERIAL PRIMARY KEY,
    key_id TEXT NOT NULL UNIQUE,
    parent_job_id BIGINT NOT NULL REFERENCES compliance_jobs(id) ON DELETE CASCADE,
    benchmark_id TEXT NOT NULL,
    query_id TEXT NOT NULL,
    integration_id TEXT,
    resource_collection_id TEXT,
    trigger_type VARCHAR(32) NOT NULL,
    callers JSONB NOT NULL DEFAULT '[]',
    status VARCHAR(32) NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    queued_at TIMESTAMPTZ,
    started_at TIMESTAMPTZ,
    total_count BIGINT,
    failure_message TEXT,
    queue_sequence TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_jobs_pair ON compliance_jobs(benchmark_id, integration_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_pending ON compliance_jobs(are_all_runners_queued, status)",
    "CREATE INDEX IF NOT EXISTS idx_runners_job ON compliance_runners(parent_job_id)",
    "CREATE INDEX IF NOT EXISTS idx_runners_status ON compliance_runners(status, trigger_type, created_at)",
];

/// Schema statements in dependency order, one statement each.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![CREATE_JOBS_TABLE, CREATE_RUNNERS_TABLE];
    statements.extend(CREATE_INDEXES);
    statements
}

pub mod tables {
    pub const JOBS: &str = "compliance_jobs";
    pub const RUNNERS: &str = "compliance_runners";
}
