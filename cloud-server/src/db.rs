//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create tables if not exist
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
///
/// `records` mirrors `appcompat_core::logic::dataset::schema::SCHEMA`
/// column for column; unsigned counts are stored as BIGINT.
pub const SCHEMA_SQL: &str = r#"
-- Collections (one per load, plus the training mirror)
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Records
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    id CHAR(64) NOT NULL,
    class_label TEXT NOT NULL DEFAULT '',
    predict REAL NOT NULL DEFAULT 0,
    hostname TEXT NOT NULL,
    run_order BIGINT NOT NULL,
    last_modified TIMESTAMPTZ,
    last_execution TIMESTAMPTZ,
    path TEXT NOT NULL,
    file_size BIGINT,
    file_executed BOOLEAN,
    file_unc TEXT NOT NULL DEFAULT '',
    file_drive TEXT NOT NULL DEFAULT '',
    file_root TEXT NOT NULL DEFAULT '',
    file_shortname TEXT NOT NULL DEFAULT '',
    file_ext TEXT NOT NULL DEFAULT '',
    file_name TEXT NOT NULL DEFAULT '',
    f_path_unique_hosts BIGINT,
    f_recon_cluster BIGINT,
    f_files_in_folder BIGINT,
    f_neighbour_psexec BOOLEAN,
    f_same_timestamp_different_name BIGINT,
    f_same_filesize_different_name BIGINT,
    f_shortname_ends_3264 BOOLEAN NOT NULL DEFAULT false,
    f_path_depth BIGINT NOT NULL DEFAULT 0,
    f_staging_directory BOOLEAN NOT NULL DEFAULT false,
    f_temp_dir BOOLEAN NOT NULL DEFAULT false,
    f_system32_dir BOOLEAN NOT NULL DEFAULT false,
    f_recon_cmd BOOLEAN NOT NULL DEFAULT false,
    f_users_dir BOOLEAN NOT NULL DEFAULT false,
    f_number_digits BIGINT NOT NULL DEFAULT 0,
    f_root_length BIGINT NOT NULL DEFAULT 0,
    f_shortname_length BIGINT NOT NULL DEFAULT 0,
    f_executable_archive BOOLEAN NOT NULL DEFAULT false,
    PRIMARY KEY (collection, id)
);

-- Jobs (durable queue)
CREATE TABLE IF NOT EXISTS jobs (
    id CHAR(64) PRIMARY KEY,
    queue TEXT NOT NULL,
    collection TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload JSONB NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    attempts INT NOT NULL DEFAULT 0,
    timeout_secs BIGINT NOT NULL,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    run_after TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ
);

-- Retried jobs wait until run_after
ALTER TABLE jobs ADD COLUMN IF NOT EXISTS run_after TIMESTAMPTZ NOT NULL DEFAULT NOW();

-- Indexes
CREATE INDEX IF NOT EXISTS idx_records_host_run ON records(collection, hostname, run_order);
CREATE INDEX IF NOT EXISTS idx_records_predict ON records(collection, predict DESC);
CREATE INDEX IF NOT EXISTS idx_records_label ON records(collection, class_label);
CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs(status, run_after, queue, created_at);
"#;
