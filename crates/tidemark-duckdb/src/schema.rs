/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` is passed at runtime from `Config.duckdb_memory_limit`
/// (env `TIDEMARK_DUCKDB_MEMORY`, default `"1GB"`). Always set an explicit
/// limit: the DuckDB default (80% of system RAM) is not acceptable for a
/// server process.
///
/// `"timestamp"` and `"type"` are quoted everywhere they appear as column
/// names.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- ORGANIZATIONS
-- ===========================================
CREATE TABLE IF NOT EXISTS organizations (
    id                  VARCHAR PRIMARY KEY,
    name                VARCHAR NOT NULL,
    plan                VARCHAR NOT NULL DEFAULT 'free',   -- free | standard | pro | enterprise
    monthly_event_limit BIGINT,                            -- overrides the plan default when set
    quota_exempt        BOOLEAN NOT NULL DEFAULT FALSE,    -- unbounded quota and lookback
    created_at          TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ===========================================
-- SITES
-- ===========================================
CREATE TABLE IF NOT EXISTS sites (
    id              VARCHAR PRIMARY KEY,
    organization_id VARCHAR NOT NULL,
    name            VARCHAR NOT NULL,
    domain          VARCHAR NOT NULL,
    legacy_billing  BOOLEAN NOT NULL DEFAULT FALSE,        -- legacy sites bill pageviews only
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_sites_organization ON sites(organization_id);

-- ===========================================
-- IMPORT JOBS (status ledger)
-- ===========================================
CREATE TABLE IF NOT EXISTS import_jobs (
    id                        VARCHAR PRIMARY KEY,
    site_id                   VARCHAR NOT NULL,
    organization_id           VARCHAR NOT NULL,
    source                    VARCHAR NOT NULL,          -- umami | simple_analytics
    status                    VARCHAR NOT NULL,          -- pending | processing | completed | failed
    file_name                 VARCHAR NOT NULL,
    error_message             VARCHAR,
    accepted_events           BIGINT NOT NULL DEFAULT 0,
    skipped_quota             BIGINT NOT NULL DEFAULT 0,
    skipped_invalid_timestamp BIGINT NOT NULL DEFAULT 0,
    filtered_out_of_range     BIGINT NOT NULL DEFAULT 0,
    invalid_rows              BIGINT NOT NULL DEFAULT 0,
    created_at                TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at                TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
-- Admission control counts active jobs per organization.
CREATE INDEX IF NOT EXISTS idx_import_jobs_org_status ON import_jobs(organization_id, status);
CREATE INDEX IF NOT EXISTS idx_import_jobs_site ON import_jobs(site_id, created_at);

-- ===========================================
-- EVENTS (canonical event store)
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    site_id                  VARCHAR NOT NULL,
    "timestamp"              TIMESTAMP NOT NULL,       -- UTC
    session_id               VARCHAR NOT NULL,
    user_id                  VARCHAR NOT NULL,
    hostname                 VARCHAR NOT NULL,
    pathname                 VARCHAR NOT NULL,
    querystring              VARCHAR NOT NULL,
    url_parameters           VARCHAR NOT NULL,         -- JSON object
    page_title               VARCHAR NOT NULL,
    referrer                 VARCHAR NOT NULL,
    channel                  VARCHAR NOT NULL,
    browser                  VARCHAR NOT NULL,
    browser_version          VARCHAR NOT NULL,
    operating_system         VARCHAR NOT NULL,
    operating_system_version VARCHAR NOT NULL,
    language                 VARCHAR NOT NULL,
    country                  VARCHAR(2) NOT NULL,
    region                   VARCHAR NOT NULL,
    city                     VARCHAR NOT NULL,
    screen_width             INTEGER NOT NULL,
    screen_height            INTEGER NOT NULL,
    device_type              VARCHAR NOT NULL,
    "type"                   VARCHAR NOT NULL,         -- pageview | custom_event | performance
    event_name               VARCHAR NOT NULL,
    props                    VARCHAR NOT NULL,         -- JSON object
    import_id                VARCHAR                   -- NULL for live-tracked events
);
CREATE INDEX IF NOT EXISTS idx_events_site_time ON events(site_id, "timestamp");
CREATE INDEX IF NOT EXISTS idx_events_import ON events(import_id);
"#
    )
}
