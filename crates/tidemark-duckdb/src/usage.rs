use std::collections::HashMap;

use anyhow::Result;

use tidemark_core::billing::MonthKey;
use tidemark_core::event::CanonicalEvent;

use crate::DuckDbBackend;

/// Event types billed for sites on the current pricing model.
const CURRENT_BILLABLE_TYPES: &str = "('pageview', 'custom_event', 'performance')";
/// Legacy sites were billed on pageviews alone.
const LEGACY_BILLABLE_TYPES: &str = "('pageview')";

fn usage_by_month(
    conn: &duckdb::Connection,
    organization_id: &str,
    since: Option<MonthKey>,
    legacy: bool,
) -> Result<Vec<(String, i64)>> {
    let billable = if legacy {
        LEGACY_BILLABLE_TYPES
    } else {
        CURRENT_BILLABLE_TYPES
    };
    let mut sql = format!(
        r#"SELECT strftime(e."timestamp", '%Y%m') AS month, COUNT(*) AS events
           FROM events e
           JOIN sites s ON s.id = e.site_id
           WHERE s.organization_id = ?1
             AND s.legacy_billing = ?2
             AND e."type" IN {billable}"#
    );
    let since_ts = since
        .and_then(|m| m.first_day())
        .map(|d| format!("{} 00:00:00", d.format("%Y-%m-%d")));

    let mut params: Vec<Box<dyn duckdb::types::ToSql>> =
        vec![Box::new(organization_id.to_string()), Box::new(legacy)];
    if let Some(ts) = since_ts {
        sql.push_str(r#" AND e."timestamp" >= CAST(?3 AS TIMESTAMP)"#);
        params.push(Box::new(ts));
    }
    sql.push_str(" GROUP BY 1");

    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

impl DuckDbBackend {
    /// Billable events per calendar month across every site of the
    /// organization, restricted to months at or after `since` when given.
    ///
    /// Legacy and current sites are counted separately and merged.
    pub async fn monthly_event_usage(
        &self,
        organization_id: &str,
        since: Option<MonthKey>,
    ) -> Result<HashMap<MonthKey, u64>> {
        let conn = self.conn.lock().await;
        let mut usage: HashMap<MonthKey, u64> = HashMap::new();
        for legacy in [true, false] {
            for (month, count) in usage_by_month(&conn, organization_id, since, legacy)? {
                let month: MonthKey = month.parse()?;
                *usage.entry(month).or_default() += count.max(0) as u64;
            }
        }
        Ok(usage)
    }

    /// Insert a batch of canonical events in a single transaction.
    ///
    /// Returns immediately (no-op) if `events` is empty.
    pub async fn insert_canonical_events(&self, events: &[CanonicalEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO events (
                    site_id, "timestamp", session_id, user_id,
                    hostname, pathname, querystring, url_parameters, page_title,
                    referrer, channel,
                    browser, browser_version, operating_system, operating_system_version,
                    language, country, region, city,
                    screen_width, screen_height, device_type,
                    "type", event_name, props, import_id
                ) VALUES (
                    ?1, CAST(?2 AS TIMESTAMP), ?3, ?4,
                    ?5, ?6, ?7, ?8, ?9,
                    ?10, ?11,
                    ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19,
                    ?20, ?21, ?22,
                    ?23, ?24, ?25, ?26
                )"#,
            )?;
            for event in events {
                stmt.execute(duckdb::params![
                    event.site_id,
                    event.timestamp,
                    event.session_id,
                    event.user_id,
                    event.hostname,
                    event.pathname,
                    event.querystring,
                    event.url_parameters_json()?,
                    event.page_title,
                    event.referrer,
                    event.channel,
                    event.browser,
                    event.browser_version,
                    event.operating_system,
                    event.operating_system_version,
                    event.language,
                    event.country,
                    event.region,
                    event.city,
                    event.screen_width,
                    event.screen_height,
                    event.device_type,
                    event.event_type.as_str(),
                    event.event_name,
                    event.props_json(),
                    event.import_id,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(count = events.len(), "Inserted canonical events");
        Ok(())
    }

    /// Number of stored events produced by one import.
    pub async fn count_import_events(&self, import_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .prepare("SELECT COUNT(*) FROM events WHERE import_id = ?1")?
            .query_row(duckdb::params![import_id], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
