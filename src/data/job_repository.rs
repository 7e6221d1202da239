use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use crate::error::AppError;
use crate::models::job::{
    EnqueueOutcome, Job, JobCounts, JobFilter, JobPayload, JobStatus, WorkType,
};

const JOB_COLUMNS: &str = "id, type, media_id, status, priority, payload, error, created_at_ms,
    started_at_ms, finished_at_ms";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(3, "status".to_string(), Type::Text))?;

    Ok(Job {
        id: row.get(0)?,
        work_type: row.get(1)?,
        media_id: row.get(2)?,
        status,
        priority: row.get(4)?,
        payload: row.get(5)?,
        error: row.get(6)?,
        created_at_ms: row.get(7)?,
        started_at_ms: row.get(8)?,
        finished_at_ms: row.get(9)?,
    })
}

fn queued_job_id(conn: &Connection, media_id: &str, work_type: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM jobs WHERE media_id = ?1 AND type = ?2 AND status = 'queued'",
        params![media_id, work_type],
        |row| row.get(0),
    )
    .optional()
}

/// Inserts a queued job, or refreshes the snapshot of the one already queued for the same
/// media and work type.
pub fn enqueue(
    conn: &Connection,
    payload: &JobPayload,
    priority: i64,
    now_ms: i64,
) -> Result<EnqueueOutcome, AppError> {
    let work_type = payload.work_type().as_str();
    let media_id = payload.media_id();
    let payload_json = serde_json::to_string(payload)?;

    let tx = conn.unchecked_transaction()?;
    let outcome = match queued_job_id(&tx, media_id, work_type)? {
        Some(id) => {
            tx.execute(
                "UPDATE jobs SET payload = ?2, priority = ?3 WHERE id = ?1",
                params![id, payload_json, priority],
            )?;
            EnqueueOutcome::Refreshed(id)
        }
        None => {
            tx.execute(
                "INSERT INTO jobs (type, media_id, status, priority, payload, created_at_ms)
                 VALUES (?1, ?2, 'queued', ?3, ?4, ?5)",
                params![work_type, media_id, priority, payload_json, now_ms],
            )?;
            EnqueueOutcome::Inserted(tx.last_insert_rowid())
        }
    };
    tx.commit()?;
    Ok(outcome)
}

pub fn has_queued(conn: &Connection, media_id: &str, work_type: WorkType) -> Result<bool, AppError> {
    Ok(queued_job_id(conn, media_id, work_type.as_str())?.is_some())
}

/// Whether a running job for the same media and work type carries exactly `payload`.
pub fn is_running_with(conn: &Connection, payload: &JobPayload) -> Result<bool, AppError> {
    let mut stmt = conn.prepare(
        "SELECT payload FROM jobs WHERE media_id = ?1 AND type = ?2 AND status = 'running'",
    )?;
    let running = stmt
        .query_map(
            params![payload.media_id(), payload.work_type().as_str()],
            |row| row.get::<_, String>(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(running.iter().any(|raw| {
        serde_json::from_str::<JobPayload>(raw)
            .map(|other| &other == payload)
            .unwrap_or(false)
    }))
}

/// Claims the highest-priority, oldest queued job and marks it running.
pub fn dequeue_next(conn: &Connection, now_ms: i64) -> Result<Option<Job>, AppError> {
    let tx = conn.unchecked_transaction()?;
    let next: Option<i64> = tx
        .query_row(
            "SELECT id FROM jobs WHERE status = 'queued'
             ORDER BY priority DESC, created_at_ms ASC, id ASC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let Some(id) = next else {
        return Ok(None);
    };

    let claimed = tx.execute(
        "UPDATE jobs SET status = 'running', started_at_ms = ?2
         WHERE id = ?1 AND status = 'queued'",
        params![id, now_ms],
    )?;
    if claimed == 0 {
        return Ok(None);
    }

    let job = tx.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![id],
        job_from_row,
    )?;
    tx.commit()?;
    Ok(Some(job))
}

pub fn get_job(conn: &Connection, id: i64) -> Result<Option<Job>, AppError> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

fn finish(
    conn: &Connection,
    id: i64,
    status: JobStatus,
    error: Option<&str>,
    now_ms: i64,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE jobs SET status = ?2, error = ?3, finished_at_ms = ?4 WHERE id = ?1",
        params![id, status.as_str(), error, now_ms],
    )?;
    Ok(count)
}

pub fn mark_done(conn: &Connection, id: i64, now_ms: i64) -> Result<usize, AppError> {
    finish(conn, id, JobStatus::Done, None, now_ms)
}

pub fn mark_error(conn: &Connection, id: i64, message: &str, now_ms: i64) -> Result<usize, AppError> {
    finish(conn, id, JobStatus::Error, Some(message), now_ms)
}

pub fn mark_canceled(conn: &Connection, id: i64, now_ms: i64) -> Result<usize, AppError> {
    finish(conn, id, JobStatus::Canceled, None, now_ms)
}

pub fn cancel_queued_for_media(conn: &Connection, media_id: &str, now_ms: i64) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE jobs SET status = 'canceled', finished_at_ms = ?2
         WHERE media_id = ?1 AND status = 'queued'",
        params![media_id, now_ms],
    )?;
    Ok(count)
}

/// Returns jobs left `running` by a previous process to the queue. Where a queued job for
/// the same media and work type exists, or a newer running one does, the interrupted row is
/// canceled instead so the one-queued-per-pair rule holds.
pub fn requeue_interrupted(conn: &Connection, now_ms: i64) -> Result<usize, AppError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE jobs SET status = 'canceled', finished_at_ms = ?1,
             error = 'interrupted; superseded by a newer job'
         WHERE status = 'running' AND EXISTS (
             SELECT 1 FROM jobs other
             WHERE other.media_id = jobs.media_id AND other.type = jobs.type
               AND (other.status = 'queued' OR (other.status = 'running' AND other.id > jobs.id))
         )",
        params![now_ms],
    )?;
    let requeued = tx.execute(
        "UPDATE jobs SET status = 'queued', started_at_ms = NULL WHERE status = 'running'",
        [],
    )?;
    tx.commit()?;
    Ok(requeued)
}

pub fn list_jobs(conn: &Connection, filter: &JobFilter) -> Result<Vec<Job>, AppError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Box::new(status.as_str()));
    }
    if let Some(work_type) = filter.work_type {
        clauses.push("type = ?");
        values.push(Box::new(work_type.as_str()));
    }
    if let Some(media_id) = &filter.media_id {
        clauses.push("media_id = ?");
        values.push(Box::new(media_id.clone()));
    }

    let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY id ASC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            job_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(jobs)
}

pub fn counts(conn: &Connection) -> Result<JobCounts, AppError> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut counts = JobCounts::default();
    for (status, count) in rows {
        let count = count as usize;
        match status.parse::<JobStatus>() {
            Ok(JobStatus::Queued) => counts.queued = count,
            Ok(JobStatus::Running) => counts.running = count,
            Ok(JobStatus::Done) => counts.done = count,
            Ok(JobStatus::Error) => counts.error = count,
            Ok(JobStatus::Canceled) => counts.canceled = count,
            Err(_) => {}
        }
    }
    Ok(counts)
}

pub fn prune_finished(conn: &Connection, older_than_ms: i64) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM jobs
         WHERE status IN ('done', 'error', 'canceled') AND finished_at_ms < ?1",
        params![older_than_ms],
    )?;
    Ok(count)
}
