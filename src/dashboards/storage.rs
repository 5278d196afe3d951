//! Aggregations over tickets, always bound to one tenant and a creation range.

use diesel::prelude::*;
use diesel::sql_types::{Timestamptz, Uuid as SqlUuid};
use uuid::Uuid;

use super::types::{DateRange, DayCount, QueueCount, StatusCount, UserCount};

pub fn tickets_by_status(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    range: DateRange,
) -> QueryResult<Vec<StatusCount>> {
    diesel::sql_query(
        "SELECT status, COUNT(*) AS count FROM tickets
         WHERE tenant_id = $1 AND created_at >= $2 AND created_at < $3
         GROUP BY status ORDER BY status",
    )
    .bind::<SqlUuid, _>(tenant_id)
    .bind::<Timestamptz, _>(range.from)
    .bind::<Timestamptz, _>(range.to)
    .load(conn)
}

pub fn tickets_by_queue(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    range: DateRange,
) -> QueryResult<Vec<QueueCount>> {
    diesel::sql_query(
        "SELECT t.queue_id, q.name AS queue_name,
                COUNT(*) FILTER (WHERE t.status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE t.status = 'open') AS open,
                COUNT(*) FILTER (WHERE t.status = 'closed') AS closed
         FROM tickets t LEFT JOIN queues q ON q.id = t.queue_id
         WHERE t.tenant_id = $1 AND t.created_at >= $2 AND t.created_at < $3
         GROUP BY t.queue_id, q.name ORDER BY q.name NULLS FIRST",
    )
    .bind::<SqlUuid, _>(tenant_id)
    .bind::<Timestamptz, _>(range.from)
    .bind::<Timestamptz, _>(range.to)
    .load(conn)
}

pub fn tickets_by_user(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    range: DateRange,
) -> QueryResult<Vec<UserCount>> {
    diesel::sql_query(
        "SELECT u.id AS user_id, u.name AS user_name,
                COUNT(*) FILTER (WHERE t.status = 'open') AS open,
                COUNT(*) FILTER (WHERE t.status = 'closed') AS closed
         FROM tickets t JOIN users u ON u.id = t.user_id
         WHERE t.tenant_id = $1 AND t.created_at >= $2 AND t.created_at < $3
         GROUP BY u.id, u.name ORDER BY u.name",
    )
    .bind::<SqlUuid, _>(tenant_id)
    .bind::<Timestamptz, _>(range.from)
    .bind::<Timestamptz, _>(range.to)
    .load(conn)
}

pub fn tickets_per_day(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    range: DateRange,
) -> QueryResult<Vec<DayCount>> {
    diesel::sql_query(
        "SELECT (created_at AT TIME ZONE 'UTC')::date AS day, COUNT(*) AS count
         FROM tickets
         WHERE tenant_id = $1 AND created_at >= $2 AND created_at < $3
         GROUP BY day ORDER BY day",
    )
    .bind::<SqlUuid, _>(tenant_id)
    .bind::<Timestamptz, _>(range.from)
    .bind::<Timestamptz, _>(range.to)
    .load(conn)
}
