//! Postgres probe: connects and calls the configured health-check function.
//!
//! `spec.md`'s original design is a hand-rolled non-blocking libpq state
//! machine with an explicit reschedule-count safety valve (see
//! `config::defaults::POSTGRES_MAX_STEP_RESCHEDULES`). Its own §9 design
//! notes bless a reactor/task-based equivalent as long as the rest of the
//! system stays non-blocking end to end, which `tokio-postgres` is — the
//! connection future is driven on the same executor as every other probe,
//! so the manual step/reschedule loop has no remaining purpose here.

use super::{Outcome, ProbeSpec};

pub async fn run(spec: &ProbeSpec, dbname: &str, user: &str, function: &str) -> Outcome {
    let host = spec.address.to_string();
    let config = format!(
        "host={host} port={} dbname={dbname} user={user} connect_timeout=1 \
         client_encoding=UTF8 application_name=lbhealthd",
        spec.port
    );

    let (client, connection) = match tokio_postgres::connect(&config, tokio_postgres::NoTls).await
    {
        Ok(pair) => pair,
        Err(e) => return Outcome::Fail(format!("connect failed: {e}")),
    };

    // The connection future must be polled for the client to make progress;
    // spawn it locally for the lifetime of this probe only.
    let driver = tokio::spawn(async move {
        let _ = connection.await;
    });

    let query = format!("SELECT {function}()");
    let outcome = match client.simple_query(&query).await {
        Ok(messages) => interpret_result(&messages),
        Err(e) => Outcome::Fail(format!("query failed: {e}")),
    };

    driver.abort();
    outcome
}

/// `spec.md` §4.2 requires exactly one row of one text column, equal to
/// the single character `t` (Pass) or `f` (Fail); anything else is Fail.
fn interpret_result(messages: &[tokio_postgres::SimpleQueryMessage]) -> Outcome {
    let rows: Vec<&tokio_postgres::SimpleQueryRow> = messages
        .iter()
        .filter_map(|m| match m {
            tokio_postgres::SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect();

    let row = match rows.as_slice() {
        [row] => *row,
        other => return Outcome::Fail(format!("expected exactly one row, got {}", other.len())),
    };
    if row.len() != 1 {
        return Outcome::Fail(format!("expected exactly one column, got {}", row.len()));
    }
    match row.get(0) {
        Some("t") => Outcome::Pass,
        Some("f") => Outcome::Fail("function returned false".to_string()),
        Some(other) => Outcome::Fail(format!("unexpected result value: {other}")),
        None => Outcome::Fail("result column was NULL".to_string()),
    }
}
