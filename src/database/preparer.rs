use super::Database;
use anyhow::Result;
use futures::TryStreamExt;
use log::debug;
use scylla::{
    deserialize::row::DeserializeRow, response::query_result::QueryResult,
    serialize::row::SerializeRow, statement::prepared::PreparedStatement,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A statement prepared lazily on first use and reused afterwards.
///
/// The prepared form is tied to the keyspace of the session that prepared it. Statics are shared
/// by every session of the process (tests each run against their own keyspace), so a session on
/// another keyspace prepares again.
pub struct CachedPreparedStatement {
    statement: &'static str,
    prepared: Mutex<Option<(Option<Arc<String>>, PreparedStatement)>>,
}

impl CachedPreparedStatement {
    pub const fn new(statement: &'static str) -> Self {
        Self {
            statement,
            prepared: Mutex::const_new(None),
        }
    }

    pub async fn get_prepared_statement(&self, db: &Database) -> Result<PreparedStatement> {
        let keyspace = db.get_keyspace();
        let mut lock = self.prepared.lock().await;

        if let Some((prepared_for, prepared)) = &*lock
            && *prepared_for == keyspace
        {
            return Ok(prepared.clone());
        }

        debug!(
            "Preparing statement for keyspace {:?}: {}",
            keyspace.as_deref(),
            self.statement.split_whitespace().collect::<Vec<_>>().join(" ")
        );
        let prepared = db.prepare(self.statement).await?;
        *lock = Some((keyspace, prepared.clone()));

        Ok(prepared)
    }

    pub async fn optimistically_prepare(&self, db: &Database) -> Result<()> {
        self.get_prepared_statement(db).await?;
        Ok(())
    }

    /// Single page execution, for statements returning a handful of rows.
    pub async fn execute_unpaged(
        &self,
        db: &Database,
        values: impl SerializeRow,
    ) -> Result<QueryResult> {
        let prepared = self.get_prepared_statement(db).await?;

        db.execute_unpaged(&prepared, &values)
            .await
            .map_err(Into::into)
    }

    /// Every row of the result, fetched page by page.
    pub async fn query_all<R>(&self, db: &Database, values: impl SerializeRow) -> Result<Vec<R>>
    where
        R: for<'frame, 'metadata> DeserializeRow<'frame, 'metadata> + 'static,
    {
        let prepared = self.get_prepared_statement(db).await?;

        let rows = db
            .execute_iter(prepared, values)
            .await?
            .rows_stream::<R>()?
            .try_collect()
            .await?;

        Ok(rows)
    }
}
