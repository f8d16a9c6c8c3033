use crate::database::{connect_db_optional_ks, parse_database_urls};
use crate::eager_env::DATABASE_NODE_URLS;
use anyhow::Result;
use include_dir::{Dir, include_dir};
use rand::{Rng, rng};
use scylla::client::session::Session;

static MIGRATIONS_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

pub fn get_migrations() -> Vec<(String, String)> {
    let mut migrations: Vec<_> = MIGRATIONS_DIR
        .files()
        .map(|file| {
            (
                file.path().to_str().expect("valid utf8").to_string(),
                file.contents_utf8().expect("valid utf8").to_string(),
            )
        })
        .collect();
    migrations.sort();
    migrations
}

async fn run_statements(session: &Session, source: &str, content: &str) -> Result<()> {
    for statement in content.split(';').filter(|s| !s.trim().is_empty()) {
        session
            .query_unpaged(statement.trim(), &[])
            .await
            .map_err(|e| anyhow::anyhow!("Statement failed for {}: {}", source, e))?;
    }

    Ok(())
}

// Test database setup utilities
//
// Returns a `Session` bound to a fresh keyspace and the keyspace name
pub async fn create_test_database(fixtures: Option<&str>) -> Result<(Session, String)> {
    let keyspace_name = format!("test_ks_{}", rng().random::<u32>());

    let database_urls = parse_database_urls(&DATABASE_NODE_URLS);
    let session = connect_db_optional_ks(&database_urls, None).await?;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                keyspace_name
            ),
            &[],
        )
        .await?;

    session.use_keyspace(&keyspace_name, true).await?;

    for (file, content) in get_migrations() {
        run_statements(&session, &file, &content).await?;
    }

    if let Some(fixtures) = fixtures {
        run_statements(&session, "fixtures", fixtures).await?;
    }

    Ok((session, keyspace_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_bundled() {
        let migrations = get_migrations();
        assert!(!migrations.is_empty());
        assert!(
            migrations
                .iter()
                .any(|(_, content)| content.contains("node_registrations"))
        );
    }

    #[tokio::test]
    #[ignore = "requires a running Scylla cluster"]
    async fn cleanup_test_keyspaces() -> Result<()> {
        let database_urls = parse_database_urls(&DATABASE_NODE_URLS);
        let session = connect_db_optional_ks(&database_urls, None).await?;

        let rows = session
            .query_unpaged("SELECT keyspace_name FROM system_schema.keyspaces", &[])
            .await?
            .into_rows_result()?;

        for row in rows.rows::<(String,)>()? {
            let (keyspace_name,) = row?;
            if keyspace_name.starts_with("test_") {
                println!("Dropping keyspace: {}", keyspace_name);
                session
                    .query_unpaged(format!("DROP KEYSPACE IF EXISTS {}", keyspace_name), &[])
                    .await?;
            }
        }

        Ok(())
    }
}
