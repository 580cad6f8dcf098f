//! Backend construction from gateway configuration.

use datastream_core::{PollSettings, Result};
use datastream_storage::{
    Backend, BucketStore, GitConfig, GitStore, ObjectStoreConfig, RelationalConfig,
    RelationalStore,
};

use crate::config::BackendSettings;

/// Open the backend described by `settings`.
///
/// Construction failures (unreachable repository, missing table, bad
/// bucket) surface here, before the gateway starts listening.
pub async fn open_backend(settings: &BackendSettings, poll: PollSettings) -> Result<Backend> {
    match settings.clone() {
        BackendSettings::Git {
            repo,
            clone_dir,
            branch,
            username,
            password,
        } => {
            let mut config = GitConfig::new(repo).with_poll_settings(poll);
            if let Some(dir) = clone_dir {
                config = config.with_clone_dir(dir);
            }
            if let Some(branch) = branch {
                config = config.with_branch(branch);
            }
            if let Some(password) = password {
                config = config.with_credentials(username.unwrap_or_default(), password);
            }
            // Cloning is blocking network I/O.
            let store = tokio::task::spawn_blocking(move || GitStore::open(config)).await??;
            Ok(Backend::Git(store))
        }
        BackendSettings::S3 {
            endpoint,
            region,
            bucket,
            access_key_id,
            secret_access_key,
            allow_http,
        } => {
            let mut config = ObjectStoreConfig::new(bucket)
                .with_region(region)
                .with_poll_settings(poll);
            if let Some(endpoint) = endpoint {
                config = config.with_endpoint(endpoint);
            }
            if allow_http {
                config = config.with_allow_http(true);
            }
            if let (Some(key), Some(secret)) = (access_key_id, secret_access_key) {
                config = config.with_credentials(key, secret);
            }
            Ok(Backend::Object(BucketStore::connect(config).await?))
        }
        BackendSettings::Sqlite { path, table } => {
            let config = RelationalConfig::new(table).with_poll_settings(poll);
            let store = tokio::task::spawn_blocking(move || {
                RelationalStore::open_sqlite(path, config)
            })
            .await??;
            Ok(Backend::Relational(store))
        }
        BackendSettings::Postgres { url, table } => open_postgres(&url, table, poll).await,
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(url: &str, table: String, poll: PollSettings) -> Result<Backend> {
    let config = RelationalConfig::new(table).with_poll_settings(poll);
    Ok(Backend::Relational(
        RelationalStore::connect_postgres(url, config).await?,
    ))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_url: &str, _table: String, _poll: PollSettings) -> Result<Backend> {
    Err(datastream_core::Error::Config(
        "this gateway was built without the postgres feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastream_core::{Error, Store};

    #[tokio::test]
    async fn test_open_sqlite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE data (key TEXT PRIMARY KEY, value BLOB, value_type TEXT, updated_at TEXT)",
            )
            .unwrap();

        let backend = open_backend(
            &BackendSettings::Sqlite {
                path,
                table: "data".to_string(),
            },
            PollSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(backend.name(), "relational");
    }

    #[tokio::test]
    async fn test_open_missing_repository() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = open_backend(
            &BackendSettings::Git {
                repo: "/definitely/not/a/repository".to_string(),
                clone_dir: Some(dir.path().join("clone")),
                branch: None,
                username: None,
                password: None,
            },
            PollSettings::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
