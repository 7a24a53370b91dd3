use chrono::Duration;
use portcullis::{PortcullisBuilder, PortcullisBuilderError, ProtectionConfig};

#[tokio::test]
async fn test_memory_builder_defaults() {
    let portcullis = PortcullisBuilder::new()
        .with_memory_store()
        .build()
        .await
        .unwrap();

    let config = portcullis.config();
    assert!(config.enabled);
    assert_eq!(config.account_threshold, 5);
    assert_eq!(config.account_lock_duration, Duration::minutes(15));
    assert_eq!(config.address_threshold, 100);
    assert_eq!(config.address_block_duration, None);

    portcullis.migrate().await.unwrap();
    portcullis.health_check().await.unwrap();
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let result = PortcullisBuilder::new()
        .with_memory_store()
        .with_config(ProtectionConfig::default().with_account_threshold(0))
        .build()
        .await;

    assert!(matches!(
        result,
        Err(PortcullisBuilderError::InvalidConfiguration(_))
    ));
}

#[tokio::test]
async fn test_negative_retention_is_rejected() {
    let result = PortcullisBuilder::new()
        .with_memory_store()
        .with_config(ProtectionConfig::default().with_retention_period(Duration::days(-1)))
        .build()
        .await;

    assert!(matches!(
        result,
        Err(PortcullisBuilderError::InvalidConfiguration(_))
    ));
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_builder_with_migrations() {
    let portcullis = PortcullisBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .unwrap()
        .apply_migrations(true)
        .build()
        .await
        .unwrap();

    // Migrations are idempotent
    portcullis.migrate().await.unwrap();

    let status = portcullis
        .guard()
        .account_status("alice@example.com")
        .await
        .unwrap();
    assert_eq!(status.failed_count, 0);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_connection_failure() {
    let result = PortcullisBuilder::new()
        .with_sqlite("sqlite:///nonexistent-dir/for/portcullis.db")
        .await;

    assert!(matches!(
        result,
        Err(PortcullisBuilderError::StorageConnection(_))
    ));
}
