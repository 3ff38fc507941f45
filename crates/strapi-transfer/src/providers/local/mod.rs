//! Local instance provider.
//!
//! The instance itself is reached through a [`ContentStore`]; this crate
//! ships [`DirectoryStore`], which keeps an instance's data in a directory.

pub mod destination;
pub mod source;
pub mod store;

pub use destination::{LocalDestination, LocalDestinationOptions};
pub use source::LocalSource;
pub use store::{ContentStore, DirectoryStore, EntityKey};

/// Provider name used in diagnostics.
pub const PROVIDER_NAME: &str = "local-strapi";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Asset, AssetStats, ConfigurationItem, ConfigurationKind, DestinationProvider, Entity,
        Provider, ProviderMetadata, SourceProvider, StageRecord, TransferStage,
    };
    use crate::diagnostics::{DiagnosticKind, DiagnosticsBus};
    use crate::engine::TransferGroupFilter;
    use crate::error::{ErrorCode, TransferError};
    use crate::strategy::{ConflictStrategy, RestoreConfiguration};
    use bytes::Bytes;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    fn entity(content_type: &str, id: i64) -> StageRecord {
        StageRecord::Entity(Entity {
            content_type: content_type.into(),
            id,
            data: json!({"id": id}),
        })
    }

    fn asset(name: &str) -> StageRecord {
        StageRecord::Asset(Asset {
            filename: name.into(),
            filepath: format!("/uploads/{}", name),
            stats: AssetStats { size: 2 },
            metadata: None,
            data: Bytes::from_static(b"hi"),
        })
    }

    async fn seeded(dir: &Path) -> Arc<DirectoryStore> {
        let store = Arc::new(DirectoryStore::new(dir));
        store.open(true).await.unwrap();
        store
            .set_metadata(&ProviderMetadata::with_version("4.15.0"))
            .await
            .unwrap();
        store
            .append(
                TransferStage::Entities,
                &[entity("api::a.a", 1), entity("admin::user", 1)],
            )
            .await
            .unwrap();
        store
            .append(
                TransferStage::Configuration,
                &[StageRecord::Configuration(ConfigurationItem {
                    kind: ConfigurationKind::Webhook,
                    value: json!({}),
                })],
            )
            .await
            .unwrap();
        store
            .put_asset(&match asset("old.png") {
                StageRecord::Asset(a) => a,
                _ => unreachable!(),
            })
            .await
            .unwrap();
        store
    }

    fn destination(store: Arc<DirectoryStore>, strategy: ConflictStrategy) -> LocalDestination {
        LocalDestination::new(
            store,
            LocalDestinationOptions {
                strategy,
                restore: RestoreConfiguration::default(),
            },
        )
    }

    async fn write_all(dest: &mut LocalDestination, stage: TransferStage, records: Vec<StageRecord>) {
        assert!(dest.start_stage(stage).await.unwrap());
        for record in records {
            dest.write(record).await.unwrap();
        }
        dest.finish_stage(stage).await.unwrap();
    }

    // ===== Source =====

    #[tokio::test]
    async fn test_source_reads_seeded_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path()).await;
        let mut source = LocalSource::new(store);
        source.bootstrap().await.unwrap();

        let metadata = source.get_metadata().await.unwrap().unwrap();
        assert_eq!(metadata.version(), Some("4.15.0"));

        let mut rx = source.stream(TransferStage::Media).await.unwrap().unwrap();
        let StageRecord::Asset(a) = rx.recv().await.unwrap().unwrap() else {
            panic!("expected an asset");
        };
        assert_eq!(a.data, Bytes::from_static(b"hi"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_source_missing_directory_fails_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DirectoryStore::new(dir.path().join("nope")));
        let err = LocalSource::new(store).bootstrap().await.unwrap_err();
        assert!(matches!(err, TransferError::ProviderInitialization { .. }));
    }

    // ===== Destination =====

    #[tokio::test]
    async fn test_destination_declines_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let mut dest = destination(Arc::new(DirectoryStore::new(dir.path())), ConflictStrategy::Additive);
        dest.bootstrap().await.unwrap();
        assert!(!dest.start_stage(TransferStage::Schemas).await.unwrap());
    }

    #[tokio::test]
    async fn test_additive_rejects_existing_entity() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path()).await;
        let mut dest = destination(store, ConflictStrategy::Additive);
        dest.bootstrap().await.unwrap();
        dest.before_transfer().await.unwrap();

        assert!(dest.start_stage(TransferStage::Entities).await.unwrap());
        dest.write(entity("api::a.a", 2)).await.unwrap();
        let err = dest.write(entity("api::a.a", 1)).await.unwrap_err();
        assert!(matches!(err, TransferError::Transfer { .. }));
    }

    #[tokio::test]
    async fn test_restore_wipes_in_scope_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path()).await;
        let mut dest = destination(store.clone(), ConflictStrategy::Restore);
        dest.bootstrap().await.unwrap();
        dest.before_transfer().await.unwrap();

        write_all(&mut dest, TransferStage::Entities, vec![entity("api::a.a", 1)]).await;
        write_all(&mut dest, TransferStage::Media, vec![asset("new.png")]).await;
        dest.close().await.unwrap();

        let keys = store.entity_keys().await.unwrap();
        assert!(keys.contains(&("admin::user".to_string(), 1)));
        assert!(keys.contains(&("api::a.a".to_string(), 1)));

        let uploads = dir.path().join("uploads");
        assert!(uploads.join("new.png").is_file());
        assert!(!uploads.join("old.png").exists());
        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("uploads_backup_")
            })
            .count();
        assert_eq!(backups, 0);
    }

    #[tokio::test]
    async fn test_restore_only_content_keeps_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path()).await;
        let mut dest = LocalDestination::new(
            store.clone(),
            LocalDestinationOptions {
                strategy: ConflictStrategy::Restore,
                restore: RestoreConfiguration::from_filters(&[], &[TransferGroupFilter::Content]),
            },
        );
        dest.bootstrap().await.unwrap();
        dest.before_transfer().await.unwrap();

        let mut rx = store.stream(TransferStage::Configuration).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert!(store.entity_keys().await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_interrupted_media_stage_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path()).await;
        let bus = DiagnosticsBus::new();
        let mut diagnostics = bus.subscribe();

        let mut dest = destination(store, ConflictStrategy::Restore);
        dest.set_warning_reporter(bus.reporter("destination::local-strapi"));
        dest.bootstrap().await.unwrap();
        assert!(dest.start_stage(TransferStage::Media).await.unwrap());
        dest.close().await.unwrap();

        let warning = diagnostics.recv().await.unwrap();
        assert_eq!(warning.kind, DiagnosticKind::Warning);
        assert!(warning.message().contains("previous assets were kept"));
    }

    #[tokio::test]
    async fn test_backup_failure_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DirectoryStore::new(dir.path()));
        let mut dest = destination(store, ConflictStrategy::Restore);
        dest.bootstrap().await.unwrap();

        std::fs::remove_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads"), b"file").unwrap();

        let err = dest.start_stage(TransferStage::Media).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::AssetsDirectory));
    }
}
