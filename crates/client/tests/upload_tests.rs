mod common;

use common::{CancelAfter, CountingGate, MockBehavior, MockProvider, seeded_bytes, test_config};
use depot_client::payment::PaymentRequirements;
use depot_client::{
    BytesSource, StaticPaymentGate, StoreProvider, StreamSource, TransferStage, UploadError,
    UploadManager, UploadOptions,
};
use depot_core::config::{PaymentConfig, TransferConfig};
use depot_core::{ObjectMetadata, ObjectRecord, PieceCid};
use depot_storage::{FilesystemBackend, MemoryBackend, ObjectStore};
use futures::TryStreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn requirements() -> PaymentRequirements {
    PaymentRequirements::from_config(&PaymentConfig::default())
}

fn manager_with(config: TransferConfig, gate: Arc<CountingGate>) -> UploadManager {
    UploadManager::new(config, gate, requirements())
}

#[tokio::test]
async fn upload_then_read_back() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
    let manager = manager_with(test_config(), Arc::new(CountingGate::funded()))
        .with_provider(Arc::new(StoreProvider::new("local", Arc::clone(&store))));
    let data = seeded_bytes(7, 1_000_000);
    let metadata = ObjectMetadata::from_pairs([("owner", "alice")]).unwrap();

    let receipt = manager
        .upload(
            BytesSource::new(data.clone()),
            Some(data.len() as u64),
            metadata,
            &UploadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(receipt.identifier, PieceCid::compute(&data).unwrap());
    assert_eq!(receipt.size, 1_000_000);
    assert_eq!(receipt.provider, "local");
    assert_eq!(receipt.attempts, 1);

    let stored = store.get(&receipt.identifier.object_key()).await.unwrap();
    assert_eq!(stored, data);
    let record = ObjectRecord::from_json(
        &store.get(&receipt.identifier.record_key()).await.unwrap(),
    )
    .unwrap();
    assert_eq!(record.metadata.get("owner"), Some("alice"));
}

#[tokio::test]
async fn size_bounds_fail_before_any_io() {
    let gate = Arc::new(CountingGate::funded());
    let provider = Arc::new(MockProvider::new("mock", MockBehavior::Accept));
    let manager = manager_with(test_config(), gate.clone()).with_provider(provider.clone());

    for size in [0usize, 126, 200 * 1024 * 1024 + 1] {
        let err = manager
            .upload(
                BytesSource::new(vec![0u8; size.min(1024)]),
                Some(size as u64),
                ObjectMetadata::new(),
                &UploadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, UploadError::InvalidSize { size: s, min: 127, .. } if s == size as u64),
            "{err}"
        );
    }

    assert_eq!(gate.calls(), 0);
    assert_eq!(provider.negotiations(), 0);
    assert_eq!(provider.opens(), 0);
}

#[tokio::test]
async fn minimum_size_object_is_accepted() {
    let provider = Arc::new(MockProvider::new("mock", MockBehavior::Accept));
    let manager =
        manager_with(test_config(), Arc::new(CountingGate::funded())).with_provider(provider.clone());

    let receipt = manager
        .upload(
            BytesSource::new(vec![0u8; 127]),
            Some(127),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        receipt.identifier.to_string(),
        PieceCid::compute(&[0u8; 127]).unwrap().to_string()
    );
    let (record, bytes) = provider.committed().unwrap();
    assert_eq!(record.identifier, receipt.identifier);
    assert_eq!(bytes.len(), 127);
}

#[tokio::test]
async fn unfunded_account_fails_before_negotiation() {
    let gate = Arc::new(CountingGate {
        balance: 0,
        ..CountingGate::funded()
    });
    let provider = Arc::new(MockProvider::new("mock", MockBehavior::Accept));
    let manager = manager_with(test_config(), gate).with_provider(provider.clone());

    let err = manager
        .upload(
            BytesSource::new(vec![1u8; 500]),
            Some(500),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::PaymentNotReady(_)));
    assert_eq!(provider.negotiations(), 0);
}

#[tokio::test]
async fn unapproved_operator_fails_before_negotiation() {
    let payment = PaymentConfig {
        approved: false,
        ..PaymentConfig::for_testing()
    };
    let provider = Arc::new(MockProvider::new("mock", MockBehavior::Accept));
    let manager = UploadManager::new(
        test_config(),
        Arc::new(StaticPaymentGate::from_config(&payment)),
        PaymentRequirements::from_config(&payment),
    )
    .with_provider(provider.clone());

    let err = manager
        .upload(
            BytesSource::new(vec![1u8; 500]),
            Some(500),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "payment_not_ready");
    assert_eq!(provider.negotiations(), 0);
}

#[tokio::test]
async fn providers_are_tried_in_order_once_each() {
    let failing = Arc::new(MockProvider::new("first", MockBehavior::Error));
    let declining = Arc::new(MockProvider::new("second", MockBehavior::Decline));
    let accepting = Arc::new(MockProvider::new("third", MockBehavior::Accept));
    let manager = manager_with(test_config(), Arc::new(CountingGate::funded()))
        .with_provider(failing.clone())
        .with_provider(declining.clone())
        .with_provider(accepting.clone());

    let receipt = manager
        .upload(
            BytesSource::new(vec![2u8; 1000]),
            Some(1000),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(receipt.provider, "third");
    assert_eq!(failing.negotiations(), 1);
    assert_eq!(declining.negotiations(), 1);
    assert_eq!(accepting.negotiations(), 1);
    assert_eq!(failing.opens() + declining.opens(), 0);
}

#[tokio::test]
async fn no_provider_available_is_not_retried() {
    let a = Arc::new(MockProvider::new("a", MockBehavior::Decline));
    let b = Arc::new(MockProvider::new("b", MockBehavior::Error));
    let manager = manager_with(test_config(), Arc::new(CountingGate::funded()))
        .with_provider(a.clone())
        .with_provider(b.clone());

    let err = manager
        .upload(
            BytesSource::new(vec![2u8; 1000]),
            Some(1000),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::NoProviderAvailable { tried: 2 }));
    assert_eq!(a.negotiations(), 1);
    assert_eq!(b.negotiations(), 1);
}

#[tokio::test(start_paused = true)]
async fn negotiation_times_out() {
    let hanging = Arc::new(MockProvider::new("slow", MockBehavior::Hang));
    let manager =
        manager_with(test_config(), Arc::new(CountingGate::funded())).with_provider(hanging.clone());

    let err = manager
        .upload(
            BytesSource::new(vec![2u8; 1000]),
            Some(1000),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::NoProviderAvailable { tried: 1 }));
    assert_eq!(hanging.opens(), 0);
}

#[tokio::test]
async fn transient_failures_are_retried_with_same_identifier() {
    let provider = Arc::new(MockProvider::flaky("mock", 2));
    let manager =
        manager_with(test_config(), Arc::new(CountingGate::funded())).with_provider(provider.clone());
    let data = seeded_bytes(3, 300_000);

    let receipt = manager
        .upload(
            BytesSource::new(data.clone()),
            Some(data.len() as u64),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(receipt.attempts, 3);
    assert_eq!(provider.opens(), 3);
    assert_eq!(provider.aborts(), 2);
    assert_eq!(receipt.identifier, PieceCid::compute(&data).unwrap());
    let (_, bytes) = provider.committed().unwrap();
    assert_eq!(bytes, data);
}

#[tokio::test]
async fn retries_stop_at_the_limit() {
    let provider = Arc::new(MockProvider::flaky("mock", 10));
    let manager =
        manager_with(test_config(), Arc::new(CountingGate::funded())).with_provider(provider.clone());

    let err = manager
        .upload(
            BytesSource::new(seeded_bytes(4, 200_000)),
            Some(200_000),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::TransferFailed {
            stage: TransferStage::Write,
            ..
        }
    ));
    assert_eq!(provider.opens(), 4);
    assert_eq!(provider.aborts(), 4);
    assert!(provider.committed().is_none());
}

#[tokio::test]
async fn non_replayable_source_is_not_retried() {
    let provider = Arc::new(MockProvider::flaky("mock", 1));
    let manager =
        manager_with(test_config(), Arc::new(CountingGate::funded())).with_provider(provider.clone());
    let data = seeded_bytes(5, 200_000);
    let stream = futures::stream::iter(vec![
        Ok::<_, std::io::Error>(data.slice(..100_000)),
        Ok(data.slice(100_000..)),
    ]);

    let err = manager
        .upload(
            StreamSource::new(stream),
            Some(200_000),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "transfer_failed");
    assert_eq!(provider.opens(), 1);
}

#[tokio::test]
async fn declared_size_mismatch_is_a_size_violation() {
    let provider = Arc::new(MockProvider::new("mock", MockBehavior::Accept));
    let manager =
        manager_with(test_config(), Arc::new(CountingGate::funded())).with_provider(provider.clone());

    let err = manager
        .upload(
            BytesSource::new(vec![1u8; 1000]),
            Some(2000),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::SizeViolation {
            expected: 2000,
            actual: 1000
        }
    ));
    assert!(provider.committed().is_none());
    assert_eq!(provider.aborts(), 1);
}

#[tokio::test]
async fn unknown_size_over_limit_is_rejected() {
    let config = TransferConfig {
        max_object_size: 10_000,
        ..test_config()
    };
    let provider = Arc::new(MockProvider::new("mock", MockBehavior::Accept));
    let manager = manager_with(config, Arc::new(CountingGate::funded())).with_provider(provider.clone());
    let stream = futures::stream::iter(vec![Ok::<_, std::io::Error>(seeded_bytes(6, 20_000))]);

    let err = manager
        .upload(
            StreamSource::new(stream),
            None,
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::InvalidSize { max: 10_000, .. }));
    assert!(provider.committed().is_none());
}

#[tokio::test]
async fn invalid_metadata_is_rejected_up_front() {
    let provider = Arc::new(MockProvider::new("mock", MockBehavior::Accept));
    let manager =
        manager_with(test_config(), Arc::new(CountingGate::funded())).with_provider(provider.clone());
    let metadata: ObjectMetadata = serde_json::from_str(
        r#"{"a":"1","b":"2","c":"3","d":"4","e":"5","f":"6"}"#,
    )
    .unwrap();

    let err = manager
        .upload(
            BytesSource::new(vec![1u8; 500]),
            Some(500),
            metadata,
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::InvalidMetadata(_)));
    assert_eq!(provider.negotiations(), 0);
}

#[tokio::test]
async fn cancelled_upload_leaves_nothing_retrievable() {
    let temp = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(temp.path()).await.unwrap());
    let manager = manager_with(test_config(), Arc::new(CountingGate::funded()))
        .with_provider(Arc::new(StoreProvider::new("local", Arc::clone(&store))));
    let data = seeded_bytes(8, 2 * 1024 * 1024);
    let cancel = CancellationToken::new();
    let source = CancelAfter {
        inner: BytesSource::new(data.clone()),
        reads: 5,
        cancel: cancel.clone(),
    };

    let err = manager
        .upload(
            source,
            Some(data.len() as u64),
            ObjectMetadata::new(),
            &UploadOptions::default().with_cancel(cancel),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Cancelled));
    assert!(store.list("pieces").await.unwrap().is_empty());
    assert!(store.list("staging").await.unwrap().is_empty());
    assert!(store.list("records").await.unwrap().is_empty());
}

#[tokio::test]
async fn filesystem_round_trip_via_range_reads() {
    let temp = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(temp.path()).await.unwrap());
    let manager = manager_with(test_config(), Arc::new(CountingGate::funded()))
        .with_provider(Arc::new(StoreProvider::new("local", Arc::clone(&store))));
    let data = seeded_bytes(9, 1000);

    let receipt = manager
        .upload(
            BytesSource::new(data.clone()),
            Some(1000),
            ObjectMetadata::new(),
            &UploadOptions::default(),
        )
        .await
        .unwrap();

    let parts: Vec<bytes::Bytes> = store
        .get_range(&receipt.identifier.object_key(), 100, 200)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(parts.concat(), &data[100..200]);
}
