mod common;

use common::{CT_ID, LABEL_ID, MemoryScheme};
use std::sync::Arc;
use volume_session::{VolumeLoader, VolumeLoaderError};

fn loader() -> (VolumeLoader, Arc<MemoryScheme>) {
    let scheme = MemoryScheme::new();
    let loader = VolumeLoader::new();
    loader.register_scheme("mem", scheme.clone());
    (loader, scheme)
}

#[tokio::test]
async fn same_id_yields_same_volume() {
    let (loader, scheme) = loader();

    let first = loader.load(CT_ID).await.unwrap();
    let second = loader.load(CT_ID).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(scheme.loads(), 1);
    assert_eq!(first.id.as_str(), CT_ID);
}

#[tokio::test]
async fn concurrent_requests_share_one_decode() {
    let (loader, scheme) = loader();

    let (a, b) = futures::try_join!(loader.load(CT_ID), loader.load(CT_ID)).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(scheme.loads(), 1);
}

#[tokio::test]
async fn different_ids_are_cached_separately() {
    let (loader, scheme) = loader();

    let ct = loader.load(CT_ID).await.unwrap();
    let labels = loader.load(LABEL_ID).await.unwrap();

    assert!(!Arc::ptr_eq(&ct, &labels));
    assert_eq!(scheme.loads(), 2);
    assert!(Arc::ptr_eq(&loader.get(LABEL_ID).unwrap(), &labels));
}

#[tokio::test]
async fn failed_load_is_not_cached() {
    let (loader, scheme) = loader();
    scheme.fail(CT_ID);

    let err = loader.load(CT_ID).await.unwrap_err();
    assert!(matches!(err, VolumeLoaderError::Fetch { .. }));
    assert!(!loader.contains(CT_ID));

    // a later request tries again
    assert!(loader.load(CT_ID).await.is_err());
    assert_eq!(scheme.loads(), 2);
}

#[tokio::test]
async fn purge_empties_the_cache() {
    let (loader, _scheme) = loader();
    loader.load(CT_ID).await.unwrap();
    loader.load(LABEL_ID).await.unwrap();

    loader.purge();

    assert!(!loader.contains(CT_ID));
    assert!(!loader.contains(LABEL_ID));
    assert!(loader.has_scheme("mem"));
}
