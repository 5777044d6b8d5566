use serde_json::json;

use fetchdb_core::error::FetchError;
use fetchdb_core::types::{CancelToken, NestedIdentity, SegmentMeta, ShardTarget, SourceView};

#[test]
fn nested_identity_path_rendering() {
    let single = NestedIdentity::new("comments", 3);
    assert_eq!(single.path(), "comments[3]");
    let chain = NestedIdentity::with_child("outer", 0, NestedIdentity::new("inner", 2));
    assert_eq!(chain.path(), "outer[0].inner[2]");
}

#[test]
fn segment_meta_contains_its_range_only() {
    let meta = SegmentMeta::new(10, 5);
    assert!(!meta.contains(9));
    assert!(meta.contains(10));
    assert!(meta.contains(14));
    assert!(!meta.contains(15));
}

#[test]
fn cancel_token_clones_share_the_flag() {
    let token = CancelToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());
    token.cancel();
    assert!(clone.is_cancelled());
}

#[test]
fn source_view_keeps_raw_bytes() {
    let bytes = serde_json::to_vec(&json!({"a": 1})).unwrap();
    let view = SourceView::from_bytes(bytes.clone()).unwrap();
    assert_eq!(view.raw().unwrap(), &bytes[..]);
    assert_eq!(view.map().get("a").unwrap(), &json!(1));
    assert_eq!(view.to_bytes().unwrap(), bytes);
}

#[test]
fn source_view_rejects_non_objects() {
    let err = SourceView::from_bytes(b"[1,2,3]".to_vec());
    assert!(err.is_err());
}

#[test]
fn errors_render_their_context() {
    let err = FetchError::InconsistentSource { path: "comments".to_string() };
    assert_eq!(err.to_string(), "couldn't find nested source for path [comments]");

    let wrapped = FetchError::Phase {
        target: ShardTarget::new("docs", 2),
        source: Box::new(FetchError::StorageRead {
            doc_id: 7,
            source: anyhow::anyhow!("disk gone"),
        }),
    };
    assert_eq!(wrapped.to_string(), "fetch phase failed on [docs][2]");
    let source = std::error::Error::source(&wrapped).unwrap();
    assert_eq!(source.to_string(), "storage read failed for doc [7]");
}
