//! Property-based test generators using proptest.
//!
//! Provides strategies for generating bucket paths, keys and records
//! that satisfy the store's naming rules.

use advisorydb_core::{Advisory, BucketPath, Severity, Status, VulnerabilityDetail};
use proptest::prelude::*;

/// Strategy for a bucket or key name: non-empty, no `::` delimiter.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9 ._-]{0,15}").expect("Invalid regex")
}

/// Strategy for vulnerability IDs in CVE form.
pub fn vuln_id_strategy() -> impl Strategy<Value = String> {
    (1999u32..2030, 1u32..100_000).prop_map(|(year, n)| format!("CVE-{year}-{n:04}"))
}

/// Strategy for bucket paths of one to `max_depth` segments.
pub fn bucket_path_strategy(max_depth: usize) -> impl Strategy<Value = BucketPath> {
    prop::collection::vec(name_strategy(), 1..=max_depth.max(1))
        .prop_map(|segments| BucketPath::new(segments).expect("Generated names are valid"))
}

/// Strategy for opaque stored values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for severities.
pub fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Unknown),
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

fn version_strategy() -> impl Strategy<Value = String> {
    (0u32..20, 0u32..20, 0u32..20).prop_map(|(a, b, c)| format!("{a}.{b}.{c}"))
}

/// Strategy for advisories as a feed would write them: no ID or provenance.
pub fn advisory_strategy() -> impl Strategy<Value = Advisory> {
    (
        prop::option::of(prop_oneof![
            Just(Status::Fixed),
            Just(Status::Affected),
            Just(Status::WillNotFix),
        ]),
        severity_strategy(),
        prop::option::of(version_strategy()),
        prop::collection::vec(version_strategy(), 0..3),
        prop::collection::vec("[a-z0-9_]{1,8}", 0..2),
    )
        .prop_map(|(status, severity, fixed, vulnerable, arches)| Advisory {
            status,
            severity,
            fixed_version: fixed.unwrap_or_default(),
            vulnerable_versions: vulnerable.into_iter().map(|v| format!("<{v}")).collect(),
            arches,
            ..Advisory::default()
        })
}

/// Strategy for vulnerability details with finite scores.
pub fn detail_strategy() -> impl Strategy<Value = VulnerabilityDetail> {
    (
        prop::option::of(0u8..=100),
        severity_strategy(),
        ".{0,40}",
        prop::collection::vec("CWE-[0-9]{1,4}", 0..3),
        prop::option::of(0i64..2_000_000_000),
    )
        .prop_map(|(score, severity, title, cwe_ids, published)| VulnerabilityDetail {
            cvss_score_v3: score.map(|s| f64::from(s) / 10.0),
            severity_v3: severity,
            title,
            cwe_ids,
            published_date: published
                .and_then(|secs| time::OffsetDateTime::from_unix_timestamp(secs).ok()),
            ..VulnerabilityDetail::default()
        })
}

/// One write against the store.
#[derive(Debug, Clone)]
pub enum BucketOperation {
    /// Store a value.
    Put {
        /// Bucket chain.
        path: BucketPath,
        /// Key in the innermost bucket.
        key: String,
        /// Stored bytes.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Bucket chain.
        path: BucketPath,
        /// Key in the innermost bucket.
        key: String,
    },
}

/// Strategy for writes confined to `roots`, using keys that never collide
/// with bucket names (keys start with `k`, buckets with an upper-case
/// letter).
pub fn bucket_operation_strategy(
    roots: &'static [&'static str],
) -> impl Strategy<Value = BucketOperation> {
    let path = (
        prop::sample::select(roots),
        prop::collection::vec("[A-Z][a-z]{0,3}", 0..2),
    )
        .prop_map(|(root, nested)| {
            BucketPath::new(std::iter::once(root.to_string()).chain(nested))
                .expect("Generated names are valid")
        });
    let key = "k[a-z0-9]{0,4}";
    prop_oneof![
        3 => (path.clone(), key, value_strategy())
            .prop_map(|(path, key, value)| BucketOperation::Put { path, key, value }),
        1 => (path, key).prop_map(|(path, key)| BucketOperation::Delete { path, key }),
    ]
}

/// Strategy for a sequence of write operations.
pub fn operation_sequence_strategy(
    roots: &'static [&'static str],
    max_len: usize,
) -> impl Strategy<Value = Vec<BucketOperation>> {
    prop::collection::vec(bucket_operation_strategy(roots), 1..=max_len.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisorydb_core::ROOT_PREFIX_DELIMITER;

    proptest! {
        #[test]
        fn names_are_valid_literal_roots(name in name_strategy()) {
            prop_assert!(!name.is_empty());
            prop_assert!(!name.contains(ROOT_PREFIX_DELIMITER));
        }

        #[test]
        fn paths_have_bounded_depth(path in bucket_path_strategy(3)) {
            prop_assert!((1..=3).contains(&path.depth()));
        }

        #[test]
        fn operations_stay_in_roots(op in bucket_operation_strategy(&["a", "b"])) {
            let path = match &op {
                BucketOperation::Put { path, .. } | BucketOperation::Delete { path, .. } => path,
            };
            prop_assert!(["a", "b"].contains(&path.root_name()));
        }
    }
}
