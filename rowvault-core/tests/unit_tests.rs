//! Unit tests for rowvault-core

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use rowvault_core::{
    crypto::{hash_commit, hash_row, selection_hash, selection_threshold, CommitHashInput},
    serialization::{decode_row_object, encode_row_object},
    ColumnDef, ColumnType, DatasetId, LogicalRowId, Manifest, RowData, RowHash, Schema, Value,
};

fn row(pairs: &[(&str, Value)]) -> RowData {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

mod hashing_tests {
    use super::*;

    #[test]
    fn test_equal_rows_share_hash() {
        let a = row(&[("id", Value::Integer(1)), ("name", "ada".into())]);
        let b = row(&[("name", "ada".into()), ("id", Value::Integer(1))]);
        assert_eq!(hash_row(&a).unwrap(), hash_row(&b).unwrap());
    }

    #[test]
    fn test_type_is_part_of_identity() {
        let int = row(&[("v", Value::Integer(1))]);
        let float = row(&[("v", Value::Float(1.0))]);
        let text = row(&[("v", "1".into())]);
        let h = [hash_row(&int).unwrap(), hash_row(&float).unwrap(), hash_row(&text).unwrap()];
        assert_ne!(h[0], h[1]);
        assert_ne!(h[1], h[2]);
        assert_ne!(h[0], h[2]);
    }

    #[test]
    fn test_negative_zero_is_canonicalised() {
        let pos = row(&[("v", Value::Float(0.0))]);
        let neg = row(&[("v", Value::Float(-0.0))]);
        assert_eq!(hash_row(&pos).unwrap(), hash_row(&neg).unwrap());
    }

    #[test]
    fn test_nan_is_rejected() {
        let bad = row(&[("v", Value::Float(f64::NAN))]);
        assert!(hash_row(&bad).is_err());
    }

    #[test]
    fn test_commit_id_covers_manifest() {
        let schemas = BTreeMap::new();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let dataset_id = DatasetId::new();
        let mut manifest = Manifest::new();
        manifest.insert(LogicalRowId::new("data", 0), RowHash([1; 32]));

        let input = |m: &Manifest| {
            hash_commit(&CommitHashInput {
                dataset_id,
                parent: None,
                message: "init",
                author: "ada",
                committed_at: at,
                schemas: &schemas,
                manifest: m,
            })
            .unwrap()
        };

        let first = input(&manifest);
        assert_eq!(first, input(&manifest));
        manifest.insert(LogicalRowId::new("data", 1), RowHash([2; 32]));
        assert_ne!(first, input(&manifest));
    }

    #[test]
    fn test_selection_threshold_bounds() {
        assert_eq!(selection_threshold(0.0), 0);
        assert_eq!(selection_threshold(-1.0), 0);
        assert_eq!(selection_threshold(1.0), u64::MAX);
        assert_eq!(selection_threshold(2.5), u64::MAX);
        let half = selection_threshold(0.5);
        assert!(half > u64::MAX / 2 - 4096 && half < u64::MAX / 2 + 4096);
    }

    #[test]
    fn test_selection_hash_spreads() {
        // Roughly half of 10k keys should fall under the 0.5 threshold
        let threshold = selection_threshold(0.5);
        let under = (0..10_000)
            .filter(|i| selection_hash(&format!("data:{}", i), 42) < threshold)
            .count();
        assert!(under > 4_500 && under < 5_500, "got {}", under);
    }
}

mod schema_tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("id", ColumnType::Integer).required(),
            ColumnDef::new("score", ColumnType::Float),
            ColumnDef::new("region", ColumnType::Text),
        ])
        .unwrap()
    }

    #[test]
    fn test_row_from_json_coerces() {
        let parsed = schema()
            .row_from_json(&serde_json::json!({"id": 7, "score": 3, "region": "north"}))
            .unwrap();
        assert_eq!(parsed["score"], Value::Float(3.0));
        assert_eq!(parsed["id"], Value::Integer(7));
    }

    #[test]
    fn test_row_validation_failures() {
        let s = schema();
        assert!(s.row_from_json(&serde_json::json!({"score": 1.0})).is_err());
        assert!(s.row_from_json(&serde_json::json!({"id": 1, "nope": 1})).is_err());
        assert!(s.row_from_json(&serde_json::json!({"id": null})).is_err());
    }

    #[test]
    fn test_schema_serde_shape() {
        let json = serde_json::to_value(schema()).unwrap();
        assert_eq!(json["columns"][0]["type"], "integer");
        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema());
    }
}

mod object_tests {
    use super::*;

    #[test]
    fn test_row_object_roundtrip_preserves_types() {
        let original = row(&[
            ("at", Value::Timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())),
            ("n", Value::Integer(-3)),
            ("x", Value::Null),
        ]);
        let bytes = encode_row_object(&original).unwrap();
        let decoded = decode_row_object(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(hash_row(&decoded).unwrap(), hash_row(&original).unwrap());
    }

    #[test]
    fn test_truncated_object_is_corrupt() {
        let bytes = encode_row_object(&row(&[("n", Value::Integer(1))])).unwrap();
        assert!(decode_row_object(&bytes[..5]).is_err());
    }
}

// Property-based testing
#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Integer),
            (-1e12f64..1e12f64).prop_map(Value::Float),
            "[a-z]{0,12}".prop_map(Value::Text),
        ]
    }

    fn arb_row() -> impl Strategy<Value = RowData> {
        prop::collection::btree_map("[a-z]{1,6}", arb_value(), 0..8)
    }

    proptest! {
        #[test]
        fn test_hash_is_pure_function_of_content(data in arb_row()) {
            let copy = data.clone();
            prop_assert_eq!(hash_row(&data).unwrap(), hash_row(&copy).unwrap());
        }

        #[test]
        fn test_distinct_rows_hash_apart(a in arb_row(), b in arb_row()) {
            prop_assume!(a != b);
            prop_assert_ne!(hash_row(&a).unwrap(), hash_row(&b).unwrap());
        }

        #[test]
        fn test_selection_hash_is_deterministic(index in 0u64..1_000_000, seed in any::<u64>()) {
            let key = LogicalRowId::new("data", index).to_string();
            prop_assert_eq!(selection_hash(&key, seed), selection_hash(&key, seed));
        }
    }
}
