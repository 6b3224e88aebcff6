//! Integration tests for common Tollgate workflows.
//!
//! These tests verify that the most common use cases work correctly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tollgate::expr::hash_id;
use tollgate::prelude::*;
use tollgate::{FetchError, SeededCallIds};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug)]
struct Member {
    id: String,
    plan: &'static str,
}

impl Entity for Member {
    fn field(&self, name: &str) -> Option<Dynamic> {
        match name {
            "id" => Some(Dynamic::from(self.id.as_str())),
            "plan" => Some(Dynamic::from(self.plan)),
            _ => None,
        }
    }

    fn type_name(&self) -> &str {
        "Member"
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({"id": self.id, "plan": self.plan})
    }
}

fn member(id: &str, plan: &'static str) -> Dynamic {
    Dynamic::object(Member {
        id: id.to_string(),
        plan,
    })
}

fn multi_rollout_feature() -> Feature {
    Feature::builder("multi_rollout_feature_full")
        .with_variant(Variant::new("a", "A"))
        .with_variant(Variant::new("b", "B"))
        .with_variant(Variant::new("off", Dynamic::Null))
        .with_rollout(Rollout::new(
            "test_segment_1",
            Population::percent(0.2, "my_seed"),
            [Arm::weighted("a", 0.5), Arm::weighted("b", 0.5)],
        ))
        .with_rollout(Rollout::new(
            "test_segment_2",
            Population::explicit(["id_1", "id_2", "id_26"]),
            ["a"],
        ))
        .with_default_arm("off")
        .build()
        .unwrap()
}

/// Assignment store keyed by entity id
#[derive(Default)]
struct MemoryStore {
    assignments: Mutex<HashMap<String, StickyAssignment>>,
}

#[async_trait]
impl StickyFetcher for MemoryStore {
    async fn fetch(
        &self,
        _feature: &Feature,
        entity: &Dynamic,
    ) -> Result<Option<StickyAssignment>, FetchError> {
        let id = entity.get("id").to_string();
        Ok(self.assignments.lock().unwrap().get(&id).cloned())
    }
}

// =============================================================================
// Hashing
// =============================================================================

#[test]
fn test_hash_fixtures() {
    assert_eq!(hash_id("foo"), 0.8845447504445093);
    assert_eq!(hash_id("abc"), 0.7054175881782409);
    assert_eq!(hash_id("my_seedMemberID"), 0.11176176296782649);
}

// =============================================================================
// Evaluation
// =============================================================================

#[tokio::test]
async fn test_multi_rollout_feature() {
    let gater = Gater::builder()
        .with_feature(multi_rollout_feature())
        .without_sink()
        .build()
        .unwrap();

    let cases = [
        ("1", Dynamic::Null),
        ("MemberID", Dynamic::from("A")),
        ("id_26", Dynamic::from("B")),
        ("id_2", Dynamic::from("A")),
    ];
    for (id, expected) in cases {
        let user = Dynamic::map([("id", id)]);
        let value = gater
            .evaluate("multi_rollout_feature_full", &user)
            .await
            .unwrap();
        assert_eq!(*value, expected, "user {id}");
    }
}

#[tokio::test]
async fn test_custom_entities() {
    let feature = Feature::builder("pro_tools")
        .with_variant(Variant::new("on", true))
        .with_variant(Variant::new("off", false))
        .with_rollout(Rollout::new(
            "paying",
            Population::expression(parse("$plan In ['pro', 'team']").unwrap()),
            ["on"],
        ))
        .with_default_arm("off")
        .build()
        .unwrap();
    let gater = Gater::builder()
        .with_feature(feature)
        .without_sink()
        .build()
        .unwrap();

    let pro = gater.evaluate("pro_tools", &member("m1", "pro")).await.unwrap();
    assert!(pro.is_truthy());
    let free = gater.evaluate("pro_tools", &member("m2", "free")).await.unwrap();
    assert!(!free.is_truthy());
}

// =============================================================================
// Sticky Assignments
// =============================================================================

#[tokio::test]
async fn test_async_sticky_store() {
    let store = Arc::new(MemoryStore::default());
    store.assignments.lock().unwrap().insert(
        "MemberID".to_string(),
        StickyAssignment::new("off", Dynamic::Null, chrono::Utc::now()),
    );

    let gater = Gater::builder()
        .with_feature(multi_rollout_feature())
        .with_sticky(store.clone())
        .without_sink()
        .build()
        .unwrap();

    let user = member("MemberID", "free");
    let value = gater
        .evaluate("multi_rollout_feature_full", &user)
        .await
        .unwrap();
    assert!(value.is_null());
    assert_eq!(value.variant(), "off");
    assert_eq!(value.call_type(), CallType::Exposure);

    // Fresh assignments land in the local cache under the entity type
    let other = member("id_2", "free");
    gater
        .evaluate("multi_rollout_feature_full", &other)
        .await
        .unwrap();
    let cached = gater
        .cache()
        .get("multi_rollout_feature_full", &other)
        .unwrap();
    assert_eq!(cached.variant, "a");
    assert!(
        gater
            .cache()
            .get("multi_rollout_feature_full", &Dynamic::map([("id", "id_2")]))
            .is_none()
    );
}

// =============================================================================
// Decision Logs
// =============================================================================

#[tokio::test]
async fn test_decision_records_reach_writer() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let out = written.clone();
    let (sink, writer) = RecordSink::spawn(false, move |record| {
        out.lock().unwrap().push(record);
    });

    let gater = Gater::builder()
        .with_feature(multi_rollout_feature())
        .with_sink(Arc::new(sink))
        .with_call_ids(Arc::new(SeededCallIds::new(42)))
        .build()
        .unwrap();

    let user = member("MemberID", "pro");
    let mut value = gater
        .evaluate("multi_rollout_feature_full", &user)
        .await
        .unwrap();
    value.log(Some(serde_json::json!({"surface": "checkout"})));
    drop(value);

    gater.stop();
    writer.await.unwrap();

    let records = written.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].entity,
        serde_json::json!({"type": "Member", "value": {"id": "MemberID", "plan": "pro"}})
    );
    assert_eq!(records[0].assignment, "A");
    assert_eq!(records[1].call_id, format!("{}:1", records[0].call_id));
    assert_eq!(
        records[1].extra,
        Some(serde_json::json!({"surface": "checkout"}))
    );

    let json = serde_json::to_value(&records[0]).unwrap();
    assert!(json.get("extra").is_none());
    assert_eq!(json["feature"]["name"], "multi_rollout_feature_full");
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_config_with_custom_randomizer() {
    let gater = Gater::builder()
        .with_config(
            r#"{"features": [{
                "name": "pricing",
                "variants": {"low": 5, "high": 10},
                "rollouts": [{
                    "name": "default",
                    "arms": ["low", "high"],
                    "randomizer": "Hash(Concat('test-', $id))"
                }]
            }]}"#,
            ConfigFormat::Json,
        )
        .without_sink()
        .build()
        .unwrap();

    // test-foo hashes to 0.6399548871841495
    let user = Dynamic::map([("id", "foo")]);
    let value = gater.evaluate("pricing", &user).await.unwrap();
    assert_eq!(value.variant(), "high");
    assert_eq!(*value, Dynamic::Int(10));
}

#[tokio::test]
async fn test_reload_keeps_code_defaults() {
    let gater = Gater::builder()
        .with_feature(multi_rollout_feature())
        .without_sink()
        .build()
        .unwrap();
    let user = Dynamic::map([("id", "1")]);
    assert!(
        gater
            .evaluate("multi_rollout_feature_full", &user)
            .await
            .unwrap()
            .is_null()
    );

    let changed = gater
        .reload_from_str(
            r#"
            [[features]]
            name = "multi_rollout_feature_full"
            default_arm = "b"
            "#,
            ConfigFormat::Toml,
        )
        .unwrap();
    assert!(changed);

    let feature = gater.feature("multi_rollout_feature_full").unwrap();
    let names: Vec<&str> = feature.rollouts().iter().map(Rollout::name).collect();
    assert_eq!(names, ["test_segment_1", "test_segment_2", "default"]);
    assert_eq!(
        gater
            .evaluate("multi_rollout_feature_full", &user)
            .await
            .unwrap(),
        "B"
    );
}
