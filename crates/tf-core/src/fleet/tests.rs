use std::collections::BTreeMap;

use super::*;
use crate::cache::CachePolicy;
use crate::telemetry::TelemetryPoint;

const MIN: i64 = 60_000;

fn device(id: &str, org: &str, groups: &[&str], tags: &[(&str, &str)]) -> DeviceConfig {
    DeviceConfig {
        id: id.into(),
        class: Some("meter".into()),
        organization: Some(org.into()),
        groups: groups.iter().map(|g| g.to_string()).collect(),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn selector(mode: SelectorMode, value: &str) -> FleetSelector {
    FleetSelector::from_config(&SelectorConfig {
        mode,
        value: value.into(),
    })
    .unwrap()
}

struct FailingDirectory;

#[async_trait]
impl DeviceDirectory for FailingDirectory {
    async fn resolve(&self, _: &FleetSelector) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("directory offline")
    }
}

// -- 1. selector parsing -----------------------------------------------------

#[test]
fn selector_from_config() {
    assert_eq!(
        selector(SelectorMode::Tag, "site = plant-a"),
        FleetSelector::Tag {
            key: "site".into(),
            value: Some("plant-a".into())
        }
    );
    assert_eq!(
        selector(SelectorMode::Tag, "critical"),
        FleetSelector::Tag {
            key: "critical".into(),
            value: None
        }
    );
    assert_eq!(selector(SelectorMode::CustomQuery, "*"), FleetSelector::CustomQuery(vec![]));
    assert_eq!(
        selector(SelectorMode::CustomQuery, "site=a,class=meter").to_string(),
        "query:site=a,class=meter"
    );

    for (mode, bad) in [
        (SelectorMode::Tag, ""),
        (SelectorMode::Group, " "),
        (SelectorMode::CustomQuery, "site=a,broken"),
    ] {
        let cfg = SelectorConfig {
            mode,
            value: bad.into(),
        };
        assert!(matches!(
            FleetSelector::from_config(&cfg),
            Err(FleetError::InvalidSelector(_))
        ));
    }
}

// -- 2. static directory -----------------------------------------------------

#[tokio::test]
async fn static_directory_modes() {
    let dir = StaticDirectory::new(vec![
        device("a", "acme", &["north"], &[("site", "p1"), ("critical", "yes")]),
        device("b", "acme", &["south"], &[("site", "p2")]),
        device("c", "globex", &["north", "south"], &[("site", "p1")]),
    ]);
    let resolve = |s: FleetSelector| {
        let dir = dir.clone();
        async move { dir.resolve(&s).await.unwrap() }
    };
    assert_eq!(resolve(selector(SelectorMode::Tag, "site=p1")).await, vec!["a", "c"]);
    assert_eq!(resolve(selector(SelectorMode::Tag, "critical")).await, vec!["a"]);
    assert_eq!(resolve(selector(SelectorMode::Group, "south")).await, vec!["b", "c"]);
    assert_eq!(resolve(selector(SelectorMode::Organization, "acme")).await, vec!["a", "b"]);
    assert_eq!(
        resolve(selector(SelectorMode::CustomQuery, "organization=acme,site=p1")).await,
        vec!["a"]
    );
    assert_eq!(resolve(selector(SelectorMode::CustomQuery, "*")).await.len(), 3);
}

// -- 3. aggregator ------------------------------------------------------------

#[tokio::test]
async fn ten_devices_seven_live() {
    let now = 1_000 * MIN;
    let devices: Vec<DeviceConfig> = (0..10)
        .map(|i| device(&format!("d{i:02}"), "acme", &["all"], &[]))
        .collect();
    let cache = Arc::new(RollingCache::new(CachePolicy::new(24 * 60 * MIN, None)));
    for i in 0..10 {
        // d00..d06 reported a minute ago, d07..d09 twenty minutes ago
        let age = if i < 7 { MIN } else { 20 * MIN };
        cache.put(TelemetryPoint::new(format!("d{i:02}"), now - age).with_value("load", i as f64));
    }
    let agg = FleetAggregator::new(Arc::new(StaticDirectory::new(devices)), cache, 5 * MIN);
    let snap = agg
        .snapshot(&FleetSelector::Group("all".into()), "load", now)
        .await
        .unwrap();

    assert_eq!(snap.member_count(), 10);
    let online = snap.aggregate(AggregationFunction::PercentOnline).unwrap();
    assert_eq!(online.value, 0.7);
    assert_eq!(online.member_count, 10);
    // mean of 0..=6, the stale 7, 8, 9 do not count as zero or otherwise
    assert_eq!(snap.aggregate(AggregationFunction::Avg).unwrap().value, 3.0);
    assert_eq!(snap.aggregate(AggregationFunction::Count).unwrap().value, 10.0);
}

#[tokio::test]
async fn unknown_members_are_offline() {
    let cache = Arc::new(RollingCache::new(CachePolicy::new(60 * MIN, None)));
    cache.put(TelemetryPoint::new("a", 10 * MIN).with_value("v", 1.0));
    let dir = StaticDirectory::new(vec![
        device("a", "o", &["g"], &[]),
        device("ghost", "o", &["g"], &[]),
    ]);
    let agg = FleetAggregator::new(Arc::new(dir), cache, 5 * MIN);
    let snap = agg.snapshot(&FleetSelector::Group("g".into()), "v", 10 * MIN).await.unwrap();
    assert_eq!(snap.aggregate(AggregationFunction::PercentOffline).unwrap().value, 0.5);
    assert_eq!(snap.reporting_devices(), vec!["a"]);
}

#[tokio::test]
async fn resolution_failure_surfaces() {
    let cache = Arc::new(RollingCache::new(CachePolicy::new(60 * MIN, None)));
    let agg = FleetAggregator::new(Arc::new(FailingDirectory), cache, 5 * MIN);
    let err = agg
        .snapshot(&FleetSelector::CustomQuery(vec![]), "v", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Resolve(ref m) if m.contains("directory offline")));
}
