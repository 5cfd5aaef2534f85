//! Behavior under a tight memory cap: indexes fail, sorts spill.


use rivulet_core::attributes::Attributes;
use rivulet_core::config::EngineConfig;
use rivulet_core::schema::DataType;
use rivulet_core::types::Scalar;
use rivulet_exec::{ExecError, NodeStatus, Pipeline};
use rivulet_operators::{OpError, PortSchemas};
use test_data_gen::{
    create_temp_spill_dir, generate_random_keys, keyed, keyed_records, keyed_schema, schema,
    test_config,
};

fn capped(dir: &tempfile::TempDir, cap: usize) -> EngineConfig {
    EngineConfig {
        mem_cap_bytes: cap,
        ..test_config(dir)
    }
}

#[test]
fn hash_join_index_over_cap_is_a_resource_error() {
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(capped(&dir, 512));
    let joined = schema(&[
        ("id", DataType::Int64),
        ("name", DataType::Utf8),
        ("val", DataType::Utf8),
    ]);
    p.add_component(
        "join",
        "HASH_JOIN",
        &Attributes::new().with("joinKey", "id"),
        PortSchemas::new(vec![keyed_schema("name"), keyed_schema("val")], vec![joined]),
    )
    .unwrap();
    let ids: Vec<i64> = (0..2_000).collect();
    p.feed("join", 0, keyed_records(&ids, "d")).unwrap();
    p.feed("join", 1, keyed_records(&ids, "s")).unwrap();
    p.drain("join", 0).unwrap();

    let report = p.run_to_report().unwrap();
    assert_eq!(report.status(), NodeStatus::Failed);
    let node = report.node("join").unwrap();
    assert!(node.error.as_deref().unwrap_or_default().contains("memory budget"));
}

#[test]
fn run_surfaces_resource_error() {
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(capped(&dir, 256));
    p.add_component(
        "join",
        "HASH_JOIN",
        &Attributes::new().with("joinKey", "id"),
        PortSchemas::new(
            vec![keyed_schema("name"), keyed_schema("val")],
            vec![keyed_schema("name")],
        ),
    )
    .unwrap();
    let ids: Vec<i64> = (0..500).collect();
    p.feed("join", 0, keyed_records(&ids, "d")).unwrap();
    p.feed("join", 1, keyed_records(&ids, "s")).unwrap();
    p.drain("join", 0).unwrap();
    match p.run() {
        Err(ExecError::Node { source, .. }) => {
            assert!(matches!(source, OpError::Resource(_)), "{source}")
        }
        other => panic!("expected a resource error, got {other:?}"),
    }
}

#[test]
fn sort_spills_under_small_cap_and_stays_correct() {
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(capped(&dir, 4 * 1024));
    let s = keyed_schema("grp");
    p.add_component(
        "sort",
        "SORT_WITHIN_GROUPS",
        &Attributes::new()
            .with("groupKey", "grp")
            .with("sortKey", "id")
            .with("bufferCapacity", "1000000"),
        PortSchemas::new(vec![s.clone()], vec![s]),
    )
    .unwrap();
    let ids = generate_random_keys(3_000, 1_000, 5);
    let input = ids
        .iter()
        .map(|&i| keyed(Some(i), "all"))
        .collect();
    p.feed("sort", 0, input).unwrap();
    let out = p.drain("sort", 0).unwrap();
    let report = p.run().unwrap();

    let node = report.node("sort").unwrap();
    assert!(node.spilled_bytes > 0);
    assert!(report.peak_mem_bytes <= 4 * 1024);

    let mut expected = ids;
    expected.sort();
    let got: Vec<i64> = out
        .records()
        .iter()
        .map(|r| match r.values()[0] {
            Scalar::I64(v) => v,
            _ => i64::MIN,
        })
        .collect();
    assert_eq!(got, expected);
}
