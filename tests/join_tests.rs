//! Join operators driven through the threaded pipeline.


use rivulet_core::attributes::Attributes;
use rivulet_core::schema::{DataType, Schema};
use rivulet_exec::{ExecError, NodeStatus, Pipeline};
use rivulet_operators::{OpError, PortSchemas};
use test_data_gen::{
    create_temp_spill_dir, generate_random_keys, keyed, keyed_records, keyed_schema, render_rows,
    schema, test_config,
};

fn joined() -> Schema {
    schema(&[
        ("id", DataType::Int64),
        ("name", DataType::Utf8),
        ("val", DataType::Utf8),
    ])
}

fn hash_join(attrs: Attributes) -> (tempfile::TempDir, Pipeline) {
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(test_config(&dir));
    p.add_component(
        "join",
        "HASH_JOIN",
        &attrs,
        PortSchemas::new(vec![keyed_schema("name"), keyed_schema("val")], vec![joined()]),
    )
    .unwrap();
    (dir, p)
}

#[test]
fn hash_join_concrete_scenario() {
    let (_dir, mut p) = hash_join(Attributes::new().with("joinKey", "id"));
    p.feed("join", 0, vec![keyed(Some(1), "a"), keyed(Some(2), "b")]).unwrap();
    p.feed("join", 1, vec![keyed(Some(2), "X")]).unwrap();
    let out = p.drain("join", 0).unwrap();
    let report = p.run().unwrap();
    assert_eq!(render_rows(&out), vec!["2,b,X"]);
    assert_eq!(report.status(), NodeStatus::Finished);
}

#[test]
fn hash_join_outer_emits_every_driver_once_when_unmatched() {
    let ids = generate_random_keys(200, 50, 7);
    let slave_ids: Vec<i64> = (0..50).filter(|i| i % 3 == 0).collect();
    let (_dir, mut p) = hash_join(
        Attributes::new()
            .with("joinKey", "id")
            .with("joinType", "leftOuter"),
    );
    p.feed("join", 0, keyed_records(&ids, "d")).unwrap();
    p.feed("join", 1, keyed_records(&slave_ids, "s")).unwrap();
    let out = p.drain("join", 0).unwrap();
    p.run().unwrap();

    let rows = out.records();
    assert_eq!(rows.len(), ids.len());
    for (row, id) in rows.iter().zip(&ids) {
        let matched = !row.values()[2].is_null();
        assert_eq!(matched, id % 3 == 0, "id {id}");
    }
}

#[test]
fn hash_join_null_keys() {
    let driver = vec![keyed(None, "a"), keyed(Some(1), "b")];
    let slave = vec![keyed(None, "X"), keyed(Some(1), "Y")];

    let (_dir, mut p) = hash_join(Attributes::new().with("joinKey", "id"));
    p.feed("join", 0, driver.clone()).unwrap();
    p.feed("join", 1, slave.clone()).unwrap();
    let lax = p.drain("join", 0).unwrap();
    p.run().unwrap();
    assert_eq!(render_rows(&lax), vec![",a,X", "1,b,Y"]);

    let (_dir, mut p) = hash_join(
        Attributes::new()
            .with("joinKey", "id")
            .with("equalNULL", "false"),
    );
    p.feed("join", 0, driver).unwrap();
    p.feed("join", 1, slave).unwrap();
    let strict = p.drain("join", 0).unwrap();
    p.run().unwrap();
    assert_eq!(render_rows(&strict), vec!["1,b,Y"]);
}

fn intersection(attrs: Attributes) -> (tempfile::TempDir, Pipeline) {
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(test_config(&dir));
    p.add_component(
        "isect",
        "DATA_INTERSECTION",
        &attrs,
        PortSchemas::new(
            vec![keyed_schema("name"), keyed_schema("val")],
            vec![keyed_schema("name"), joined(), keyed_schema("val")],
        ),
    )
    .unwrap();
    (dir, p)
}

#[test]
fn intersection_conserves_both_inputs() {
    let a: Vec<i64> = (0..100).filter(|i| i % 2 == 0).collect();
    let b: Vec<i64> = (0..100).filter(|i| i % 3 == 0).collect();
    let (_dir, mut p) = intersection(Attributes::new().with("joinKey", "id"));
    p.feed("isect", 0, keyed_records(&a, "a")).unwrap();
    p.feed("isect", 1, keyed_records(&b, "b")).unwrap();
    let a_only = p.drain("isect", 0).unwrap();
    let matched = p.drain("isect", 1).unwrap();
    let b_only = p.drain("isect", 2).unwrap();
    let report = p.run().unwrap();

    let pairs = matched.records().len();
    assert_eq!(pairs, (0..100).filter(|i| i % 6 == 0).count());
    assert_eq!(a_only.records().len() + pairs, a.len());
    assert_eq!(b_only.records().len() + pairs, b.len());
    assert_eq!(
        report.node("isect").map(|n| n.records_in.clone()),
        Some(vec![a.len() as u64, b.len() as u64])
    );
}

#[test]
fn descending_intersection_rejects_ascending_input() {
    let (_dir, mut p) = intersection(Attributes::new().with("joinKey", "id(d)"));
    p.feed("isect", 0, keyed_records(&[1, 2, 3], "a")).unwrap();
    p.feed("isect", 1, keyed_records(&[3, 2, 1], "b")).unwrap();
    for port in 0..3 {
        p.drain("isect", port).unwrap();
    }
    match p.run() {
        Err(ExecError::Node { node, source }) => {
            assert_eq!(node, "isect");
            assert!(matches!(source, OpError::OrderViolation(_)), "{source}");
        }
        other => panic!("expected an ordering violation, got {other:?}"),
    }
}

#[test]
fn foreign_keys_replaced_and_rejected() {
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(test_config(&dir));
    p.add_component(
        "fk",
        "CHECK_FOREIGN_KEY",
        &Attributes::new()
            .with("foreignKey", "id")
            .with("primaryKey", "id")
            .with("defaultForeignKey", "-1"),
        PortSchemas::new(
            vec![keyed_schema("order"), keyed_schema("customer")],
            vec![keyed_schema("order"), keyed_schema("order")],
        ),
    )
    .unwrap();
    p.feed("fk", 0, keyed_records(&[1, 1, 2, 4], "o")).unwrap();
    p.feed("fk", 1, keyed_records(&[1, 3, 4], "c")).unwrap();
    let checked = p.drain("fk", 0).unwrap();
    let rejected = p.drain("fk", 1).unwrap();
    p.run().unwrap();

    assert_eq!(render_rows(&checked), vec!["1,o1", "1,o1", "-1,o2", "4,o4"]);
    assert_eq!(render_rows(&rejected), vec!["2,o2"]);
}

#[test]
fn sorted_join_chain() {
    // sort each name group by id, then hash join; exercises two channels
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(test_config(&dir));
    p.add_component(
        "sort",
        "SORT_WITHIN_GROUPS",
        &Attributes::new()
            .with("groupKey", "name")
            .with("sortKey", "id(d)"),
        PortSchemas::new(vec![keyed_schema("name")], vec![keyed_schema("name")]),
    )
    .unwrap();
    p.add_component(
        "join",
        "HASH_JOIN",
        &Attributes::new().with("joinKey", "id"),
        PortSchemas::new(vec![keyed_schema("name"), keyed_schema("val")], vec![joined()]),
    )
    .unwrap();
    p.connect("sort", 0, "join", 0).unwrap();
    p.feed(
        "sort",
        0,
        vec![keyed(Some(1), "g"), keyed(Some(3), "g"), keyed(Some(2), "h")],
    )
    .unwrap();
    p.feed("join", 1, keyed_records(&[1, 2, 3], "v")).unwrap();
    let out = p.drain("join", 0).unwrap();
    p.run().unwrap();
    assert_eq!(render_rows(&out), vec!["3,g,v3", "1,g,v1", "2,h,v2"]);
}
