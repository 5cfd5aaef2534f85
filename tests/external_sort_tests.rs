//! SortWithinGroups: spilled and in-memory sorting must agree.


use proptest::prelude::*;
use rivulet_core::attributes::Attributes;
use rivulet_core::schema::{DataType, Schema};
use rivulet_core::types::{Record, Scalar};
use rivulet_exec::Pipeline;
use rivulet_operators::PortSchemas;
use test_data_gen::{create_temp_spill_dir, generate_random_keys, schema, test_config};

fn sort_schema() -> Schema {
    schema(&[
        ("id", DataType::Int64),
        ("grp", DataType::Utf8),
        ("seq", DataType::Int64),
    ])
}

/// Records `(value, group, arrival index)`, already grouped; the arrival
/// index makes stability visible in the output.
fn grouped_input(groups: &[Vec<i64>]) -> Vec<Record> {
    let mut seq = 0;
    let mut out = Vec::new();
    for (g, values) in groups.iter().enumerate() {
        for v in values {
            out.push(Record::new(vec![
                Scalar::I64(*v),
                Scalar::Str(format!("g{g:03}")),
                Scalar::I64(seq),
            ]));
            seq += 1;
        }
    }
    out
}

fn int(record: &Record, idx: usize) -> i64 {
    match record.values()[idx] {
        Scalar::I64(v) => v,
        _ => i64::MIN,
    }
}

fn sort_groups(input: Vec<Record>, buffer: usize, tapes: usize) -> (Vec<Record>, u64) {
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(test_config(&dir));
    let schema = sort_schema();
    p.add_component(
        "swg",
        "SORT_WITHIN_GROUPS",
        &Attributes::new()
            .with("groupKey", "grp")
            .with("sortKey", "id")
            .with("bufferCapacity", buffer.to_string())
            .with("numberOfTapes", tapes.to_string())
            .with("order", "ascending"),
        PortSchemas::new(vec![schema.clone()], vec![schema]),
    )
    .unwrap();
    p.feed("swg", 0, input).unwrap();
    let out = p.drain("swg", 0).unwrap();
    let report = p.run().unwrap();
    let spilled = report.node("swg").map(|n| n.spilled_bytes).unwrap_or(0);
    (out.records(), spilled)
}

#[test]
fn spill_matches_memory_for_large_group() {
    let values = generate_random_keys(500, 40, 11);
    let input = grouped_input(&[values.clone(), vec![3, 1, 2], values]);
    let (in_memory, no_spill) = sort_groups(input.clone(), 10_000, 6);
    let (spilled, spill_bytes) = sort_groups(input, 16, 3);
    assert_eq!(no_spill, 0);
    assert!(spill_bytes > 0);
    assert_eq!(in_memory, spilled);
}

#[test]
fn spill_dir_is_cleaned_after_run() {
    let dir = create_temp_spill_dir();
    let mut p = Pipeline::new(test_config(&dir));
    let schema = sort_schema();
    p.add_component(
        "swg",
        "SORT_WITHIN_GROUPS",
        &Attributes::new()
            .with("groupKey", "grp")
            .with("sortKey", "id")
            .with("bufferCapacity", "4"),
        PortSchemas::new(vec![schema.clone()], vec![schema]),
    )
    .unwrap();
    p.feed("swg", 0, grouped_input(&[generate_random_keys(100, 9, 3)]))
        .unwrap();
    let _out = p.drain("swg", 0).unwrap();
    p.run().unwrap();
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn spill_and_memory_orderings_agree(
        groups in prop::collection::vec(prop::collection::vec(-20i64..20, 0..60), 1..5),
        buffer in 1usize..8,
        tapes in 2usize..5,
    ) {
        let input = grouped_input(&groups);
        let (expected, _) = sort_groups(input.clone(), 100_000, 6);
        let (got, _) = sort_groups(input, buffer, tapes);
        prop_assert_eq!(&got, &expected);

        // ascending by value within a group, arrival order among equals
        for pair in got.windows(2) {
            if pair[0].values()[1] == pair[1].values()[1] {
                let (a, b) = (int(&pair[0], 0), int(&pair[1], 0));
                prop_assert!(a < b || (a == b && int(&pair[0], 2) < int(&pair[1], 2)));
            }
        }
    }
}
