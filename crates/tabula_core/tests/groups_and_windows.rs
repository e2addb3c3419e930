use tabula_core::arrays::compute::fill::shift;
use tabula_core::context::{ExecutionState, select};
use tabula_core::prelude::*;

fn keyed() -> Table {
    Table::try_from_pairs([
        ("keys", Array::from(vec!["a", "a", "b"])),
        ("values", Array::from(vec![10_i64, 7, 1])),
    ])
    .unwrap()
}

fn list_row(table: &Table, column: &str, row: usize) -> Array {
    match table.column(column).unwrap().array().get_value(row) {
        ScalarValue::List(values) => values,
        other => panic!("expected a list, got {other}"),
    }
}

#[test]
fn window_mean_per_row() {
    let t = Table::try_from_pairs([
        ("g", Array::from(vec!["A", "A", "B"])),
        ("v", Array::from(vec![10_i64, 7, 1])),
    ])
    .unwrap();
    let out = t.select(vec![col("v").mean().over(vec![col("g")])]).unwrap();
    assert_eq!(&Array::from(vec![8.5, 8.5, 1.0]), out.column("v").unwrap().array());
}

#[test]
fn shift_within_groups_vs_map() {
    let t = keyed();

    // Order dependent expressions run per group.
    let out = t
        .group_by_stable(vec![col("keys")])
        .agg(vec![col("values").shift(1)])
        .unwrap();
    assert_eq!(Array::from(vec![None, Some(10_i64)]), list_row(&out, "values", 0));
    assert_eq!(Array::from(vec![None::<i64>]), list_row(&out, "values", 1));

    // Map sees the whole column before it is split into groups.
    let out = t
        .group_by_stable(vec![col("keys")])
        .agg(vec![col("values").map(|arr| Ok(shift(arr, 1)), None)])
        .unwrap();
    assert_eq!(Array::from(vec![None, Some(10_i64)]), list_row(&out, "values", 0));
    assert_eq!(Array::from(vec![7_i64]), list_row(&out, "values", 1));

    // Apply runs per group and matches the shift.
    let out = t
        .group_by_stable(vec![col("keys")])
        .agg(vec![col("values").apply(|arr| Ok(shift(arr, 1)), None)])
        .unwrap();
    assert_eq!(Array::from(vec![None::<i64>]), list_row(&out, "values", 1));
}

#[test]
fn group_keys_carried_through() {
    let t = Table::try_from_pairs([
        ("k1", Array::from(vec!["x", "y", "x", "y"])),
        ("k2", Array::from(vec![1_i64, 1, 1, 2])),
        ("v", Array::from(vec![1.0, 2.0, 3.0, 4.0])),
    ])
    .unwrap();
    let out = t
        .group_by(vec![col("k1"), col("k2")])
        .agg(vec![col("v").sum(), len()])
        .unwrap();
    assert_eq!(vec!["k1", "k2", "v", "count"], out.column_names());
    assert_eq!(&Array::from(vec!["x", "y", "y"]), out.column("k1").unwrap().array());
    assert_eq!(&Array::from(vec![1_i64, 1, 2]), out.column("k2").unwrap().array());
    assert_eq!(&Array::from(vec![4.0, 2.0, 4.0]), out.column("v").unwrap().array());
    assert_eq!(&Array::from(vec![2_u32, 1, 1]), out.column("count").unwrap().array());
}

#[test]
fn window_group_to_rows_shape_error() {
    let err = keyed()
        .select(vec![col("values").head(1).over(vec![col("keys")])])
        .unwrap_err();
    assert_eq!(ErrorKind::WindowShape, err.kind());
}

#[test]
fn window_join_and_explode() {
    let t = keyed();
    let out = t
        .select(vec![
            col("values")
                .sort(SortOptions::default())
                .over_with(vec![col("keys")], WindowMapping::Join),
        ])
        .unwrap();
    assert_eq!(Array::from(vec![7_i64, 10]), list_row(&out, "values", 0));
    assert_eq!(Array::from(vec![7_i64, 10]), list_row(&out, "values", 1));
    assert_eq!(Array::from(vec![1_i64]), list_row(&out, "values", 2));

    let out = t
        .select(vec![
            col("values")
                .sort(SortOptions::default())
                .over_with(vec![col("keys")], WindowMapping::Explode),
        ])
        .unwrap();
    assert_eq!(&Array::from(vec![7_i64, 10, 1]), out.column("values").unwrap().array());
}

#[test]
fn windows_share_partitions_within_a_call() {
    let t = keyed();
    let state = ExecutionState::default();
    let exprs = vec![
        col("values").mean().over(vec![col("keys")]).alias("mean"),
        col("values").max().over(vec![col("keys")]).alias("max"),
        col("values").sum().over(vec![col("keys")]).alias("sum"),
    ];
    let out = select::select(&t, &exprs, &state).unwrap();
    assert_eq!(3, out.width());
    assert_eq!(1, state.window_partitions_computed());
}
