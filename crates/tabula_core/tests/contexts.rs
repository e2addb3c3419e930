use tabula_core::prelude::*;

fn table() -> Table {
    Table::try_from_pairs([
        ("a", Array::from(vec![1_i64, 2, 3, 4])),
        ("b", Array::from(vec![0.5, 1.5, 2.5, 3.5])),
        ("s", Array::from(vec!["w", "x", "y", "z"])),
    ])
    .unwrap()
}

#[test]
fn select_columns_are_independent() {
    let t = table();
    let e1 = (col("a") * lit(2)).alias("a2");
    let e2 = col("b").sum().alias("b_sum");

    let both = t.select(vec![e1.clone(), col("s")]).unwrap();
    let first = t.select(vec![e1]).unwrap();
    let second = t.select(vec![col("s")]).unwrap();
    assert_eq!(first.columns()[0], both.columns()[0]);
    assert_eq!(second.columns()[0], both.columns()[1]);

    // Length one results broadcast against the other outputs.
    let out = t.select(vec![col("a"), e2]).unwrap();
    assert_eq!(&Array::from(vec![8.0; 4]), out.column("b_sum").unwrap().array());
}

#[test]
fn with_columns_keeps_original_columns() {
    let t = table();
    let out = t
        .with_columns(vec![(col("a") + col("b")).alias("c")])
        .unwrap();
    assert_eq!(vec!["a", "b", "s", "c"], out.column_names());
    let back = out.select(vec![col("a"), col("b"), col("s")]).unwrap();
    assert_eq!(t, back);
}

#[test]
fn with_columns_replaces_in_place() {
    let out = table().with_columns(vec![col("a") * lit(10)]).unwrap();
    assert_eq!(vec!["a", "b", "s"], out.column_names());
    assert_eq!(&Array::from(vec![10_i64, 20, 30, 40]), out.column("a").unwrap().array());
}

#[test]
fn filter_and_negation_partition_rows() {
    let t = table();
    let pred = col("a").gt(lit(2)).or(col("s").eq(lit("w")));
    let kept = t.filter(pred.clone()).unwrap();
    let dropped = t.filter(!pred).unwrap();
    assert_eq!(t.height(), kept.height() + dropped.height());
    assert!(t.equals_unordered(&Table::concat(&[kept, dropped]).unwrap()));
}

#[test]
fn filter_needs_boolean() {
    let err = table().filter(col("a")).unwrap_err();
    assert_eq!(ErrorKind::Type, err.kind());
}

#[test]
fn duplicate_output_names() {
    let err = table().select(vec![col("a"), col("a") + lit(1)]).unwrap_err();
    assert_eq!(ErrorKind::Schema, err.kind());
}

#[test]
fn null_propagation() {
    let t = Table::try_from_pairs([("a", Array::from(vec![Some(1_i64), None, Some(3)]))]).unwrap();

    let out = t
        .select(vec![(lit(1) + lit(ScalarValue::Null)).alias("x")])
        .unwrap();
    assert!(out.column("x").unwrap().array().get_value(0).is_null());

    let out = t
        .select(vec![col("a").mean().alias("mean"), col("a").sum().alias("sum")])
        .unwrap();
    assert_eq!(ScalarValue::Float64(2.0), out.column("mean").unwrap().array().get_value(0));
    assert_eq!(ScalarValue::Int64(4), out.column("sum").unwrap().array().get_value(0));
}

#[test]
fn nan_is_a_value() {
    let t = Table::try_from_pairs([("a", Array::from(vec![1.0, f64::NAN, 3.0]))]).unwrap();

    let out = t.select(vec![col("a").mean()]).unwrap();
    assert!(out.column("a").unwrap().array().get_value(0).is_nan());

    let out = t
        .select(vec![col("a").fill_nan(lit(ScalarValue::Null)).mean()])
        .unwrap();
    assert_eq!(ScalarValue::Float64(2.0), out.column("a").unwrap().array().get_value(0));
}

#[test]
fn strict_and_lenient_cast() {
    let t = Table::try_from_pairs([("s", Array::from(vec!["1.5", "not_a_number", "3"]))]).unwrap();

    let err = t
        .select(vec![col("s").strict_cast(DataType::Float64)])
        .unwrap_err();
    assert_eq!(ErrorKind::Cast, err.kind());
    assert_eq!(1, err.cast_values().len());
    assert!(err.to_string().contains("col(\"s\")"), "{err}");

    let out = t
        .select(vec![col("s").cast_with(DataType::Float64, false)])
        .unwrap();
    assert_eq!(
        &Array::from(vec![Some(1.5), None, Some(3.0)]),
        out.column("s").unwrap().array()
    );
}

#[test]
fn fixed_width_arrays_checked_on_construction() {
    let datatype = DataType::array(DataType::Int64, 2);
    let ok = Array::try_new_list(datatype.clone(), vec![Some(Array::from(vec![1_i64, 2]))]);
    assert!(ok.is_ok());

    let err = Array::try_new_list(datatype, vec![Some(Array::from(vec![1_i64, 2, 3]))]).unwrap_err();
    assert_eq!(ErrorKind::Schema, err.kind());
}

#[test]
fn schema_and_shape_for_display() {
    let t = table();
    assert_eq!((4, 3), t.shape());
    let schema = t.schema();
    assert_eq!(
        vec![
            ("a", &DataType::Int64),
            ("b", &DataType::Float64),
            ("s", &DataType::Utf8)
        ],
        schema.iter().collect::<Vec<_>>()
    );
}

/// Percentage rank of each station's temperatures, computed per row.
#[test]
fn rank_within_row_lists() {
    let weather = Table::try_from_pairs([
        (
            "station",
            Array::from(vec!["Station 1", "Station 2", "Station 3", "Station 4"]),
        ),
        ("day_1", Array::from(vec![17_i64, 11, 8, 22])),
        ("day_2", Array::from(vec![15_i64, 11, 10, 8])),
        ("day_3", Array::from(vec![16_i64, 15, 24, 24])),
    ])
    .unwrap();

    let all_temps = weather
        .with_columns(vec![concat_list(vec![all().exclude(["station"])]).alias("all_temps")])
        .unwrap();
    assert_eq!(
        &DataType::list(DataType::Int64),
        all_temps.column("all_temps").unwrap().datatype()
    );

    let rank_pct = (element().rank(true) / col("*").count()).round(2);
    let exprs = vec![
        all().exclude(["all_temps"]),
        col("all_temps").list().eval(rank_pct, true).alias("temps_rank"),
    ];
    let out = all_temps.select(exprs.clone()).unwrap();
    assert_eq!((4, 5), out.shape());

    let expected = Array::try_new_list(
        DataType::list(DataType::Float64),
        vec![
            Some(Array::from(vec![0.33, 1.0, 0.67])),
            Some(Array::from(vec![0.83, 0.83, 0.33])),
            Some(Array::from(vec![1.0, 0.67, 0.33])),
            Some(Array::from(vec![0.67, 1.0, 0.33])),
        ],
    )
    .unwrap();
    assert_eq!(&expected, out.column("temps_rank").unwrap().array());

    let lazy = all_temps.lazy().select(exprs).collect().unwrap();
    assert_eq!(out, lazy);
}
