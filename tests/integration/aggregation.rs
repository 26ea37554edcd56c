//! Group-by aggregation through full processes.

#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use rowflow::operations::aggregate::{AggregateFn, HashAggregate, SortedAggregate};
use rowflow::operations::basic::{CollectRows, RowSource};
use rowflow::{CancelToken, Operation, PipelineProcess, Row};

use common::{init_tracing, int, options, text, EXECUTERS};

fn orders() -> Vec<Row> {
    [("milk", 10), ("milk", 20), ("sugar", 25), ("coffee", 6), ("sugar", 3)]
        .into_iter()
        .map(|(name, price)| Row::new().with("name", name).with("price", price))
        .collect()
}

fn cost_per_product() -> AggregateFn {
    AggregateFn::new(["name"], |row, aggregate| {
        aggregate.set("name", row.value("name").clone());
        let cost = aggregate.value("cost").as_i64().unwrap_or(0);
        aggregate.set("cost", cost + row.value("price").as_i64().unwrap_or(0));
        Ok(())
    })
}

fn run_over(input: &[Row], aggregate: Arc<dyn Operation>) -> BTreeMap<String, i64> {
    let sink = CollectRows::new("sink");
    let process = PipelineProcess::new("orders")
        .register(RowSource::from_rows("orders", input.to_vec()))
        .register(aggregate)
        .register(sink.clone());
    process.execute(&CancelToken::new());
    assert!(process.all_errors().is_empty());
    totals(&sink.rows())
}

fn totals(rows: &[Row]) -> BTreeMap<String, i64> {
    rows.iter().map(|r| (text(r, "name"), int(r, "cost"))).collect()
}

#[test]
fn hash_aggregate_sums_cost_per_product_under_every_executer() {
    init_tracing();
    for executer in EXECUTERS {
        let sink = CollectRows::new("sink");
        let process = PipelineProcess::with_options("orders", options(executer))
            .register(RowSource::from_rows("orders", orders()))
            .register(HashAggregate::new("cost_per_product", cost_per_product()))
            .register(sink.clone());
        process.execute(&CancelToken::new());
        assert!(process.all_errors().is_empty(), "{executer}");

        let rows = sink.rows();
        assert_eq!(rows.len(), 3);
        // Groups come out in first-seen order.
        let names: Vec<_> = rows.iter().map(|r| text(r, "name")).collect();
        assert_eq!(names, ["milk", "sugar", "coffee"]);
        let expected: BTreeMap<String, i64> =
            [("coffee", 6), ("milk", 30), ("sugar", 28)].into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        assert_eq!(totals(&rows), expected);
    }
}

#[test]
fn sorted_aggregate_splits_non_contiguous_groups() {
    init_tracing();
    let sink = CollectRows::new("sink");
    let process = PipelineProcess::new("orders")
        .register(RowSource::from_rows("orders", orders()))
        .register(SortedAggregate::new("cost_per_product", cost_per_product()))
        .register(sink.clone());
    process.execute(&CancelToken::new());
    assert!(process.all_errors().is_empty());

    let rows: Vec<_> = sink.rows().iter().map(|r| (text(r, "name"), int(r, "cost"))).collect();
    assert_eq!(
        rows,
        vec![
            ("milk".to_string(), 30),
            ("sugar".to_string(), 25),
            ("coffee".to_string(), 6),
            ("sugar".to_string(), 3),
        ]
    );
}

#[test]
fn sorted_and_hash_agree_on_sorted_input() {
    init_tracing();
    let mut sorted_orders = orders();
    sorted_orders.sort_by_key(|r| text(r, "name"));

    let hashed = run_over(&sorted_orders, HashAggregate::new("hash", cost_per_product()));
    let sorted = run_over(&sorted_orders, SortedAggregate::new("sorted", cost_per_product()));
    assert_eq!(hashed, sorted);
}

#[test]
fn finish_hook_completes_each_group() {
    init_tracing();
    let average = AggregateFn::new(["name"], |row, aggregate| {
        aggregate.set("name", row.value("name").clone());
        let sum = aggregate.value("sum").as_i64().unwrap_or(0);
        let count = aggregate.value("count").as_i64().unwrap_or(0);
        aggregate.set("sum", sum + row.value("price").as_i64().unwrap_or(0));
        aggregate.set("count", count + 1);
        Ok(())
    })
    .with_finish(|aggregate| {
        let sum = aggregate.value("sum").as_i64().unwrap_or(0);
        let count = aggregate.value("count").as_i64().unwrap_or(1).max(1);
        aggregate.set("avg", sum / count);
        aggregate.remove("sum");
        Ok(())
    });
    let sink = CollectRows::new("sink");
    let process = PipelineProcess::new("orders")
        .register(RowSource::from_rows("orders", orders()))
        .register(HashAggregate::new("average", average))
        .register(sink.clone());
    process.execute(&CancelToken::new());

    let averages: BTreeMap<String, i64> = sink.rows().iter().map(|r| (text(r, "name"), int(r, "avg"))).collect();
    assert_eq!(averages.get("milk"), Some(&15));
    assert_eq!(averages.get("sugar"), Some(&14));
    assert!(sink.rows().iter().all(|r| !r.contains("sum")));
}

#[test]
fn empty_input_differs_between_strategies() {
    init_tracing();
    let hashed = CollectRows::new("hashed");
    let process = PipelineProcess::new("empty")
        .register(RowSource::from_rows("nothing", Vec::new()))
        .register(HashAggregate::new("hash", cost_per_product()))
        .register(hashed.clone());
    process.execute(&CancelToken::new());
    assert!(hashed.is_empty());

    let sorted = CollectRows::new("sorted");
    let process = PipelineProcess::new("empty")
        .register(RowSource::from_rows("nothing", Vec::new()))
        .register(SortedAggregate::new("sorted", cost_per_product()))
        .register(sorted.clone());
    process.execute(&CancelToken::new());
    assert_eq!(sorted.len(), 1);
    assert!(sorted.rows()[0].is_empty());
}

#[test]
fn accumulate_fault_is_recorded_once() {
    init_tracing();
    let strict = AggregateFn::new(["name"], |row, aggregate| {
        let price = row
            .value("price")
            .as_i64()
            .ok_or_else(|| rowflow::PipelineError::execution("price is not an integer"))?;
        aggregate.set("cost", aggregate.value("cost").as_i64().unwrap_or(0) + price);
        Ok(())
    });
    let mut rows = orders();
    rows.push(Row::new().with("name", "tea").with("price", "free"));
    let sink = CollectRows::new("sink");
    let process = PipelineProcess::new("orders")
        .register(RowSource::from_rows("orders", rows))
        .register(HashAggregate::new("strict", strict))
        .register(sink.clone());
    process.execute(&CancelToken::new());

    let errors = process.all_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("strict"));
    assert!(sink.is_empty());
}
