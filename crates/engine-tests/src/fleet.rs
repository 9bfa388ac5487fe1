#[cfg(test)]
mod tests {
    use crate::utils::{
        SALES_COPY, TERMINATOR, count_calls, plan, records, row, run_fleet, sales_plan, sales_row,
        schema,
    };
    use connectors::sql::{
        base::error::ConnectorError,
        capture::{CapturedCall, FailPoint},
    };
    use engine_processing::{
        error::LoadError,
        loader::fleet::{CaptureFactory, FleetOptions, LoadFleet},
    };
    use model::core::{data_type::DataType, value::Value};
    use std::{sync::Arc, time::Duration};
    use tokio::{sync::mpsc, time::timeout};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    fn sales_rows(n: usize) -> Vec<model::records::row::Row> {
        (0..n)
            .map(|i| sales_row(i as f64 + 0.5, 2024, 3, 1 + (i % 28) as u32))
            .collect()
    }

    // Test Settings: load_action = TRUNCATE, copies = 4.
    // Scenario: four workers load one non-partitioned table.
    // Expected Outcome:
    // - Exactly one worker truncates, and commits right after.
    // - Every row is streamed exactly once across the fleet.
    #[traced_test]
    #[tokio::test]
    async fn test_truncate_runs_once_across_workers() {
        const WORKERS: usize = 4;
        const ROWS: usize = 25;

        let factory = CaptureFactory::new();
        let fleet = LoadFleet::new(sales_plan("truncate", WORKERS), Arc::new(factory.clone()));

        let report = run_fleet(fleet, sales_rows(ROWS)).await;

        assert!(!report.failed(), "{:?}", report.root_error());
        assert_eq!(report.truncate_count(), 1);
        assert_eq!(report.totals().rows_written, ROWS as u64);

        let adapters = factory.adapters();
        assert_eq!(adapters.len(), WORKERS);
        let truncates: usize = adapters.iter().map(|(_, a)| a.truncate_count()).sum();
        assert_eq!(truncates, 1);

        let (_, first) = &adapters[0];
        let calls = first.calls();
        assert_eq!(calls[1], CapturedCall::Truncate(r#"public."sales""#.into()));
        assert_eq!(calls[2], CapturedCall::Commit);

        let mut streamed = 0;
        for (target, adapter) in &adapters {
            let calls = adapter.calls();
            assert!(calls.contains(&CapturedCall::CopyIn(SALES_COPY.into())), "worker {}", target.index);
            assert_eq!(calls.last(), Some(&CapturedCall::Commit));
            streamed += records(&adapter.stream_text()).len();
        }
        assert_eq!(streamed, ROWS);
        assert!(logs_contain("Load complete"));
    }

    // Test Settings: load_action = TRUNCATE, node_index = 1.
    // Scenario: the workers of a second node join a load started elsewhere.
    // Expected Outcome: no worker on this node truncates.
    #[tokio::test]
    async fn test_second_node_never_truncates() {
        let factory = CaptureFactory::new();
        let fleet = LoadFleet::new(sales_plan("truncate", 2), Arc::new(factory.clone()))
            .with_options(FleetOptions {
                node_index: 1,
                ..Default::default()
            });

        let report = run_fleet(fleet, sales_rows(4)).await;

        assert!(!report.failed());
        assert_eq!(report.truncate_count(), 0);
        assert!(factory.adapters().iter().all(|(_, a)| a.truncate_count() == 0));
    }

    // Test Settings: copies = 3, no input rows.
    // Scenario: the upstream closes immediately.
    // Expected Outcome: every worker still opens and ends an empty copy.
    #[tokio::test]
    async fn test_empty_input_completes_every_worker() {
        let factory = CaptureFactory::new();
        let fleet = LoadFleet::new(sales_plan("insert", 3), Arc::new(factory.clone()));

        let report = run_fleet(fleet, Vec::new()).await;

        assert!(!report.failed());
        assert!(report.workers.iter().all(|w| w.rows_reported == Some(0)));
        for (_, adapter) in factory.adapters() {
            assert_eq!(count_calls(&adapter, |c| matches!(c, CapturedCall::EndCopy { rows: 0 })), 1);
            assert!(adapter.stream().is_empty());
        }
    }

    // Test Settings: copies = 3, worker 1 fails writing its second row.
    // Scenario: a transport failure in one worker.
    // Expected Outcome:
    // - The root error is the transport failure, not a sibling's stop.
    // - No worker ends its copy or commits; the failed worker rolls back.
    // - Only the failed worker counts an error.
    #[traced_test]
    #[tokio::test]
    async fn test_write_failure_stops_every_worker() {
        let factory = CaptureFactory::new().with_fail_point(1, FailPoint::Write(1));
        let fleet = LoadFleet::new(sales_plan("insert", 3), Arc::new(factory.clone()));

        // a steady trickle keeps siblings busy when the failure lands
        let (tx, rx) = mpsc::channel(1);
        let producer = tokio::spawn(async move {
            for row in sales_rows(10_000) {
                if tx.send(row).await.is_err() {
                    break;
                }
            }
        });
        let report = timeout(Duration::from_secs(10), fleet.run_to_report(rx))
            .await
            .expect("fleet stopped after the failure");
        producer.await.unwrap();

        assert!(report.failed());
        let root = report.root_error().unwrap();
        assert!(matches!(root, LoadError::Transport { .. }), "{root}");
        assert!(root.to_string().contains("injected failure writing chunk 1"));
        assert_eq!(report.totals().error_count, 1);

        let adapters = factory.adapters();
        for (target, adapter) in &adapters {
            assert_eq!(
                count_calls(adapter, |c| matches!(c, CapturedCall::EndCopy { .. })),
                0,
                "worker {} ended its copy",
                target.index
            );
            assert!(!adapter.calls().contains(&CapturedCall::Commit));
        }
        let (_, failed) = &adapters[1];
        assert_eq!(failed.calls().last(), Some(&CapturedCall::Rollback));
        assert!(logs_contain("Load failed"));
    }

    // Test Settings: copies = 2, worker 1 cannot connect.
    // Scenario: a refused connection.
    // Expected Outcome: `run` returns the connect error and the other worker
    // never ends its copy.
    #[tokio::test]
    async fn test_refused_connection_fails_the_load() {
        let factory = CaptureFactory::new().refusing(1);
        let fleet = LoadFleet::new(sales_plan("truncate", 2), Arc::new(factory.clone()));

        let (tx, rx) = mpsc::channel(4);
        tx.send(sales_row(1.0, 2024, 3, 1)).await.unwrap();
        drop(tx);
        let err = fleet.run(rx).await.unwrap_err();

        assert!(
            matches!(err, LoadError::Connect(ConnectorError::Refused(_))),
            "{err}"
        );
        let adapters = factory.adapters();
        assert_eq!(adapters.len(), 1);
        let (_, survivor) = &adapters[0];
        assert_eq!(
            count_calls(survivor, |c| matches!(c, CapturedCall::EndCopy { .. })),
            0
        );
    }

    // Test Settings: copies = 2, worker 0 fails its truncate.
    // Scenario: the elected truncater fails before any copy starts.
    // Expected Outcome: the sibling waiting on the truncate barrier is
    // released by the stop signal and never opens a copy.
    #[tokio::test]
    async fn test_truncate_failure_releases_waiting_siblings() {
        let factory = CaptureFactory::new().with_fail_point(0, FailPoint::Truncate);
        let fleet = LoadFleet::new(sales_plan("truncate", 2), Arc::new(factory.clone()));

        let report = timeout(Duration::from_secs(10), run_fleet(fleet, sales_rows(3)))
            .await
            .expect("no worker deadlocked on the barrier");

        let root = report.root_error().unwrap();
        assert!(matches!(root, LoadError::Transaction { .. }), "{root}");
        for (_, adapter) in factory.adapters() {
            assert_eq!(
                count_calls(&adapter, |c| matches!(c, CapturedCall::CopyIn(_))),
                0
            );
        }
    }

    // Scenario: the caller cancels the load while rows are still arriving.
    // Expected Outcome: workers stop without counting errors and nothing is
    // committed.
    #[tokio::test]
    async fn test_external_cancel_stops_without_errors() {
        let cancel = CancellationToken::new();
        let factory = CaptureFactory::new();
        let fleet = LoadFleet::new(sales_plan("insert", 2), Arc::new(factory.clone()))
            .with_cancel(cancel.clone());

        let (tx, rx) = mpsc::channel(1);
        tx.send(sales_row(1.0, 2024, 3, 1)).await.unwrap();
        let run = tokio::spawn(fleet.run_to_report(rx));
        cancel.cancel();
        let report = timeout(Duration::from_secs(10), run).await.unwrap().unwrap();
        drop(tx);

        assert!(report.failed());
        assert!(report.root_error().unwrap().is_stopped());
        assert_eq!(report.totals().error_count, 0);
        for (_, adapter) in factory.adapters() {
            assert!(!adapter.calls().contains(&CapturedCall::Commit));
        }
    }

    // Test Settings: two partitions on separate databases, partition_field =
    // region, TRUNCATE.
    // Scenario: rows for both regions arrive interleaved.
    // Expected Outcome:
    // - Each partition worker truncates its own database once.
    // - Each worker receives only its region's rows, in arrival order.
    #[tokio::test]
    async fn test_partitioned_load_routes_by_field() {
        let plan = plan(
            r#"{
                "connection": "postgres://default/db",
                "table": "sales",
                "bindings": [
                    { "stream": "region", "column": "region" },
                    { "stream": "qty", "column": "qty" }
                ],
                "load_action": "truncate",
                "partitions": [
                    { "id": "eu", "connection": "postgres://eu/db" },
                    { "id": "us", "connection": "postgres://us/db" }
                ],
                "partition_field": "region"
            }"#,
        );
        let schema = schema(&[("region", DataType::String), ("qty", DataType::Integer)]);
        let rows = (0..6)
            .map(|i| {
                let region = if i % 2 == 0 { "eu" } else { "us" };
                row(
                    &schema,
                    vec![Some(Value::String(region.into())), Some(Value::Integer(i))],
                )
            })
            .collect();
        let factory = CaptureFactory::new();
        let fleet = LoadFleet::new(plan, Arc::new(factory.clone()));

        let report = run_fleet(fleet, rows).await;

        assert!(!report.failed(), "{:?}", report.root_error());
        assert_eq!(report.truncate_count(), 2);

        let adapters = factory.adapters();
        let (eu_target, eu) = &adapters[0];
        let (us_target, us) = &adapters[1];
        assert_eq!(eu_target.partition_id.as_deref(), Some("eu"));
        assert_eq!(eu_target.connection.as_deref(), Some("postgres://eu/db"));
        assert_eq!(us_target.connection.as_deref(), Some("postgres://us/db"));
        assert_eq!(eu.truncate_count(), 1);
        assert_eq!(us.truncate_count(), 1);
        assert_eq!(
            eu.stream_text(),
            format!("\"eu\",0{TERMINATOR}\"eu\",2{TERMINATOR}\"eu\",4{TERMINATOR}")
        );
        assert_eq!(
            us.stream_text(),
            format!("\"us\",1{TERMINATOR}\"us\",3{TERMINATOR}\"us\",5{TERMINATOR}")
        );
    }

    // Test Settings: two partitions without their own connection, so both
    // resolve to the plan's database; TRUNCATE.
    // Scenario: both partition workers load into the same table.
    // Expected Outcome:
    // - The table is truncated once and the truncate is committed before
    //   either worker copies.
    // - Both partitions' rows survive.
    #[tokio::test]
    async fn test_partitions_sharing_a_database_truncate_once() {
        let plan = plan(
            r#"{
                "connection": "postgres://default/db",
                "table": "sales",
                "bindings": [
                    { "stream": "region", "column": "region" },
                    { "stream": "qty", "column": "qty" }
                ],
                "load_action": "truncate",
                "partitions": [{ "id": "eu" }, { "id": "us" }],
                "partition_field": "region"
            }"#,
        );
        let schema = schema(&[("region", DataType::String), ("qty", DataType::Integer)]);
        let rows = (0..4)
            .map(|i| {
                let region = if i % 2 == 0 { "eu" } else { "us" };
                row(
                    &schema,
                    vec![Some(Value::String(region.into())), Some(Value::Integer(i))],
                )
            })
            .collect();
        let factory = CaptureFactory::new();
        let fleet = LoadFleet::new(plan, Arc::new(factory.clone()));

        let report = run_fleet(fleet, rows).await;

        assert!(!report.failed(), "{:?}", report.root_error());
        assert_eq!(report.truncate_count(), 1);
        assert_eq!(report.totals().rows_written, 4);

        let adapters = factory.adapters();
        let truncates: usize = adapters.iter().map(|(_, a)| a.truncate_count()).sum();
        assert_eq!(truncates, 1);
        for (target, adapter) in &adapters {
            assert_eq!(target.connection.as_deref(), Some("postgres://default/db"));
            let calls = adapter.calls();
            if adapter.truncate_count() == 1 {
                assert_eq!(calls[2], CapturedCall::Commit, "truncate must commit before copying");
            }
            assert_eq!(records(&adapter.stream_text()).len(), 2);
            assert_eq!(calls.last(), Some(&CapturedCall::Commit));
        }
    }

    // Scenario: a downstream stage listens on the fleet's output.
    // Expected Outcome: every written row is forwarded and the output closes
    // when the load ends.
    #[tokio::test]
    async fn test_rows_are_forwarded_downstream() {
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let factory = CaptureFactory::new();
        let fleet = LoadFleet::new(sales_plan("insert", 2), Arc::new(factory.clone()))
            .with_output(out_tx);

        let report = run_fleet(fleet, sales_rows(10)).await;
        assert!(!report.failed());
        assert_eq!(report.totals().rows_forwarded, 10);

        let mut forwarded = Vec::new();
        while let Some(row) = out_rx.recv().await {
            forwarded.push(row);
        }
        assert_eq!(forwarded.len(), 10);
    }
}
