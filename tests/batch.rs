#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tether::{
        CancellationToken, ChainError, DriverLimits, LinkExt, RowFields, Value, WriteOptions,
    };
    use tether_tests::{Customer, ScriptedExecutor, init_logs, inserted_rows, silent_logs};

    fn customers(count: i64) -> Vec<Customer> {
        (0..count)
            .map(|i| Customer::new(i, &format!("customer {}", i)))
            .collect()
    }

    fn limited(max_parameters: Option<usize>, max_rows_per_values: Option<usize>) -> ScriptedExecutor {
        ScriptedExecutor::new(|command| Ok(vec![inserted_rows(command, 3)])).with_limits(
            DriverLimits {
                max_parameters,
                max_rows_per_values,
            },
        )
    }

    #[test]
    fn split_by_parameters() {
        init_logs();
        let (executor, data_source) = limited(Some(20), None).into_data_source();
        let inserted = data_source
            .insert_multiple_batch("customers", customers(32), WriteOptions::default())
            .execute()
            .unwrap();
        assert_eq!(inserted, 32);
        let commands = executor.commands();
        assert_eq!(
            commands
                .iter()
                .map(|v| v.parameters.len())
                .collect::<Vec<_>>(),
            [18, 18, 18, 18, 18, 6]
        );
        let first_ids = commands
            .iter()
            .map(|v| v.parameters[0].value.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            first_ids,
            [0_i64, 6, 12, 18, 24, 30].map(Value::from).to_vec()
        );
        assert!(commands.iter().all(|v| v.parameters.len() <= 20));
    }

    #[test]
    fn split_by_rows_and_ignored_columns() {
        init_logs();
        let (executor, data_source) = ScriptedExecutor::new(|command| {
            Ok(vec![inserted_rows(command, 2)])
        })
        .with_limits(DriverLimits {
            max_parameters: Some(9),
            max_rows_per_values: Some(3),
        })
        .into_data_source();
        let inserted = data_source
            .insert_multiple_batch(
                "customers",
                customers(10),
                WriteOptions::default().ignore("email"),
            )
            .execute()
            .unwrap();
        assert_eq!(inserted, 10);
        assert_eq!(
            executor
                .commands()
                .iter()
                .map(|v| v.parameters.len())
                .collect::<Vec<_>>(),
            [6, 6, 6, 2]
        );
        assert!(executor.texts().iter().all(|v| !v.contains("email")));
    }

    #[test]
    fn boundary_of_seven_parameters() {
        init_logs();
        let (executor, data_source) = ScriptedExecutor::new(|command| {
            Ok(vec![inserted_rows(command, 7)])
        })
        .with_limits(DriverLimits {
            max_parameters: Some(100),
            max_rows_per_values: None,
        })
        .into_data_source();
        let rows = (0..30)
            .map(|i| {
                ["a", "b", "c", "d", "e", "f", "g"]
                    .into_iter()
                    .map(|column| (column.into(), Value::from(i)))
                    .collect::<RowFields>()
            })
            .collect::<Vec<_>>();
        let inserted = data_source
            .insert_multiple_batch("wide", rows, WriteOptions::default())
            .execute()
            .unwrap();
        assert_eq!(inserted, 30);
        assert_eq!(
            executor
                .commands()
                .iter()
                .map(|v| v.parameters.len() / 7)
                .collect::<Vec<_>>(),
            [14, 14, 2]
        );
    }

    #[test]
    fn unbounded_is_one_statement() {
        init_logs();
        let (executor, data_source) = limited(None, None).into_data_source();
        let inserted = data_source
            .insert_multiple_batch("customers", customers(250), WriteOptions::default())
            .execute()
            .unwrap();
        assert_eq!(inserted, 250);
        assert_eq!(executor.count(), 1);
    }

    #[test]
    fn empty_input() {
        init_logs();
        let (executor, data_source) = limited(Some(20), None).into_data_source();
        let inserted = data_source
            .insert_multiple_batch("customers", Vec::<Customer>::new(), WriteOptions::default())
            .execute()
            .unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(executor.count(), 0);
    }

    #[test]
    fn row_too_wide() {
        init_logs();
        let (executor, data_source) = limited(Some(2), None).into_data_source();
        silent_logs! {
            let error = data_source
                .insert_multiple_batch("customers", customers(3), WriteOptions::default())
                .execute()
                .unwrap_err();
            assert!(matches!(
                error.downcast_ref::<ChainError>(),
                Some(ChainError::BatchTooWide {
                    parameters: 3,
                    max_parameters: 2,
                    ..
                })
            ));
        }
        assert_eq!(executor.count(), 0);
    }

    #[test]
    fn failure_keeps_previous_batches() {
        init_logs();
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = {
            let calls = calls.clone();
            ScriptedExecutor::new(move |command| {
                if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                    return Err(anyhow::anyhow!("deadlock detected"));
                }
                Ok(vec![inserted_rows(command, 3)])
            })
            .with_limits(DriverLimits {
                max_parameters: Some(30),
                max_rows_per_values: None,
            })
        };
        let (executor, data_source) = executor.into_data_source();
        silent_logs! {
            let error = data_source
                .insert_multiple_batch("customers", customers(50), WriteOptions::default())
                .execute()
                .unwrap_err();
            assert_eq!(error.to_string(), "deadlock detected");
        }
        assert_eq!(executor.count(), 3, "the batches after the failure do not run");
    }

    #[tokio::test]
    async fn hooks_reach_every_batch() {
        init_logs();
        let (executor, data_source) = limited(Some(9), None).into_data_source();
        let chain = data_source
            .insert_multiple_batch("customers", customers(7), WriteOptions::default())
            .with_tracing("import");
        let cancel = CancellationToken::new();
        assert_eq!(chain.execute_async(&cancel).await.unwrap(), 7);
        let commands = executor.commands();
        assert_eq!(commands.len(), 3);
        assert!(
            commands
                .iter()
                .all(|v| v.text.starts_with("/* import */\nINSERT INTO"))
        );
        assert_eq!(chain.execute().unwrap(), 7);
        assert_eq!(executor.count(), 6, "every run recomputes the batches");
    }
}
