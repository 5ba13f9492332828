#[cfg(test)]
mod tests {
    use std::{
        borrow::Cow,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tether::{
        Appender, CancellationToken, ChainError, DataSource, ExecutionEvent, Link, LinkExt,
        Materialize, RunState,
    };
    use tether_tests::{Customer, ScriptedExecutor, customer_row, init_logs, silent_logs};

    fn customers() -> Vec<Customer> {
        vec![
            Customer::new(1, "Ann"),
            Customer::new(2, "Bob"),
            Customer::new(3, "Cid"),
        ]
    }

    fn customers_executor() -> ScriptedExecutor {
        ScriptedExecutor::new(|_| Ok(customers().iter().map(customer_row).collect()))
    }

    #[tokio::test]
    async fn sync_and_async_agree() {
        init_logs();
        let (executor, data_source) = customers_executor().into_data_source();
        let chain = data_source.from("customers").to_collection::<Customer>();
        assert_eq!(executor.count(), 0, "building a chain must not run it");
        let sync = chain.execute().unwrap();
        let cancel = CancellationToken::new();
        let asynchronous = chain.execute_async(&cancel).await.unwrap();
        assert_eq!(sync, customers());
        assert_eq!(sync, asynchronous);
        let texts = executor.texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], texts[1]);
    }

    #[test]
    fn hooks_fire_in_wrap_order() {
        init_logs();
        let (_, data_source) = customers_executor().into_data_source();
        let events = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let record = |name: &'static str| {
            let events = events.clone();
            move || events.lock().unwrap().push(name)
        };
        let inner_preparing = record("inner preparing");
        let inner_prepared = record("inner prepared");
        let outer_preparing = record("outer preparing");
        let outer_prepared = record("outer prepared");
        let chain = Appender::new(
            Appender::new(data_source.from("customers").to_rows())
                .preparing(move |_| inner_preparing())
                .prepared(move |_| inner_prepared()),
        )
        .preparing(move |_| outer_preparing())
        .prepared(move |_| outer_prepared());
        chain.execute().unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            [
                "inner preparing",
                "outer preparing",
                "inner prepared",
                "outer prepared"
            ]
        );
        chain.execute().unwrap();
        assert_eq!(events.lock().unwrap().len(), 8);
    }

    #[test]
    fn timeout_and_tracing() {
        init_logs();
        let executor = Arc::new(customers_executor());
        let data_source = DataSource::builder(executor.clone())
            .default_timeout(Duration::from_secs(30))
            .build();
        data_source.from("customers").to_rows().execute().unwrap();
        data_source
            .from("customers")
            .to_rows()
            .with_timeout(Duration::from_secs(2))
            .with_tracing("load customers")
            .execute()
            .unwrap();
        let commands = executor.commands();
        assert_eq!(commands[0].timeout, Some(Duration::from_secs(30)));
        assert!(commands[0].tags.is_empty());
        assert_eq!(commands[1].timeout, Some(Duration::from_secs(2)));
        assert!(commands[1].text.starts_with("/* load customers */\n"));
        assert_eq!(
            commands[1].tags,
            [(Cow::Borrowed("trace"), "load customers".to_string())]
        );
    }

    #[test]
    fn transform() {
        init_logs();
        let (_, data_source) = customers_executor().into_data_source();
        let names = data_source
            .from("customers")
            .to_collection::<Customer>()
            .transform(|customers| Ok(customers.into_iter().map(|v| v.name).collect::<Vec<_>>()))
            .execute()
            .unwrap();
        assert_eq!(names, ["Ann", "Bob", "Cid"]);
        silent_logs! {
            let failing = data_source
                .from("customers")
                .to_collection::<Customer>()
                .transform(|_| -> tether::Result<()> { Err(anyhow::anyhow!("rejected")) });
            assert_eq!(failing.execute().unwrap_err().to_string(), "rejected");
        }
    }

    #[test]
    fn lifecycle_events() {
        init_logs();
        let events = Arc::new(Mutex::new(Vec::<String>::new()));
        let listener = {
            let events = events.clone();
            Arc::new(move |event: &ExecutionEvent<'_>| {
                let line = match event {
                    ExecutionEvent::Started { token, state } => format!(
                        "started {} {:?}",
                        token.operation_name(),
                        state.get::<&'static str>()
                    ),
                    ExecutionEvent::Finished { rows_affected, .. } => {
                        format!("finished {:?}", rows_affected.map(|v| v.rows_affected))
                    }
                    ExecutionEvent::Failed { error, .. } => format!("failed {}", error),
                };
                events.lock().unwrap().push(line);
            })
        };
        let executor = Arc::new(ScriptedExecutor::affecting(4));
        let data_source = DataSource::builder(executor.clone())
            .listener(listener.clone())
            .build();
        data_source
            .delete("customers", Some(tether::Filter::equals("id", 1)))
            .to_affected()
            .run(&RunState::new("request 42"))
            .unwrap();
        let failing = DataSource::builder(Arc::new(ScriptedExecutor::failing("disk full")))
            .listener(listener)
            .build();
        silent_logs! {
            let error = failing.from("customers").to_rows().execute().unwrap_err();
            assert_eq!(error.to_string(), "disk full");
            assert!(error.downcast_ref::<ChainError>().is_none());
        }
        assert_eq!(
            *events.lock().unwrap(),
            [
                "started delete from customers Some(\"request 42\")",
                "finished Some(4)",
                "started select from customers None",
                "failed disk full",
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_becomes_canceled() {
        init_logs();
        let (executor, data_source) = customers_executor()
            .with_delay(Duration::from_secs(30))
            .into_data_source();
        let chain = data_source.from("customers").to_rows();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let error = chain.execute_async(&cancel).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ChainError>(),
            Some(ChainError::Canceled { .. })
        ));
        assert_eq!(executor.count(), 1);

        let error = chain.execute_async(&cancel).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ChainError>(),
            Some(ChainError::Canceled { .. })
        ));
        assert_eq!(executor.count(), 1, "a canceled run must not reach the provider");
    }

    #[tokio::test]
    async fn provider_errors_pass_through() {
        init_logs();
        let (_, data_source) = ScriptedExecutor::failing("constraint violated").into_data_source();
        let chain = data_source.from("customers").to_rows();
        let cancel = CancellationToken::new();
        silent_logs! {
            let error = chain.execute_async(&cancel).await.unwrap_err();
            assert_eq!(error.to_string(), "constraint violated");
        }
    }

    #[tokio::test]
    async fn one_chain_many_tasks() {
        init_logs();
        let (executor, data_source) = customers_executor().into_data_source();
        let chain = Arc::new(data_source.from("customers").to_collection::<Customer>());
        let tasks = (0..8)
            .map(|_| {
                let chain = chain.clone();
                tokio::spawn(async move {
                    let cancel = CancellationToken::new();
                    chain.execute_async(&cancel).await.unwrap()
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            assert_eq!(task.await.unwrap(), customers());
        }
        assert_eq!(executor.count(), 8);
    }
}
