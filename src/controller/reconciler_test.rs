#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::stream::{self, StreamExt};
    use kube::runtime::watcher::{self, Event};
    use tokio_util::sync::CancellationToken;

    use crate::config::ControllerConfig;
    use crate::controller::reconciler::Dispatcher;
    use crate::controller::test_support::{game_server, Call, RecordingHandler};
    use crate::crd::{GameServer, GameServerState};

    fn gs(name: &str) -> GameServer {
        game_server(name, GameServerState::Ready, &[])
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            sync_period: Duration::from_secs(3600),
            requeue_base_delay: Duration::from_millis(5),
            requeue_max_delay: Duration::from_secs(1),
            ..ControllerConfig::default()
        }
    }

    /// Feed `events` to a dispatcher, let it run for `run_for`, then cancel it
    async fn dispatch(
        handler: Arc<RecordingHandler>,
        config: ControllerConfig,
        events: Vec<Event<GameServer>>,
        run_for: Duration,
    ) {
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::new(handler, token.clone(), &config);
        let events = stream::iter(events.into_iter().map(Ok::<_, watcher::Error>)).chain(stream::pending());

        let running = tokio::spawn(dispatcher.run(events));
        tokio::time::sleep(run_for).await;
        token.cancel();
        running.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_events_map_to_handler_calls() {
        let handler = RecordingHandler::new();
        dispatch(
            handler.clone(),
            config(),
            vec![
                Event::Init,
                Event::InitApply(gs("game-1")),
                Event::InitDone,
                Event::Apply(gs("game-1")),
                Event::Apply(gs("game-2")),
                Event::Delete(gs("game-2")),
            ],
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(
            handler.calls(),
            vec![
                Call::Add("game-1".to_string()),
                Call::Add("game-2".to_string()),
                Call::Update("game-1".to_string()),
                Call::Delete("game-2".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_drops_pending_update() {
        let handler = RecordingHandler::with_delay(Duration::from_millis(100));
        dispatch(
            handler.clone(),
            config(),
            vec![
                Event::Init,
                Event::InitApply(gs("game-1")),
                Event::InitDone,
                Event::Apply(gs("game-1")),
                Event::Delete(gs("game-1")),
            ],
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(
            handler.calls(),
            vec![
                Call::Add("game-1".to_string()),
                Call::Delete("game-1".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_requeued() {
        let handler = RecordingHandler::new();
        handler.fail("game-1", 2, false);

        dispatch(
            handler.clone(),
            config(),
            vec![Event::Init, Event::InitApply(gs("game-1")), Event::InitDone],
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(
            handler.calls(),
            vec![
                Call::Add("game-1".to_string()),
                Call::Update("game-1".to_string()),
                Call::Update("game-1".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failures_are_not_requeued() {
        let handler = RecordingHandler::new();
        handler.fail("game-1", 5, true);

        dispatch(
            handler.clone(),
            config(),
            vec![Event::Init, Event::InitApply(gs("game-1")), Event::InitDone],
            Duration::from_secs(10),
        )
        .await;

        assert_eq!(handler.count("game-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_resync_redelivers_cached_objects() {
        let handler = RecordingHandler::new();
        let config = ControllerConfig {
            sync_period: Duration::from_secs(10),
            ..config()
        };

        dispatch(
            handler.clone(),
            config,
            vec![
                Event::Init,
                Event::InitApply(gs("game-1")),
                Event::InitApply(gs("game-2")),
                Event::InitDone,
            ],
            Duration::from_secs(25),
        )
        .await;

        assert_eq!(handler.count("game-1"), 3);
        assert_eq!(handler.count("game-2"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_object_keeps_a_single_retry_loop() {
        let handler = RecordingHandler::new();
        handler.fail("game-1", u32::MAX, false);
        let config = ControllerConfig {
            sync_period: Duration::from_secs(10),
            requeue_base_delay: Duration::from_secs(1),
            requeue_max_delay: Duration::from_secs(1),
            ..config()
        };

        dispatch(
            handler.clone(),
            config,
            vec![Event::Init, Event::InitApply(gs("game-1")), Event::InitDone],
            Duration::from_secs(100),
        )
        .await;

        // one attempt per second, resync ticks add nothing
        let calls = handler.count("game-1");
        assert!((95..=101).contains(&calls), "{calls} handler calls");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_event_cuts_requeue_delay_short() {
        let handler = RecordingHandler::new();
        handler.fail("game-1", 1, false);
        let config = ControllerConfig {
            requeue_base_delay: Duration::from_secs(100),
            requeue_max_delay: Duration::from_secs(100),
            ..config()
        };
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::new(handler.clone(), token.clone(), &config);

        let initial = stream::iter(vec![
            Ok::<_, watcher::Error>(Event::Init),
            Ok(Event::InitApply(gs("game-1"))),
            Ok(Event::InitDone),
        ]);
        let later = stream::once(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(Event::Apply(gs("game-1")))
        });
        let running = tokio::spawn(dispatcher.run(initial.chain(later).chain(stream::pending())));

        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
        running.await.unwrap();

        assert_eq!(
            handler.calls(),
            vec![
                Call::Add("game-1".to_string()),
                Call::Update("game-1".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let handler = RecordingHandler::with_delay(Duration::from_millis(100));
        let config = ControllerConfig {
            max_concurrent_reconciles: 2,
            ..config()
        };
        let mut events = vec![Event::Init];
        events.extend((0..6).map(|i| Event::InitApply(gs(&format!("game-{i}")))));
        events.push(Event::InitDone);

        dispatch(handler.clone(), config, events, Duration::from_secs(5)).await;

        assert_eq!(handler.calls().len(), 6);
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_the_dispatcher() {
        let handler = RecordingHandler::new();
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::new(handler.clone(), token.clone(), &config());

        token.cancel();
        tokio::time::timeout(
            Duration::from_secs(1),
            dispatcher.run(stream::pending::<Result<Event<GameServer>, watcher::Error>>()),
        )
        .await
        .unwrap();

        assert!(handler.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_when_the_watch_ends() {
        let handler = RecordingHandler::new();
        let dispatcher = Dispatcher::new(handler.clone(), CancellationToken::new(), &config());
        let events = stream::iter(vec![
            Ok::<_, watcher::Error>(Event::Init),
            Ok(Event::InitApply(gs("game-1"))),
            Ok(Event::InitDone),
        ]);

        dispatcher.run(events).await;

        assert_eq!(handler.calls(), vec![Call::Add("game-1".to_string())]);
    }
}
