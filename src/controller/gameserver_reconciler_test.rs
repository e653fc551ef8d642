#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::controller::gameserver_reconciler::{
        readiness_decision, GameServerReconciler, ReadinessDecision,
    };
    use crate::controller::recorder::{EVENT_TYPE_WARNING, REASON_FAILED};
    use crate::controller::retry::Backoff;
    use crate::controller::test_support::{game_server, recorder, FakeStore, RecordingSink};
    use crate::crd::GameServerState;
    use crate::error::{Error, ValidationError};
    use crate::gameserver::{has_annotation, OCTOPS_ANNOTATION_INGRESS_READY};

    fn with_marker(value: Option<&str>) -> crate::crd::GameServer {
        match value {
            Some(v) => game_server("game-1", GameServerState::Ready, &[(OCTOPS_ANNOTATION_INGRESS_READY, v)]),
            None => game_server("game-1", GameServerState::Ready, &[]),
        }
    }

    #[test]
    fn test_readiness_decision_table() {
        assert_eq!(readiness_decision(&with_marker(None)), ReadinessDecision::Reconcile);
        assert_eq!(readiness_decision(&with_marker(Some(""))), ReadinessDecision::Reconcile);
        assert_eq!(readiness_decision(&with_marker(Some("false"))), ReadinessDecision::Reconcile);
        assert_eq!(readiness_decision(&with_marker(Some("true"))), ReadinessDecision::AlreadyReady);
        assert_eq!(readiness_decision(&with_marker(Some("True"))), ReadinessDecision::AlreadyReady);
        assert!(matches!(
            readiness_decision(&with_marker(Some("yes"))),
            ReadinessDecision::Malformed(ValidationError::InvalidBool { .. })
        ));
    }

    #[tokio::test]
    async fn test_false_marker_is_flipped() {
        let store = FakeStore::new();
        let sink = RecordingSink::new();
        let gs = with_marker(Some("false"));
        store.insert_game_server(&gs);

        let reconciler = GameServerReconciler::new(store.clone(), recorder(&sink), Backoff::default());
        let updated = reconciler.reconcile(&gs).await.unwrap();

        assert_eq!(has_annotation(&updated, OCTOPS_ANNOTATION_INGRESS_READY), Some("true"));
        assert_eq!(store.game_server_updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_marker_is_left_alone() {
        let store = FakeStore::new();
        let sink = RecordingSink::new();
        let gs = with_marker(Some("true"));
        store.insert_game_server(&gs);

        let reconciler = GameServerReconciler::new(store.clone(), recorder(&sink), Backoff::default());
        let unchanged = reconciler.reconcile(&gs).await.unwrap();

        assert_eq!(unchanged.metadata.resource_version, gs.metadata.resource_version);
        assert_eq!(store.writes(), 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_marker_set_by_another_writer_records_nothing() {
        let store = FakeStore::new();
        let sink = RecordingSink::new();
        store.insert_game_server(&with_marker(Some("true")));
        // the informer copy predates the other writer's flip
        let stale = with_marker(None);

        let reconciler = GameServerReconciler::new(store.clone(), recorder(&sink), Backoff::default());
        let current = reconciler.reconcile(&stale).await.unwrap();

        assert_eq!(has_annotation(&current, OCTOPS_ANNOTATION_INGRESS_READY), Some("true"));
        assert_eq!(store.writes(), 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_marker_is_overwritten_and_reported() {
        let store = FakeStore::new();
        let sink = RecordingSink::new();
        let gs = with_marker(Some("yes"));
        store.insert_game_server(&gs);

        let reconciler = GameServerReconciler::new(store.clone(), recorder(&sink), Backoff::default());
        let err = reconciler.reconcile(&gs).await.unwrap_err();

        assert!(err.is_validation());
        let stored = store.game_server("game-1").unwrap();
        assert_eq!(has_annotation(&stored, OCTOPS_ANNOTATION_INGRESS_READY), Some("true"));

        let warning = &sink.events()[0];
        assert_eq!(warning.event_type, EVENT_TYPE_WARNING);
        assert_eq!(warning.reason, REASON_FAILED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_are_retried() {
        let store = FakeStore::new();
        store.conflicts.store(2, Ordering::SeqCst);
        let sink = RecordingSink::new();
        let gs = with_marker(None);
        store.insert_game_server(&gs);

        let reconciler = GameServerReconciler::new(store.clone(), recorder(&sink), Backoff::default());
        let updated = reconciler.reconcile(&gs).await.unwrap();

        assert_eq!(has_annotation(&updated, OCTOPS_ANNOTATION_INGRESS_READY), Some("true"));
        assert_eq!(store.game_server_updates.load(Ordering::SeqCst), 1);
        // two conflicting writers bumped the version before ours landed
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_budget_exhaustion() {
        let store = FakeStore::new();
        store.conflicts.store(10, Ordering::SeqCst);
        let sink = RecordingSink::new();
        let gs = with_marker(None);
        store.insert_game_server(&gs);

        let reconciler =
            GameServerReconciler::new(store.clone(), recorder(&sink), Backoff::with_steps(3));
        let err = reconciler.reconcile(&gs).await.unwrap_err();

        assert!(matches!(err, Error::RetryExhausted { attempts: 3, .. }));
        assert!(err.is_retriable());
        assert_eq!(store.game_server_updates.load(Ordering::SeqCst), 0);
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 7);
    }
}
