//! End-to-end pipeline tests over the in-memory bus and store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use murmur_bus::{MemoryBus, MessageBus};
use murmur_common::{ListeningTask, Platform, TaskStatus, Topic};
use murmur_contracts::{Message, MessageKind};
use murmur_scheduler::testing::MemoryStore;
use murmur_scheduler::{OutboxRelay, SchedulerStore, StatusTracker, TaskArranger};
use murmur_scouter::testing::FakeCapability;
use murmur_scouter::{
    CapabilityRegistry, DispatchPipeline, ResultSink, SearchCapability, TaskIngress,
};

fn topic(keywords: &[&str], platform: Platform) -> Topic {
    Topic {
        id: Uuid::new_v4(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        language: "en".to_string(),
        platform,
    }
}

fn queued_task(platform: Platform, query: &str) -> ListeningTask {
    let id = Uuid::new_v4();
    ListeningTask {
        id,
        correlation_id: id,
        topic_id: Uuid::new_v4(),
        platform,
        created_at: Utc::now(),
        updated_at: None,
        status: TaskStatus::Queued,
        query: query.to_string(),
    }
}

fn start_command(task: &ListeningTask) -> Message {
    Message::StartListeningTask {
        task_id: task.id,
        correlation_id: task.correlation_id,
        topic_id: task.topic_id,
        platform: task.platform,
        created_at: task.created_at,
        query: task.query.clone(),
    }
}

#[tokio::test]
async fn missing_capability_skips_without_failing_others() {
    // Only Bluesky is registered; a Mastodon task is dropped with no
    // failure event, and the Bluesky task completes normally.
    let bus = Arc::new(MemoryBus::new());
    let registry = Arc::new(
        CapabilityRegistry::new(vec![Arc::new(
            FakeCapability::new(Platform::Bluesky).with_found(1),
        )])
        .unwrap(),
    );

    let (task_tx, task_rx) = mpsc::channel(8);
    let (result_tx, mut result_rx) = mpsc::channel(8);

    task_tx.send(queued_task(Platform::Mastodon, "fediverse")).await.unwrap();
    task_tx.send(queued_task(Platform::Bluesky, "climate")).await.unwrap();
    drop(task_tx);

    DispatchPipeline::new(registry, bus.clone(), result_tx, 5, Duration::from_secs(5))
        .run(task_rx)
        .await;

    assert!(bus.published_of_kind(MessageKind::TaskFailed).await.is_empty());
    assert_eq!(bus.published_of_kind(MessageKind::TaskFinished).await.len(), 1);
    assert!(result_rx.recv().await.is_some());
    assert!(result_rx.recv().await.is_none());
}

#[tokio::test]
async fn in_flight_searches_never_exceed_the_concurrency_bound() {
    let bus = Arc::new(MemoryBus::new());
    let capability = Arc::new(
        FakeCapability::new(Platform::Bluesky).with_delay(Duration::from_millis(30)),
    );
    let registry = Arc::new(
        CapabilityRegistry::new(vec![capability.clone() as Arc<dyn SearchCapability>]).unwrap(),
    );

    let (task_tx, task_rx) = mpsc::channel(32);
    let (result_tx, _result_rx) = mpsc::channel(32);

    for i in 0..12 {
        task_tx
            .send(queued_task(Platform::Bluesky, &format!("query {i}")))
            .await
            .unwrap();
    }
    drop(task_tx);

    DispatchPipeline::new(registry, bus.clone(), result_tx, 3, Duration::from_secs(5))
        .run(task_rx)
        .await;

    assert_eq!(capability.queries().len(), 12, "every task was executed");
    assert!(
        capability.high_water() <= 3,
        "observed {} concurrent searches, bound is 3",
        capability.high_water()
    );
    assert_eq!(bus.published_of_kind(MessageKind::TaskFinished).await.len(), 12);
}

#[tokio::test]
async fn redelivered_command_produces_duplicate_items_for_downstream_dedup() {
    // At-least-once: the pipeline does not suppress duplicates. A command
    // delivered twice yields two ItemCreated events with the same
    // (platform, original_id) pair, which downstream dedups on.
    let bus = Arc::new(MemoryBus::new());
    let registry = Arc::new(
        CapabilityRegistry::new(vec![Arc::new(
            FakeCapability::new(Platform::Bluesky).with_found(1),
        )])
        .unwrap(),
    );

    let task = queued_task(Platform::Bluesky, "climate change");
    bus.publish(&start_command(&task)).await.unwrap();
    bus.publish(&start_command(&task)).await.unwrap();

    let (task_tx, task_rx) = mpsc::channel(8);
    let (result_tx, result_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingress = tokio::spawn(TaskIngress::new(bus.clone(), task_tx).run(shutdown_rx));
    let dispatch = tokio::spawn(
        DispatchPipeline::new(registry, bus.clone(), result_tx, 5, Duration::from_secs(5))
            .run(task_rx),
    );
    let sink = tokio::spawn(ResultSink::new(bus.clone()).run(result_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let items = loop {
        let items = bus.published_of_kind(MessageKind::ItemCreated).await;
        if items.len() == 2 {
            break items;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected 2 items, saw {}",
            items.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let _ = shutdown_tx.send(true);
    ingress.await.unwrap();
    dispatch.await.unwrap();
    sink.await.unwrap();

    let ids: Vec<_> = items
        .iter()
        .map(|m| match m {
            Message::ItemCreated {
                platform,
                original_id,
                ..
            } => (*platform, original_id.clone()),
            other => panic!("unexpected message {other:?}"),
        })
        .collect();
    assert_eq!(ids[0], ids[1], "duplicates must carry the same dedup key");
}

#[tokio::test]
async fn two_topics_flow_from_arrangement_to_success() {
    // The full loop: arranger → outbox relay → ingress → dispatch → sink,
    // with the status tracker folding events back into the task rows.
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryBus::new());

    store
        .insert_topics(&[
            topic(&["climate change", "global warming"], Platform::Bluesky),
            topic(&["fediverse"], Platform::Mastodon),
        ])
        .await
        .unwrap();

    let arranger = TaskArranger::new(store.clone(), Platform::all());
    assert_eq!(arranger.arrange_and_publish().await.unwrap(), 2);

    let relay = OutboxRelay::new(store.clone(), bus.clone(), Duration::from_millis(10));
    assert_eq!(relay.run_once().await.unwrap(), 2);

    let bluesky = Arc::new(FakeCapability::new(Platform::Bluesky).with_found(2));
    let mastodon = Arc::new(FakeCapability::new(Platform::Mastodon).with_found(1));
    let registry = Arc::new(
        CapabilityRegistry::new(vec![
            bluesky.clone() as Arc<dyn SearchCapability>,
            mastodon.clone() as Arc<dyn SearchCapability>,
        ])
        .unwrap(),
    );

    let (task_tx, task_rx) = mpsc::channel(8);
    let (result_tx, result_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingress = tokio::spawn(TaskIngress::new(bus.clone(), task_tx).run(shutdown_rx.clone()));
    let dispatch = tokio::spawn(
        DispatchPipeline::new(registry, bus.clone(), result_tx, 5, Duration::from_secs(5))
            .run(task_rx),
    );
    let sink = tokio::spawn(ResultSink::new(bus.clone()).run(result_rx));
    let tracker = tokio::spawn(
        StatusTracker::new(store.clone() as Arc<dyn SchedulerStore>)
            .run(bus.clone(), shutdown_rx),
    );

    // Wait for both tasks to reach a terminal state.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tasks = store.all_tasks().await;
        if tasks.len() == 2 && tasks.iter().all(|t| t.status == TaskStatus::Success) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "tasks did not reach Success in time: {:?}",
            tasks.iter().map(|t| t.status).collect::<Vec<_>>()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(bluesky.queries(), vec!["climate change global warming"]);
    assert_eq!(mastodon.queries(), vec!["fediverse"]);
    assert_eq!(bus.published_of_kind(MessageKind::ItemCreated).await.len(), 3);

    let _ = shutdown_tx.send(true);
    let _ = ingress.await;
    let _ = dispatch.await;
    let _ = sink.await;
    let _ = tracker.await;
}
