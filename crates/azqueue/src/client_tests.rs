//! Tests for the queue client.

use super::*;
use crate::error::{SerializationError, ServiceError};
use crate::providers::{InMemoryQueueService, ServiceOperation};
use serde::ser::Error as _;
use serde::Deserialize;
use std::cell::Cell;
use std::io;

fn fast_config() -> QueueClientConfig {
    let mut config = QueueClientConfig::default();
    config.retry.max_retries = 2;
    config.retry.delay_seconds = 1;
    config
}

fn client_with(
    service: &Arc<InMemoryQueueService>,
    name: Option<&str>,
    config: &QueueClientConfig,
) -> QueueClient {
    let entity = EntityRef::new(service.clone(), name).unwrap();
    QueueClient::new(entity, config)
}

fn client_for(service: &Arc<InMemoryQueueService>, name: Option<&str>) -> QueueClient {
    client_with(service, name, &fast_config())
}

async fn service_with_queue(name: &str) -> Arc<InMemoryQueueService> {
    let service = Arc::new(InMemoryQueueService::default());
    service.create_queue(name, true).await.unwrap();
    service
}

fn connection_reset() -> ServiceError {
    ServiceError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    id: u32,
    kind: String,
}

fn event(id: u32) -> Event {
    Event {
        id,
        kind: "created".to_string(),
    }
}

struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom("refusing to serialize"))
    }
}

// ============================================================================
// Queue Management Tests
// ============================================================================

mod queue_management {
    use super::*;

    #[tokio::test]
    async fn test_create_exists_size_delete() {
        let service = Arc::new(InMemoryQueueService::default());
        let client = client_for(&service, Some("orders"));

        assert!(!client.exists().await.unwrap());
        assert!(client.create(false).await.unwrap());
        assert!(!client.create(false).await.unwrap(), "second create reports existing");
        assert!(client.exists().await.unwrap());

        client.push(b"one", true).await.unwrap();
        client.push(b"two", true).await.unwrap();
        assert_eq!(client.size().await.unwrap(), 2);

        assert!(client.delete(true).await.unwrap());
        assert!(!client.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_requires_exact_name() {
        let service = service_with_queue("orders-dlq").await;
        let client = client_for(&service, Some("orders"));

        assert!(!client.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_name_is_normalized() {
        let service = service_with_queue("ordersv2").await;
        let client = client_for(&service, Some("orders_v.2"));

        assert_eq!(client.name().map(QueueName::as_str), Some("ordersv2"));
        assert!(client.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_create_conflict_when_fail_if_exists() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));

        let error = client.create(true).await.unwrap_err();

        assert!(matches!(error, QueueError::Service { .. }));
        assert_eq!(error.status_code(), 500);
    }

    #[tokio::test]
    async fn test_delete_missing_queue() {
        let service = Arc::new(InMemoryQueueService::default());
        let client = client_for(&service, Some("ghost"));

        assert!(!client.delete(false).await.unwrap());

        let error = client.delete(true).await.unwrap_err();
        assert!(matches!(error, QueueError::NotFound { .. }));
        assert_eq!(service.calls(ServiceOperation::DeleteQueue), 2);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_queue_race() {
        let service = service_with_queue("orders").await;
        service.fail_next(
            ServiceOperation::DeleteQueue,
            ServiceError::MissingResource("QueueNotFound".to_string()),
        );
        let client = client_for(&service, Some("orders"));

        assert!(!client.delete(false).await.unwrap());
    }

    #[tokio::test]
    async fn test_suppressed_status_yields_defaults() {
        let service = Arc::new(InMemoryQueueService::default());
        let mut config = fast_config();
        config.retry.suppress = vec![404];
        let client = client_with(&service, Some("ghost"), &config);

        assert_eq!(client.size().await.unwrap(), 0);
        assert!(!client.purge().await.unwrap());
        assert!(!client.push(b"lost", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_empties_queue() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        client.push(b"a", true).await.unwrap();

        assert!(client.purge().await.unwrap());
        assert_eq!(client.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_queues_needs_no_name() {
        let service = service_with_queue("orders").await;
        service.create_queue("invoices", true).await.unwrap();
        let client = client_for(&service, None);

        let names: Vec<_> = client
            .list_queues()
            .await
            .unwrap()
            .into_iter()
            .map(|queue| queue.name)
            .collect();

        assert_eq!(names, vec!["invoices", "orders"]);
    }

    #[tokio::test]
    async fn test_unbound_client_fails_before_remote_call() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, None);

        let error = client.size().await.unwrap_err();

        assert!(matches!(error, QueueError::PreconditionFailed { ref field } if field == "queue_name"));
        assert_eq!(error.status_code(), 400);
        assert_eq!(service.calls(ServiceOperation::GetQueueMetadata), 0);
    }

    #[tokio::test]
    async fn test_select_switches_queue() {
        let service = service_with_queue("orders").await;
        let mut client = client_for(&service, None);

        client.select(Some("orders")).unwrap();
        assert!(client.exists().await.unwrap());

        assert!(matches!(
            client.select(Some("bad name!")),
            Err(QueueError::Validation(_))
        ));
        client.select(None).unwrap();
        assert!(client.name().is_none());
    }
}

// ============================================================================
// Reading Tests
// ============================================================================

mod reading {
    use super::*;

    #[tokio::test]
    async fn test_push_then_pop_round_trips_arbitrary_bytes() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        let payload = [0u8, 159, 146, 150, 255, b'\n'];

        assert!(client.push(&payload, true).await.unwrap());
        let popped = client
            .pop_messages(&GetMessagesOptions::default().with_count(1))
            .await
            .unwrap();

        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].body.as_ref(), payload.as_slice());
        assert_eq!(client.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_plain_text_push_and_get() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));

        client.push("hello".as_bytes(), false).await.unwrap();
        let messages = client
            .get_messages(&GetMessagesOptions::default().with_decode_base64(false))
            .await
            .unwrap();

        assert_eq!(messages[0].body_text(), Some("hello"));
        assert!(messages[0].pop_receipt.is_some());
    }

    #[tokio::test]
    async fn test_plain_text_push_requires_utf8() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));

        let error = client.push(&[0xff, 0xfe], false).await.unwrap_err();

        assert!(matches!(error, QueueError::Serialization(_)));
        assert_eq!(service.calls(ServiceOperation::PutMessage), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_blocking_get_fetches_once() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        let start = Instant::now();

        let messages = client
            .get_messages(&GetMessagesOptions::default().non_blocking())
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert_eq!(service.calls(ServiceOperation::GetMessages), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_get_backs_off_until_predicate_stops() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        let checks = Cell::new(0u32);
        let start = Instant::now();

        let messages = client
            .get_messages_until(&GetMessagesOptions::default(), || {
                checks.set(checks.get() + 1);
                checks.get() <= 3
            })
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert_eq!(service.calls(ServiceOperation::GetMessages), 3);
        assert_eq!(checks.get(), 4);
        // 2s + 4s + 8s of backoff after the three empty fetches
        assert_eq!(start.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_false_before_first_fetch() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));

        let messages = client
            .get_messages_until(&GetMessagesOptions::default(), || false)
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert_eq!(service.calls(ServiceOperation::GetMessages), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_get_returns_message_that_arrives_later() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        let producer = Arc::clone(&service);
        let start = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            producer.put_message("orders", "bGF0ZQ==").await.unwrap();
        });

        let messages = client
            .get_messages(&GetMessagesOptions::default())
            .await
            .unwrap();

        assert_eq!(messages[0].body_text(), Some("late"));
        // Fetches at 0s, 2s and 6s
        assert_eq!(service.calls(ServiceOperation::GetMessages), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped_by_max_backoff() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        let checks = Cell::new(0u32);
        let start = Instant::now();

        client
            .get_messages_until(
                &GetMessagesOptions::default().with_max_backoff(Duration::from_secs(3)),
                || {
                    checks.set(checks.get() + 1);
                    checks.get() <= 3
                },
            )
            .await
            .unwrap();

        // 2s, then 3s twice
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_failures_are_retried() {
        let service = service_with_queue("orders").await;
        service.put_message("orders", "b2s=").await.unwrap();
        service.fail_times(ServiceOperation::GetMessages, 2, connection_reset);
        let client = client_for(&service, Some("orders"));
        let start = Instant::now();

        let messages = client
            .get_messages(&GetMessagesOptions::default())
            .await
            .unwrap();

        assert_eq!(messages[0].body_text(), Some("ok"));
        assert_eq!(service.calls(ServiceOperation::GetMessages), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_decode_failure_is_not_retried() {
        let service = service_with_queue("orders").await;
        service.put_message("orders", "not base64!").await.unwrap();
        let client = client_for(&service, Some("orders"));

        let error = client
            .get_messages(&GetMessagesOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, QueueError::Decode(_)));
        assert_eq!(error.status_code(), 500);
        assert_eq!(service.calls(ServiceOperation::GetMessages), 1);
    }

    #[tokio::test]
    async fn test_count_out_of_range_is_rejected_locally() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));

        let error = client
            .get_messages(&GetMessagesOptions::default().with_count(33))
            .await
            .unwrap_err();

        assert!(matches!(error, QueueError::Validation(_)));
        assert!(client.peek_messages(0, true).await.is_err());
        assert_eq!(service.calls(ServiceOperation::GetMessages), 0);
        assert_eq!(service.calls(ServiceOperation::PeekMessages), 0);
    }

    #[tokio::test]
    async fn test_peek_leaves_messages_in_place() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        client.push(b"a", true).await.unwrap();
        client.push(b"b", true).await.unwrap();

        let peeked = client.peek_messages(32, true).await.unwrap();

        assert_eq!(peeked.len(), 2);
        assert!(peeked.iter().all(|m| m.pop_receipt.is_none()));
        assert_eq!(peeked[0].body.as_ref(), b"a");
        assert_eq!(client.size().await.unwrap(), 2);
    }

    #[test]
    fn test_default_get_options_follow_config() {
        let service = Arc::new(InMemoryQueueService::default());
        let mut config = fast_config();
        config.polling.batch_size = 4;
        config.polling.visibility_timeout_seconds = Some(90);
        let client = client_with(&service, Some("orders"), &config);

        let options = client.default_get_options();

        assert_eq!(options.count, 4);
        assert_eq!(options.visibility_timeout, Some(Duration::from_secs(90)));
        assert_eq!(options.max_backoff, Duration::from_secs(120));
        assert!(options.blocking);
        assert!(options.decode_base64);
    }
}

// ============================================================================
// Deletion Tests
// ============================================================================

mod deletion {
    use super::*;

    #[tokio::test]
    async fn test_delete_message_without_receipt_makes_no_remote_call() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        client.push(b"a", true).await.unwrap();
        let peeked = client.peek_messages(1, true).await.unwrap();

        let error = client.delete_message(&peeked[0]).await.unwrap_err();

        assert!(matches!(error, QueueError::PreconditionFailed { ref field } if field == "pop_receipt"));
        assert_eq!(service.calls(ServiceOperation::DeleteMessage), 0);
    }

    #[tokio::test]
    async fn test_delete_message_without_id_makes_no_remote_call() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        let message = Message::new(crate::message::MessageId::new(""), "x".into())
            .with_pop_receipt(crate::message::PopReceipt::new("receipt"));

        let error = client.delete_message(&message).await.unwrap_err();

        assert!(matches!(error, QueueError::PreconditionFailed { ref field } if field == "message_id"));
        assert_eq!(service.calls(ServiceOperation::DeleteMessage), 0);
    }

    #[tokio::test]
    async fn test_delete_message_after_get() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        client.push(b"a", true).await.unwrap();
        let messages = client
            .get_messages(&GetMessagesOptions::default())
            .await
            .unwrap();

        assert!(client.delete_message(&messages[0]).await.unwrap());
        assert_eq!(client.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pop_reports_every_failed_delete() {
        let service = service_with_queue("orders").await;
        let client = client_for(&service, Some("orders"));
        client.push(b"first", true).await.unwrap();
        client.push(b"second", true).await.unwrap();
        service.fail_next(
            ServiceOperation::DeleteMessage,
            ServiceError::MissingResource("MessageNotFound".to_string()),
        );

        let error = client
            .pop_messages(&GetMessagesOptions::default())
            .await
            .unwrap_err();

        assert_eq!(error.status_code(), 404);
        match error {
            QueueError::DeleteFailed { deleted, failures } => {
                assert_eq!(deleted.len(), 1);
                assert_eq!(deleted[0].body.as_ref(), b"second");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].message.body.as_ref(), b"first");
                assert!(matches!(failures[0].error, QueueError::NotFound { .. }));
            }
            other => panic!("Expected DeleteFailed, got: {other:?}"),
        }
        assert_eq!(service.calls(ServiceOperation::DeleteMessage), 2);
    }

    #[tokio::test]
    async fn test_suppressed_delete_is_not_reported_as_deleted() {
        let service = service_with_queue("orders").await;
        let mut config = fast_config();
        config.retry.suppress = vec![500];
        let client = client_with(&service, Some("orders"), &config);
        client.push(b"first", true).await.unwrap();
        client.push(b"second", true).await.unwrap();
        service.fail_next(
            ServiceOperation::DeleteMessage,
            ServiceError::Http {
                status: 400,
                message: "PopReceiptMismatch".to_string(),
            },
        );

        let error = client
            .pop_messages(&GetMessagesOptions::default())
            .await
            .unwrap_err();

        match error {
            QueueError::DeleteFailed { deleted, failures } => {
                assert_eq!(deleted.len(), 1);
                assert_eq!(deleted[0].body.as_ref(), b"second");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].message.body.as_ref(), b"first");
                assert!(matches!(
                    failures[0].error,
                    QueueError::DeleteSuppressed { status_code: 500 }
                ));
            }
            other => panic!("Expected DeleteFailed, got: {other:?}"),
        }
        assert_eq!(client.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_delete_message_returns_false() {
        let service = service_with_queue("orders").await;
        let mut config = fast_config();
        config.retry.suppress = vec![500];
        let client = client_with(&service, Some("orders"), &config);
        client.push(b"a", true).await.unwrap();
        let messages = client
            .get_messages(&GetMessagesOptions::default())
            .await
            .unwrap();
        service.fail_next(
            ServiceOperation::DeleteMessage,
            ServiceError::Http {
                status: 400,
                message: "PopReceiptMismatch".to_string(),
            },
        );

        assert!(!client.delete_message(&messages[0]).await.unwrap());
        assert_eq!(client.size().await.unwrap(), 1);
    }
}

// ============================================================================
// Packed Delivery Tests
// ============================================================================

mod packed_delivery {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_payloads_within_interval_share_one_message() {
        let service = service_with_queue("events").await;
        let mut client = client_for(&service, Some("events"));

        for id in 1..=3 {
            client.push_packed(&event(id)).await.unwrap();
        }
        assert_eq!(service.calls(ServiceOperation::PutMessage), 0);
        assert_eq!(client.pending_payloads(), 3);

        assert_eq!(client.flush().await.unwrap(), 3);
        assert_eq!(service.calls(ServiceOperation::PutMessage), 1);
        assert_eq!(client.pending_payloads(), 0);

        let events: Vec<Event> = client
            .pop_packed_messages(&GetMessagesOptions::default())
            .await
            .unwrap();
        assert_eq!(events, vec![event(1), event(2), event(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_after_interval_sends_immediately() {
        let service = service_with_queue("events").await;
        let mut client = client_for(&service, Some("events"));
        client.push_packed(&event(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        client.push_packed(&event(2)).await.unwrap();

        assert_eq!(service.calls(ServiceOperation::PutMessage), 2);
        assert_eq!(client.pending_payloads(), 0);
        assert_eq!(client.size().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_limit_seals_before_crossing_payload() {
        let service = service_with_queue("events").await;
        let mut config = fast_config();
        config.batching.max_batch_bytes = 100;
        let mut client = client_with(&service, Some("events"), &config);
        let payload = "x".repeat(38);

        client.push_packed(&payload).await.unwrap();
        client.push_packed(&payload).await.unwrap();
        assert_eq!(service.calls(ServiceOperation::PutMessage), 0);

        client.push_packed(&payload).await.unwrap();
        assert_eq!(service.calls(ServiceOperation::PutMessage), 1);
        assert_eq!(client.pending_payloads(), 1);

        assert_eq!(client.flush().await.unwrap(), 1);
        let payloads: Vec<String> = client
            .pop_packed_messages(&GetMessagesOptions::default())
            .await
            .unwrap();
        assert_eq!(payloads.len(), 3);
    }

    #[tokio::test]
    async fn test_unserializable_payload_leaves_buffer_untouched() {
        let service = service_with_queue("events").await;
        let mut client = client_for(&service, Some("events"));
        client.push_packed(&event(1)).await.unwrap();

        let error = client.push_packed(&Unserializable).await.unwrap_err();

        assert!(matches!(error, QueueError::Serialization(_)));
        assert_eq!(error.status_code(), 400);
        assert_eq!(client.pending_payloads(), 1);
        assert_eq!(client.flush().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_payloads_for_next_flush() {
        let service = service_with_queue("events").await;
        let mut client = client_for(&service, Some("events"));
        for id in 1..=3 {
            client.push_packed(&event(id)).await.unwrap();
        }
        service.fail_times(ServiceOperation::PutMessage, 3, connection_reset);

        let error = client.flush().await.unwrap_err();

        assert!(matches!(error, QueueError::Connection { .. }));
        assert_eq!(service.calls(ServiceOperation::PutMessage), 3);
        assert_eq!(client.pending_payloads(), 3);

        assert_eq!(client.flush().await.unwrap(), 3);
        assert_eq!(client.pending_payloads(), 0);
        assert_eq!(client.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_refused_before_buffering() {
        let service = service_with_queue("events").await;
        let mut client = client_for(&service, Some("events"));

        let error = client.push_packed(&"x".repeat(50_000)).await.unwrap_err();

        assert!(matches!(
            error,
            QueueError::Serialization(SerializationError::PayloadTooLarge {
                size: 50_004,
                limit: 40_000,
            })
        ));
        assert_eq!(error.status_code(), 400);
        assert_eq!(client.pending_payloads(), 0);

        for id in 1..=3 {
            client.push_packed(&event(id)).await.unwrap();
        }
        assert_eq!(client.flush().await.unwrap(), 3);

        let events: Vec<Event> = client
            .pop_packed_messages(&GetMessagesOptions::default())
            .await
            .unwrap();
        assert_eq!(events, vec![event(1), event(2), event(3)]);
    }

    #[tokio::test]
    async fn test_refused_batch_is_handed_back_and_later_batches_flow() {
        let service = service_with_queue("events").await;
        let mut client = client_for(&service, Some("events"));
        client.push_packed(&event(1)).await.unwrap();
        client.push_packed(&event(2)).await.unwrap();
        service.fail_next(
            ServiceOperation::PutMessage,
            ServiceError::Http {
                status: 413,
                message: "RequestBodyTooLarge".to_string(),
            },
        );

        let error = client.flush().await.unwrap_err();

        assert_eq!(error.status_code(), 500);
        match error {
            QueueError::BatchRejected { batch, error } => {
                let refused: Vec<Event> = serde_json::from_str(&batch.body()).unwrap();
                assert_eq!(refused, vec![event(1), event(2)]);
                assert!(matches!(*error, QueueError::Service { .. }));
            }
            other => panic!("Expected BatchRejected, got: {other:?}"),
        }
        assert_eq!(service.calls(ServiceOperation::PutMessage), 1);
        assert_eq!(client.pending_payloads(), 0);

        client.push_packed(&event(3)).await.unwrap();
        assert_eq!(client.flush().await.unwrap(), 1);
        assert_eq!(client.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_of_empty_buffer_sends_nothing() {
        let service = service_with_queue("events").await;
        let mut client = client_for(&service, Some("events"));

        assert_eq!(client.flush().await.unwrap(), 0);
        assert_eq!(service.calls(ServiceOperation::PutMessage), 0);
    }

    #[tokio::test]
    async fn test_packed_push_requires_queue_name() {
        let service = Arc::new(InMemoryQueueService::default());
        let mut client = client_for(&service, None);

        let error = client.push_packed(&event(1)).await.unwrap_err();

        assert!(matches!(error, QueueError::PreconditionFailed { .. }));
        assert_eq!(client.pending_payloads(), 0);
    }

    #[tokio::test]
    async fn test_malformed_packed_body_is_a_decode_error() {
        let service = service_with_queue("events").await;
        let client = client_for(&service, Some("events"));
        client.push(br#"{"not":"an array"}"#, true).await.unwrap();

        let result: Result<Vec<Event>, _> = client
            .pop_packed_messages(&GetMessagesOptions::default())
            .await;

        assert!(matches!(result, Err(QueueError::Decode(_))));
        assert_eq!(service.calls(ServiceOperation::DeleteMessage), 0);
        assert_eq!(client.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_does_not_cost_valid_payloads() {
        let service = service_with_queue("events").await;
        let mut client = client_for(&service, Some("events"));
        client.push_packed(&event(1)).await.unwrap();
        client.flush().await.unwrap();
        client.push(br#"{"not":"an array"}"#, true).await.unwrap();

        let events: Vec<Event> = client
            .pop_packed_messages(&GetMessagesOptions::default())
            .await
            .unwrap();

        assert_eq!(events, vec![event(1)]);
        assert_eq!(service.calls(ServiceOperation::DeleteMessage), 1);
        // The malformed message stays on the queue for inspection
        assert_eq!(client.size().await.unwrap(), 1);
        assert!(client.peek_messages(1, true).await.unwrap().is_empty());
    }
}

// ============================================================================
// Factory Tests
// ============================================================================

mod factory {
    use super::*;

    #[test]
    fn test_factory_rejects_invalid_config() {
        let service: Arc<dyn QueueService> = Arc::new(InMemoryQueueService::default());
        let mut config = QueueClientConfig::default();
        config.polling.batch_size = 0;

        assert!(QueueClientFactory::new(service, config).is_err());
    }

    #[tokio::test]
    async fn test_factory_clients_share_the_service() {
        let service = Arc::new(InMemoryQueueService::default());
        let factory = QueueClientFactory::new(service.clone(), fast_config()).unwrap();

        let producer = factory.queue(Some("orders")).unwrap();
        producer.create(false).await.unwrap();
        producer.push(b"hi", true).await.unwrap();

        let consumer = factory.queue(Some("orders")).unwrap();
        assert_eq!(consumer.size().await.unwrap(), 1);
        assert_eq!(consumer.retry_policy().max_retries, 2);
    }

    #[test]
    fn test_factory_rejects_invalid_queue_name() {
        let factory = QueueClientFactory::new(
            Arc::new(InMemoryQueueService::default()),
            QueueClientConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            factory.queue(Some("___")),
            Err(QueueError::Validation(_))
        ));
    }
}
