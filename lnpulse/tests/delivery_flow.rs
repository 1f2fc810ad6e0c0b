//! End-to-end delivery against a local HTTP receiver.

mod common;

use std::time::Duration;

use common::{Receiver, TestApp, new_event};
use lnpulse::database::models::{AttemptStatus, EventType, JobState};
use lnpulse::database::repositories::{DeliveryRepository, NotificationRepository};
use lnpulse::delivery::RetryPolicy;
use lnpulse::notification::signing::{SIGNATURE_HEADER, verify};

fn statuses(rows: &[lnpulse::database::models::DeliveryAttemptDbModel]) -> Vec<(i64, String, Option<i64>)> {
    rows.iter()
        .map(|r| (r.attempt_number, r.status.clone(), r.http_status))
        .collect()
}

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_endpoint_recovers_while_other_succeeds() {
        let app = TestApp::new(5).await;
        let receiver = Receiver::start().await;
        receiver.script("flaky", &[503, 503, 200]);
        receiver.script("steady", &[204]);

        let flaky = app
            .add_webhook("acct-1", &receiver.url("flaky"), None, &[])
            .await;
        let steady = app
            .add_webhook("acct-1", &receiver.url("steady"), None, &[])
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::InvoiceSettled))
            .await
            .unwrap();
        assert_eq!(receipt.deliveries, 2);

        app.services.engine.run_once().await.unwrap();

        let deliveries = &app.services.deliveries;
        let flaky_rows = deliveries
            .history_for_pair(&receipt.event.id, &flaky.id)
            .await
            .unwrap();
        assert_eq!(
            statuses(&flaky_rows),
            vec![
                (1, "Pending".to_string(), Some(503)),
                (2, "Pending".to_string(), Some(503)),
                (3, "Succeeded".to_string(), Some(200)),
            ]
        );
        assert!(flaky_rows[0].next_retry_at.is_some());

        let steady_rows = deliveries
            .history_for_pair(&receipt.event.id, &steady.id)
            .await
            .unwrap();
        assert_eq!(
            statuses(&steady_rows),
            vec![(1, "Succeeded".to_string(), Some(204))]
        );

        assert_eq!(receiver.requests_to("flaky").len(), 3);
        assert_eq!(receiver.requests_to("steady").len(), 1);

        let job = deliveries
            .get_job(&receipt.event.id, &flaky.id)
            .await
            .unwrap();
        assert_eq!(job.get_state(), Some(JobState::Succeeded));
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let app = TestApp::new(5).await;
        let receiver = Receiver::start().await;
        receiver.script("gone", &[404]);
        let gone = app
            .add_webhook("acct-1", &receiver.url("gone"), None, &[])
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::ChannelClosed))
            .await
            .unwrap();
        app.services.engine.run_once().await.unwrap();

        let rows = app.services.deliveries.history(&receipt.event.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_status(), Some(AttemptStatus::Failed));
        assert_eq!(rows[0].http_status, Some(404));
        assert!(rows[0].next_retry_at.is_none());
        assert_eq!(receiver.requests_to("gone").len(), 1);

        let stats = app.services.deliveries.status_for(&gone.id).await.unwrap();
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.succeeded_count, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_endpoint_is_retried() {
        let app = TestApp::new(3).await;
        let receiver = Receiver::start().await;
        receiver.script("limited", &[429]);
        app.add_webhook("acct-1", &receiver.url("limited"), None, &[])
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::InvoiceCreated))
            .await
            .unwrap();
        app.services.engine.run_once().await.unwrap();

        let rows = app.services.deliveries.history(&receipt.event.id).await.unwrap();
        assert_eq!(
            statuses(&rows),
            vec![
                (1, "Pending".to_string(), Some(429)),
                (2, "Succeeded".to_string(), Some(200)),
            ]
        );
    }

    #[tokio::test]
    async fn test_redirect_is_retried_not_followed() {
        let app = TestApp::new(3).await;
        let receiver = Receiver::start().await;
        receiver.script("relocated", &[302]);
        app.add_webhook("acct-1", &receiver.url("relocated"), None, &[])
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::InvoiceSettled))
            .await
            .unwrap();
        app.services.engine.run_once().await.unwrap();

        let rows = app.services.deliveries.history(&receipt.event.id).await.unwrap();
        assert_eq!(
            statuses(&rows),
            vec![
                (1, "Pending".to_string(), Some(302)),
                (2, "Succeeded".to_string(), Some(200)),
            ]
        );
        assert_eq!(receiver.requests_to("relocated").len(), 2);
        assert!(receiver.requests_to("redirected").is_empty());
    }

    #[tokio::test]
    async fn test_attempts_stop_at_limit() {
        let app = TestApp::new(3).await;
        let receiver = Receiver::start().await;
        receiver.script("down", &[500, 502, 503, 504]);
        app.add_webhook("acct-1", &receiver.url("down"), None, &[])
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::InvoiceCreated))
            .await
            .unwrap();
        app.services.engine.run_once().await.unwrap();

        let rows = app.services.deliveries.history(&receipt.event.id).await.unwrap();
        assert_eq!(
            statuses(&rows),
            vec![
                (1, "Pending".to_string(), Some(500)),
                (2, "Pending".to_string(), Some(502)),
                (3, "Failed".to_string(), Some(503)),
            ]
        );
        assert_eq!(receiver.requests_to("down").len(), 3);
    }
}

mod signing_tests {
    use super::*;

    #[tokio::test]
    async fn test_signature_verifies_on_every_attempt() {
        let app = TestApp::new(5).await;
        let receiver = Receiver::start().await;
        receiver.script("signed", &[503]);
        app.add_webhook("acct-1", &receiver.url("signed"), Some("s3cret"), &[])
            .await;

        app.services
            .event_store
            .ingest(new_event("acct-1", EventType::InvoiceSettled))
            .await
            .unwrap();
        app.services.engine.run_once().await.unwrap();

        let requests = receiver.requests_to("signed");
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let signature = request.header(SIGNATURE_HEADER).unwrap();
            assert!(verify("s3cret", &request.body, signature));
            assert!(!verify("wrong", &request.body, signature));
        }
        assert_eq!(requests[0].body, requests[1].body);

        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["event_type"], "InvoiceSettled");
        assert_eq!(body["data"]["amount_msat"], 1000);
    }

    #[tokio::test]
    async fn test_unsigned_without_secret() {
        let app = TestApp::new(1).await;
        let receiver = Receiver::start().await;
        app.add_webhook("acct-1", &receiver.url("plain"), None, &[])
            .await;

        app.services
            .event_store
            .ingest(new_event("acct-1", EventType::InvoiceSettled))
            .await
            .unwrap();
        app.services.engine.run_once().await.unwrap();

        let requests = receiver.requests_to("plain");
        assert_eq!(requests.len(), 1);
        assert!(requests[0].header(SIGNATURE_HEADER).is_none());
        assert_eq!(requests[0].header("content-type"), Some("application/json"));
    }
}

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_each_matching_endpoint_gets_first_attempt() {
        let app = TestApp::new(5).await;
        let receiver = Receiver::start().await;
        let a = app
            .add_webhook("acct-1", &receiver.url("a"), None, &[])
            .await;
        let b = app
            .add_webhook(
                "acct-1",
                &receiver.url("b"),
                None,
                &[EventType::InvoiceSettled],
            )
            .await;
        // Filtered out by type, and by account.
        app.add_webhook("acct-1", &receiver.url("c"), None, &[EventType::ChannelOpened])
            .await;
        app.add_webhook("acct-2", &receiver.url("d"), None, &[]).await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::InvoiceSettled))
            .await
            .unwrap();
        assert_eq!(receipt.deliveries, 2);
        app.services.engine.run_once().await.unwrap();

        let rows = app.services.deliveries.history(&receipt.event.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        for id in [&a.id, &b.id] {
            let row = rows.iter().find(|r| &r.notification_id == id).unwrap();
            assert_eq!(row.attempt_number, 1);
            assert_eq!(row.get_status(), Some(AttemptStatus::Succeeded));
        }
        assert!(receiver.requests_to("c").is_empty());
        assert!(receiver.requests_to("d").is_empty());
    }

    #[tokio::test]
    async fn test_webhook_and_discord_deliver_independently() {
        let app = TestApp::with_retry(RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        })
        .await;
        let receiver = Receiver::start().await;
        receiver.script("hook", &[503]);
        receiver.script("discord", &[204]);
        let hook = app
            .add_webhook("acct-1", &receiver.url("hook"), Some("s3cret"), &[])
            .await;
        let discord = app
            .add_discord("acct-1", &receiver.url("discord"), Some("s3cret"))
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::ChannelClosed))
            .await
            .unwrap();
        assert_eq!(receipt.deliveries, 2);
        // The webhook retry is a second away, so one pass makes two attempts.
        assert_eq!(app.services.engine.run_once().await.unwrap(), 2);

        let rows = app.services.deliveries.history(&receipt.event.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.attempt_number == 1));

        let discord_row = rows.iter().find(|r| r.notification_id == discord.id).unwrap();
        assert_eq!(discord_row.get_status(), Some(AttemptStatus::Succeeded));
        assert_eq!(discord_row.http_status, Some(204));
        let discord_requests = receiver.requests_to("discord");
        assert_eq!(discord_requests.len(), 1);
        assert!(discord_requests[0].header(SIGNATURE_HEADER).is_none());
        let body: serde_json::Value = serde_json::from_slice(&discord_requests[0].body).unwrap();
        assert!(body["embeds"].is_array());

        let hook_row = rows.iter().find(|r| r.notification_id == hook.id).unwrap();
        assert_eq!(hook_row.get_status(), Some(AttemptStatus::Pending));
        assert_eq!(hook_row.http_status, Some(503));
        assert!(receiver.requests_to("hook")[0].header(SIGNATURE_HEADER).is_some());

        let job = app
            .services
            .deliveries
            .get_job(&receipt.event.id, &hook.id)
            .await
            .unwrap();
        assert_eq!(job.get_state(), Some(JobState::Pending));
        assert_eq!(job.attempt_number, 2);
        assert_eq!(Some(job.next_attempt_at), hook_row.next_retry_at);

        let (lo, hi) = app.services.engine.config().retry.jitter_window(1);
        let delay = job.next_attempt_at - hook_row.attempted_at;
        assert!(
            (lo.as_millis() as i64..=hi.as_millis() as i64).contains(&delay),
            "delay {}ms outside {:?}..={:?}",
            delay,
            lo,
            hi
        );
    }

    #[tokio::test]
    async fn test_deactivated_endpoint_gets_no_new_attempts() {
        let app = TestApp::new(5).await;
        let receiver = Receiver::start().await;
        let endpoint = app
            .add_webhook("acct-1", &receiver.url("paused"), None, &[])
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::ChannelOpened))
            .await
            .unwrap();
        app.services
            .notifications
            .set_active(&endpoint.id, false)
            .await
            .unwrap();

        app.services.engine.run_once().await.unwrap();

        assert!(receiver.requests_to("paused").is_empty());
        assert!(app.services.deliveries.history(&receipt.event.id).await.unwrap().is_empty());
        let job = app
            .services
            .deliveries
            .get_job(&receipt.event.id, &endpoint.id)
            .await
            .unwrap();
        assert_eq!(job.get_state(), Some(JobState::Cancelled));

        // Inactive endpoints are not matched for later events either.
        let later = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::ChannelOpened))
            .await
            .unwrap();
        assert_eq!(later.deliveries, 0);
    }

    #[tokio::test]
    async fn test_deactivation_during_attempt_keeps_its_result() {
        let app = TestApp::new(5).await;
        let receiver = Receiver::start().await;
        let hold = receiver.hold("slow");
        let endpoint = app
            .add_webhook("acct-1", &receiver.url("slow"), None, &[])
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::ChannelOpened))
            .await
            .unwrap();

        let engine = app.services.engine.clone();
        let pass = tokio::spawn(async move { engine.run_once().await });

        hold.entered().await;
        app.services
            .registry
            .deactivate("acct-1", &endpoint.id)
            .await
            .unwrap();
        hold.release();

        assert_eq!(pass.await.unwrap().unwrap(), 1);
        let rows = app.services.deliveries.history(&receipt.event.id).await.unwrap();
        assert_eq!(statuses(&rows), vec![(1, "Succeeded".to_string(), Some(200))]);
        let job = app
            .services
            .deliveries
            .get_job(&receipt.event.id, &endpoint.id)
            .await
            .unwrap();
        assert_eq!(job.get_state(), Some(JobState::Succeeded));
        assert_eq!(receiver.requests_to("slow").len(), 1);
    }

    #[tokio::test]
    async fn test_deactivation_between_retries_stops_delivery() {
        let app = TestApp::with_retry(RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
        })
        .await;
        let receiver = Receiver::start().await;
        receiver.script("failing", &[503, 503, 503]);
        let endpoint = app
            .add_webhook("acct-1", &receiver.url("failing"), None, &[])
            .await;

        let receipt = app
            .services
            .event_store
            .ingest(new_event("acct-1", EventType::ChannelClosed))
            .await
            .unwrap();

        // First attempt fails and the retry is scheduled an hour out.
        assert_eq!(app.services.engine.run_once().await.unwrap(), 1);
        assert_eq!(receiver.requests_to("failing").len(), 1);

        app.services
            .notifications
            .set_active(&endpoint.id, false)
            .await
            .unwrap();
        app.expire_backoff().await;
        app.services.engine.run_once().await.unwrap();

        assert_eq!(receiver.requests_to("failing").len(), 1);
        let rows = app.services.deliveries.history(&receipt.event.id).await.unwrap();
        assert_eq!(statuses(&rows), vec![(1, "Pending".to_string(), Some(503))]);
        let job = app
            .services
            .deliveries
            .get_job(&receipt.event.id, &endpoint.id)
            .await
            .unwrap();
        assert_eq!(job.get_state(), Some(JobState::Cancelled));
    }
}
