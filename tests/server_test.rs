//! Integration tests for the status HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use elderband_agent::server::{run, ServerConfig};
    use elderband_agent::stats::create_shared_stats;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_health_endpoint() {
        let stats = create_shared_stats();
        let (addr, shutdown_tx) = run(ServerConfig::new(0), stats).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_stats_endpoint_reflects_counters() {
        let stats = create_shared_stats();
        stats.record_message_received();
        stats.record_message_received();
        stats.record_emergency_triggered();

        let (addr, shutdown_tx) = run(ServerConfig::new(0), Arc::clone(&stats))
            .await
            .expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let body: serde_json::Value = reqwest::get(format!("http://{}/stats", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        assert_eq!(body["messages_received"], 2);
        assert_eq!(body["emergencies_triggered"], 1);
        assert_eq!(body["dispatches_sent"], 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (addr, shutdown_tx) = run(ServerConfig::new(0), create_shared_stats())
            .await
            .expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = reqwest::get(format!("http://{}/ingest", addr))
            .await
            .expect("Failed to send request");
        assert_eq!(response.status().as_u16(), 404);

        let _ = shutdown_tx.send(());
    }
}
