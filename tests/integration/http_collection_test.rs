// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::Arc;

use harvestrs::application::CollectionOrchestrator;
use harvestrs::config::settings::{SelectorSettings, SourceProfile};
use harvestrs::domain::models::record::RawRecord;
use harvestrs::domain::repositories::record_repository::RecordRepository;
use harvestrs::domain::services::extraction_service::SelectorExtractor;
use harvestrs::engines::factory::DefaultResourceFactory;
use harvestrs::infrastructure::storage::JsonLinesRecordRepository;
use harvestrs::utils::retry_policy::RetryBackoff;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::helpers::{names, test_settings, ScriptedMonitor};

const RESULTS: &str = r#"<html><head><title>Search results</title></head><body>
<div class="product"><a href="/item/1"><span class="title">Wireless Mouse</span></a><span class="price">$19.99</span></div>
<div class="product"><a href="/item/2"><span class="title">Gaming Mouse</span></a><span class="price">$49.00</span></div>
</body></html>"#;

fn shop(base_url: String) -> SourceProfile {
    SourceProfile {
        base_url,
        search_path: "/search?q={keyword}&page={page}".to_string(),
        min_delay_ms: 0,
        reliability_bonus: 0,
        user_agent: None,
        accept_language: None,
        selectors: SelectorSettings {
            product_container: Some(".product".to_string()),
            title: Some(".title".to_string()),
            price: Some(".price".to_string()),
            link: Some("a".to_string()),
            image: None,
            rating: None,
        },
    }
}

#[tokio::test]
async fn test_http_collection_persists_extracted_listings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "mouse"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "keyboard"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(2)
        .mount(&server)
        .await;

    let mut settings = test_settings(&[], 2, 1);
    settings.sources = HashMap::from([("shop".to_string(), shop(server.uri()))]);

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("records.jsonl");
    let repository = Arc::new(JsonLinesRecordRepository::open(&file).await.unwrap());

    let orchestrator = CollectionOrchestrator::new(
        settings.clone(),
        Arc::new(DefaultResourceFactory::from_settings(&settings)),
        Arc::new(SelectorExtractor::from_sources(&settings.sources)),
        repository.clone(),
        ScriptedMonitor::within_limits(),
    )
    .with_backoff(RetryBackoff::immediate());

    let summary = orchestrator
        .run_collection(&names(&["shop"]), &names(&["mouse", "keyboard"]), 1, 100)
        .await
        .unwrap();

    assert_eq!(summary.total_records, 2);
    assert_eq!(summary.tasks_completed, 1);
    assert_eq!(summary.tasks_failed, 2);
    assert_eq!(summary.tasks_abandoned, 1);
    assert_eq!(repository.current_record_count().await.unwrap(), 2);

    let content = tokio::fs::read_to_string(&file).await.unwrap();
    let records: Vec<RawRecord> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].field("title"), Some("Wireless Mouse"));
    assert_eq!(records[0].field("price"), Some("$19.99"));
    assert_eq!(
        records[0].field("url"),
        Some(format!("{}/item/1", server.uri()).as_str())
    );
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
        .mount(&server)
        .await;

    let mut settings = test_settings(&[], 1, 0);
    settings.sources = HashMap::from([("shop".to_string(), shop(server.uri()))]);
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("records.jsonl");

    for _ in 0..2 {
        let repository = Arc::new(JsonLinesRecordRepository::open(&file).await.unwrap());
        let orchestrator = CollectionOrchestrator::new(
            settings.clone(),
            Arc::new(DefaultResourceFactory::from_settings(&settings)),
            Arc::new(SelectorExtractor::from_sources(&settings.sources)),
            repository,
            ScriptedMonitor::within_limits(),
        );
        let summary = orchestrator
            .run_collection(&names(&["shop"]), &names(&["mouse"]), 1, 100)
            .await
            .unwrap();
        assert_eq!(summary.total_records, 2);
    }

    let content = tokio::fs::read_to_string(&file).await.unwrap();
    assert_eq!(content.lines().count(), 2);
}
