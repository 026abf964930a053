use chrono::TimeZone;
use chrono_tz::Europe::Amsterdam;
use dynamic_prices::config::TibberConfig;
use dynamic_prices::error::{FetchError, RetryClass};
use dynamic_prices::price_infra::{PriceProvider, TibberConnector};
use dynamic_prices::types::{HourKey, Price};
use rust_decimal_macros::dec;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector(server: &MockServer) -> TibberConnector {
    let config = TibberConfig {
        base_url: format!("{}/v1-beta/gql", server.uri()),
        token: "test-token".to_string(),
        request_timeout_secs: 2,
        ..TibberConfig::default()
    };
    TibberConnector::new(&config, Amsterdam)
}

fn price_body() -> serde_json::Value {
    let today: Vec<_> = (0..24)
        .map(|h| {
            let total: f64 = format!("0.{}", 20 + h).parse().unwrap();
            serde_json::json!({ "total": total, "startsAt": format!("2024-01-15T{:02}:00:00.000+01:00", h) })
        })
        .collect();
    let tomorrow: Vec<_> = (0..24)
        .map(|h| serde_json::json!({ "total": 0.1, "startsAt": format!("2024-01-16T{:02}:00:00.000+01:00", h) }))
        .collect();
    serde_json::json!({
        "data": { "viewer": { "homes": [
            { "currentSubscription": { "priceInfo": { "today": today, "tomorrow": tomorrow } } }
        ] } }
    })
}

#[tokio::test]
async fn test_fetch_posts_authenticated_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1-beta/gql"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_string_contains("priceInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(price_body()))
        .expect(1)
        .mount(&server)
        .await;

    let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 13, 5, 0).unwrap();
    let series = connector(&server).fetch(now).await.unwrap();

    assert_eq!(series.len(), 48);
    let hour: HourKey = "2024-01-15T05:00".parse().unwrap();
    assert_eq!(series.get(&hour), Some(Price::new(dec!(0.25))));
    assert_eq!(series.retrieved_at, now.fixed_offset());
}

#[tokio::test]
async fn test_unauthorized_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&server)
        .await;

    let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap();
    let err = connector(&server).fetch(now).await.unwrap_err();

    assert!(matches!(err, FetchError::Permanent { .. }));
    assert_eq!(err.retry_class(), RetryClass::Permanent);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap();
    let err = connector(&server).fetch(now).await.unwrap_err();

    assert!(matches!(err, FetchError::Transient { .. }));
    assert_eq!(err.retry_class(), RetryClass::Retry);
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap();
    let err = connector(&server).fetch(now).await.unwrap_err();

    assert!(matches!(err, FetchError::Parse { .. }));
}

#[tokio::test]
async fn test_graphql_error_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": null,
            "errors": [{ "message": "Too many requests" }]
        })))
        .mount(&server)
        .await;

    let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap();
    let err = connector(&server).fetch(now).await.unwrap_err();

    assert!(matches!(err, FetchError::Provider { .. }));
    assert!(err.to_string().contains("Too many requests"));
}
