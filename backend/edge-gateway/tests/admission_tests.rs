//! Admission control over HTTP plus counter properties.

mod common;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{test, App};
use proptest::prelude::*;
use serde_json::json;

use common::{mint_token, status_of, FakeFleet, FakeOverflow, HarnessBuilder, TENANT};
use edge_gateway::admission::limits::{LimitEntry, LimitOrigin, TenantLimitCache, TenantLimits};
use edge_gateway::admission::{AdmissionController, AdmissionKey, AdmissionSettings};
use edge_gateway::auth::Principal;
use edge_gateway::bridge;

fn health_query() -> serde_json::Value {
    json!({ "query": "{ health }" })
}

#[actix_web::test]
async fn test_tenant_ceiling_then_429_with_retry_after() {
    let harness = HarnessBuilder::default()
        .fleet(FakeFleet::with_limit(TENANT, 3))
        .build();
    harness
        .state
        .admission
        .limits()
        .refresh_now(TENANT)
        .await
        .unwrap();

    let state = harness.state.clone();
    let app = test::init_service(App::new().configure(|cfg| bridge::configure(cfg, state))).await;
    let token = mint_token("user-1", TENANT, 3600);

    for expected_remaining in ["2", "1", "0"] {
        let req = test::TestRequest::post()
            .uri("/graphql")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(health_query())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "3");
        assert_eq!(
            resp.headers().get("x-ratelimit-remaining").unwrap(),
            expected_remaining
        );
    }

    let req = test::TestRequest::post()
        .uri("/graphql")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(health_query())
        .to_request();
    let err = test::try_call_service(&app, req)
        .await
        .err()
        .expect("fourth request should be rejected");
    let resp = err.error_response();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = resp
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(harness.overflow.calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn test_overflow_admits_without_touching_counter() {
    let harness = HarnessBuilder::default()
        .fleet(FakeFleet::with_limit(TENANT, 2))
        .overflow(FakeOverflow::paying(25))
        .build();
    harness
        .state
        .admission
        .limits()
        .refresh_now(TENANT)
        .await
        .unwrap();

    let state = harness.state.clone();
    let app = test::init_service(App::new().configure(|cfg| bridge::configure(cfg, state))).await;
    let token = mint_token("user-1", TENANT, 3600);

    for _ in 0..5 {
        let req = test::TestRequest::post()
            .uri("/graphql")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(health_query())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let req = test::TestRequest::post()
        .uri("/graphql")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(health_query())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.headers().get("x-overflow-cost").unwrap(), "25");

    let key = AdmissionKey::for_principal(
        &edge_gateway::auth::Principal::builder(edge_gateway::auth::AuthScheme::Bearer, TENANT)
            .build(),
        "unknown",
    );
    let usage = harness.state.admission.usage(&key).unwrap();
    assert_eq!(usage.count, 2);
    assert_eq!(harness.overflow.calls.load(Ordering::SeqCst), 4);
}

fn anonymous_from(peer: &str, forwarded_for: Option<&str>) -> actix_http::Request {
    let mut req = test::TestRequest::post()
        .uri("/graphql")
        .peer_addr(SocketAddr::new(peer.parse().unwrap(), 40_000))
        .set_json(health_query());
    if let Some(forwarded_for) = forwarded_for {
        req = req.insert_header(("X-Forwarded-For", forwarded_for.to_string()));
    }
    req.to_request()
}

#[actix_web::test]
async fn test_anonymous_callers_are_limited_per_ip() {
    let harness = HarnessBuilder::default().default_ceiling(1).build();
    let state = harness.state.clone();
    let app = test::init_service(App::new().configure(|cfg| bridge::configure(cfg, state))).await;

    assert_eq!(
        status_of(test::try_call_service(&app, anonymous_from("203.0.113.1", None)).await),
        StatusCode::OK
    );
    assert_eq!(
        status_of(test::try_call_service(&app, anonymous_from("203.0.113.2", None)).await),
        StatusCode::OK
    );
    assert_eq!(
        status_of(test::try_call_service(&app, anonymous_from("203.0.113.1", None)).await),
        StatusCode::TOO_MANY_REQUESTS
    );
    // Anonymous callers without a payment header never reach the payment service.
    assert_eq!(harness.overflow.calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn test_rotating_forwarded_for_from_untrusted_peer_shares_one_budget() {
    let harness = HarnessBuilder::default()
        .default_ceiling(1)
        .trusted_proxies("10.0.0.0/8")
        .build();
    let state = harness.state.clone();
    let app = test::init_service(App::new().configure(|cfg| bridge::configure(cfg, state))).await;

    let mut admitted = 0;
    for i in 0..20 {
        let forwarded = format!("10.0.0.{i}");
        let req = anonymous_from("198.51.100.9", Some(&forwarded));
        if status_of(test::try_call_service(&app, req).await) == StatusCode::OK {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 1);
    let key = AdmissionKey::for_principal(&Principal::anonymous(), "198.51.100.9");
    assert_eq!(harness.state.admission.usage(&key).unwrap().count, 1);
}

#[actix_web::test]
async fn test_trusted_proxy_forwards_client_address() {
    let harness = HarnessBuilder::default()
        .default_ceiling(1)
        .trusted_proxies("10.0.0.0/8")
        .build();
    let state = harness.state.clone();
    let app = test::init_service(App::new().configure(|cfg| bridge::configure(cfg, state))).await;

    for client in ["203.0.113.1", "203.0.113.2"] {
        let forwarded = format!("{client}, 10.0.0.2");
        let req = anonymous_from("10.0.0.1", Some(&forwarded));
        assert_eq!(status_of(test::try_call_service(&app, req).await), StatusCode::OK);
    }

    let req = anonymous_from("10.0.0.1", Some("203.0.113.1"));
    assert_eq!(
        status_of(test::try_call_service(&app, req).await),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[actix_web::test]
async fn test_fleet_outage_falls_back_to_default_ceiling() {
    let harness = HarnessBuilder::default()
        .fleet(FakeFleet::down())
        .default_ceiling(2)
        .build();
    let state = harness.state.clone();
    let app = test::init_service(App::new().configure(|cfg| bridge::configure(cfg, state))).await;
    let token = mint_token("user-1", TENANT, 3600);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let req = test::TestRequest::post()
            .uri("/graphql")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(health_query())
            .to_request();
        statuses.push(status_of(test::try_call_service(&app, req).await));
    }

    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
}

fn controller() -> Arc<AdmissionController> {
    let limits = TenantLimitCache::new(
        Arc::new(FakeFleet::down()),
        TenantLimits {
            ceiling: 100,
            window: Duration::from_secs(60),
        },
        Duration::from_secs(300),
        Duration::from_millis(100),
    );
    AdmissionController::new(
        limits,
        Arc::new(FakeOverflow::denying()),
        AdmissionSettings {
            overflow_enabled: false,
            overflow_timeout: Duration::from_millis(100),
            idle_eviction: Duration::from_secs(300),
        },
    )
}

fn entry(ceiling: u32) -> LimitEntry {
    LimitEntry {
        tenant_id: TENANT.to_string(),
        ceiling,
        window: Duration::from_secs(3600),
        refreshed_at: None,
        origin: LimitOrigin::Default,
    }
}

proptest! {
    #[::core::prelude::v1::test]
    fn prop_accepts_never_exceed_ceiling(ceiling in 1u32..64, attempts in 0usize..160) {
        let controller = controller();
        let key = AdmissionKey::for_principal(
            &edge_gateway::auth::Principal::builder(edge_gateway::auth::AuthScheme::Bearer, TENANT).build(),
            "unknown",
        );
        let limits = entry(ceiling);

        let accepted = (0..attempts)
            .filter(|_| controller.try_consume(&key, &limits).is_ok())
            .count();

        prop_assert_eq!(accepted, attempts.min(ceiling as usize));
        let used = controller.usage(&key).map(|u| u.count).unwrap_or(0);
        prop_assert!(used <= ceiling);
    }

    #[::core::prelude::v1::test]
    fn prop_tenants_do_not_share_budgets(ceiling in 1u32..16, tenants in 1usize..8) {
        let controller = controller();
        let limits = entry(ceiling);

        for t in 0..tenants {
            let tenant = format!("tenant-{t}");
            let key = AdmissionKey::for_principal(
                &edge_gateway::auth::Principal::builder(edge_gateway::auth::AuthScheme::Bearer, tenant).build(),
                "unknown",
            );
            let accepted = (0..ceiling * 2)
                .filter(|_| controller.try_consume(&key, &limits).is_ok())
                .count();
            prop_assert_eq!(accepted, ceiling as usize);
        }
        prop_assert_eq!(controller.tracked_keys(), tenants);
    }
}
