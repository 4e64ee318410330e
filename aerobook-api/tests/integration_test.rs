use std::str::FromStr;
use std::sync::Arc;

use aerobook_api::middleware::Claims;
use aerobook_api::{app, AppState, AuthConfig};
use aerobook_booking::MockPaymentGateway;
use aerobook_core::events::NoopPublisher;
use aerobook_core::identity::Role;
use aerobook_core::models::User;
use aerobook_store::MemoryStore;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    store: MemoryStore,
    alice: User,
    bob: User,
    manager: User,
    admin: User,
}

fn token(user: &User, role: Role) -> String {
    Claims {
        sub: user.id.0,
        username: user.username.clone(),
        role,
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    }
    .sign(SECRET)
    .unwrap()
}

impl TestApp {
    async fn new() -> Self {
        let store = MemoryStore::new();
        store.add_ticket_type("Economy", Decimal::ONE).await;
        store.add_ticket_type("Business", Decimal::new(2, 0)).await;
        let alice = store.add_user("alice", "alice@example.com").await;
        let bob = store.add_user("bob", "bob@example.com").await;
        let manager = store.add_user("mia", "mia@example.com").await;
        let admin = store.add_user("root", "root@example.com").await;

        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(MockPaymentGateway::approving()),
            Arc::new(NoopPublisher),
            AuthConfig {
                secret: SECRET.to_string(),
            },
        );
        Self {
            router: app(state),
            store,
            alice,
            bob,
            manager,
            admin,
        }
    }

    async fn call(&self, method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn customer(&self, user: &User) -> String {
        token(user, Role::Customer)
    }

    fn staff(&self) -> String {
        token(&self.manager, Role::Manager)
    }

    /// Creates a two-seat flight and returns (flight id, economy 001, business 001).
    async fn flight(&self) -> (i64, i64, i64) {
        let plane = self.store.add_airplane("A321", 2).await;
        let from = self.store.add_airport("SGN", "Ho Chi Minh City").await;
        let to = self.store.add_airport("HAN", "Hanoi").await;
        let departure = Utc::now() + Duration::days(10);

        let (status, body) = self
            .call(
                Method::POST,
                "/v1/flights",
                Some(&self.staff()),
                Some(json!({
                    "airplane_id": plane.id,
                    "departure_airport_id": from.id,
                    "arrival_airport_id": to.id,
                    "departure_time": departure,
                    "arrival_time": departure + Duration::hours(2),
                    "base_price": "100.00",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["inventory"]["created"], 4);
        let flight_id = body["flight"]["id"].as_i64().unwrap();

        let (status, tickets) = self
            .call(
                Method::GET,
                &format!("/v1/flights/{}/tickets", flight_id),
                Some(&self.customer(&self.alice)),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let tickets = tickets.as_array().unwrap();
        let first_seat: Vec<&Value> = tickets
            .iter()
            .filter(|t| t["seat_number"] == "001")
            .collect();
        assert_eq!(first_seat.len(), 2);

        let mut ids: Vec<i64> = first_seat.iter().map(|t| t["id"].as_i64().unwrap()).collect();
        ids.sort();
        (flight_id, ids[0], ids[1])
    }
}

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let app = TestApp::new().await;
    let (status, body) = app.call(Method::GET, "/v1/bookings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = app
        .call(Method::GET, "/v1/bookings", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_booking_payment_and_flight_cancel_flow() {
    let app = TestApp::new().await;
    let (flight_id, economy, business) = app.flight().await;
    let alice = app.customer(&app.alice);

    let (status, booking) = app
        .call(
            Method::POST,
            "/v1/bookings",
            Some(&alice),
            Some(json!({ "ticket_ids": [economy, business] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{booking}");
    assert_eq!(booking["status"], "CONFIRMED");
    assert_eq!(decimal(&booking["total_amount"]), Decimal::new(300, 0));
    let booking_id = booking["id"].as_i64().unwrap();

    let (status, payment) = app
        .call(
            Method::POST,
            "/v1/payments",
            Some(&alice),
            Some(json!({ "booking_id": booking_id, "method": "CREDIT_CARD" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{payment}");
    assert_eq!(payment["status"], "SUCCESS");

    let (status, again) = app
        .call(
            Method::POST,
            "/v1/payments",
            Some(&alice),
            Some(json!({ "booking_id": booking_id, "method": "MOMO" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["code"], "IDEMPOTENCY_VIOLATION");
    assert_eq!(again["details"]["currentPaymentStatus"], "SUCCESS");

    let (status, report) = app
        .call(
            Method::PUT,
            &format!("/v1/flights/{}/status", flight_id),
            Some(&app.staff()),
            Some(json!({ "status": "CANCELED" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["flight"]["status"], "CANCELED");
    assert_eq!(report["canceled_bookings"], json!([booking_id]));
    assert_eq!(report["refunds"].as_array().unwrap().len(), 1);

    let (_, reloaded) = app
        .call(
            Method::GET,
            &format!("/v1/bookings/{}", booking_id),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(reloaded["status"], "CANCELED");
}

#[tokio::test]
async fn test_double_booking_returns_conflict_details() {
    let app = TestApp::new().await;
    let (_, economy, business) = app.flight().await;

    let (status, _) = app
        .call(
            Method::POST,
            "/v1/bookings",
            Some(&app.customer(&app.alice)),
            Some(json!({ "ticket_ids": [economy] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .call(
            Method::POST,
            "/v1/bookings",
            Some(&app.customer(&app.bob)),
            Some(json!({ "ticket_ids": [business, economy] })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "TICKETS_UNAVAILABLE");
    assert_eq!(body["details"]["conflictingTicketIds"], json!([economy]));
}

#[tokio::test]
async fn test_customers_only_see_their_own_bookings() {
    let app = TestApp::new().await;
    let (_, economy, _) = app.flight().await;

    let (_, booking) = app
        .call(
            Method::POST,
            "/v1/bookings",
            Some(&app.customer(&app.alice)),
            Some(json!({ "ticket_ids": [economy] })),
        )
        .await;
    let uri = format!("/v1/bookings/{}", booking["id"]);

    let (status, body) = app
        .call(Method::GET, &uri, Some(&app.customer(&app.bob)), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app.call(Method::GET, &uri, Some(&app.staff()), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(
            Method::POST,
            "/v1/bookings",
            Some(&app.customer(&app.bob)),
            Some(json!({ "user_id": app.alice.id, "ticket_ids": [economy] })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_privileged_operations_need_the_right_role() {
    let app = TestApp::new().await;
    let (flight_id, economy, _) = app.flight().await;
    let alice = app.customer(&app.alice);

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/v1/flights/{}/status", flight_id),
            Some(&alice),
            Some(json!({ "status": "DELAYED" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, booking) = app
        .call(
            Method::POST,
            "/v1/bookings",
            Some(&alice),
            Some(json!({ "ticket_ids": [economy] })),
        )
        .await;
    let uri = format!("/v1/bookings/{}", booking["id"]);

    let (status, _) = app
        .call(
            Method::PATCH,
            &uri,
            Some(&alice),
            Some(json!({ "status": "CANCELED" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            Method::PATCH,
            &uri,
            Some(&token(&app.admin, Role::Admin)),
            Some(json!({ "status": "CANCELED" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "CANCELED");
}

#[tokio::test]
async fn test_cancel_and_delete_booking() {
    let app = TestApp::new().await;
    let (flight_id, economy, _) = app.flight().await;
    let alice = app.customer(&app.alice);

    let (_, booking) = app
        .call(
            Method::POST,
            "/v1/bookings",
            Some(&alice),
            Some(json!({ "ticket_ids": [economy] })),
        )
        .await;
    let uri = format!("/v1/bookings/{}", booking["id"]);

    let (status, canceled) = app
        .call(Method::POST, &format!("{}/cancel", uri), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(canceled["status"], "CANCELED");

    let (status, seat) = app
        .call(
            Method::GET,
            &format!("/v1/flights/{}/seats/001", flight_id),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seat["available"], true);

    let (status, body) = app.call(Method::DELETE, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app.call(Method::DELETE, &uri, Some(&app.staff()), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = app.call(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "BOOKING_NOT_FOUND");
}

#[tokio::test]
async fn test_customers_cannot_edit_bookings_or_cancel_payments() {
    let app = TestApp::new().await;
    let (_, economy, _) = app.flight().await;
    let alice = app.customer(&app.alice);

    let (_, booking) = app
        .call(
            Method::POST,
            "/v1/bookings",
            Some(&alice),
            Some(json!({ "ticket_ids": [economy] })),
        )
        .await;
    let uri = format!("/v1/bookings/{}", booking["id"]);
    let new_date = "2030-01-15T09:30:00";

    let (status, _) = app
        .call(
            Method::PATCH,
            &uri,
            Some(&alice),
            Some(json!({ "booking_date": new_date })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, edited) = app
        .call(
            Method::PATCH,
            &uri,
            Some(&app.staff()),
            Some(json!({ "booking_date": new_date })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{edited}");
    assert_eq!(edited["booking_date"], new_date);

    let (_, payment) = app
        .call(
            Method::POST,
            "/v1/payments",
            Some(&alice),
            Some(json!({ "booking_id": booking["id"], "method": "CASH" })),
        )
        .await;
    let cancel_uri = format!("/v1/payments/{}/cancel", payment["id"]);

    let (status, _) = app.call(Method::POST, &cancel_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Settled payments stay settled even for staff.
    let (status, body) = app
        .call(Method::POST, &cancel_uri, Some(&app.staff()), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_OPERATION");
}
