//! Fixtures shared by the backend integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use book_ledger_backend::{
    config::Config,
    create_app,
    middleware::{Claims, PDG_ROLE},
    store::MemoryStore,
    AppState,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use serde_json::Value;
use shared::models::{Order, OrderLine, OrderStatus, PaymentStatus, Work};
use tower::ServiceExt;
use uuid::Uuid;

pub fn work(title: &str, stock: i32, min_stock: i32) -> Work {
    Work {
        id: Uuid::new_v4(),
        title: title.to_string(),
        isbn: None,
        author_id: None,
        price: Decimal::from(1000),
        stock,
        physical_stock: stock,
        min_stock,
        max_stock: None,
        updated_at: Utc::now(),
    }
}

pub fn line(work: &Work, quantity: i32) -> OrderLine {
    OrderLine {
        work_id: work.id,
        quantity,
        unit_price: work.price,
        author_id: work.author_id,
    }
}

pub fn order(lines: Vec<OrderLine>) -> Order {
    let total = lines
        .iter()
        .map(|l| l.unit_price * Decimal::from(l.quantity))
        .sum();
    Order {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        partner_id: None,
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Unpaid,
        payment_reference: None,
        total,
        amount_paid: Decimal::ZERO,
        remaining_amount: total,
        full_payment_date: None,
        lines,
        created_at: Utc::now(),
    }
}

/// Memory store seeded with `works`
pub async fn store_with(works: &[Work]) -> MemoryStore {
    let store = MemoryStore::new();
    let works = works.to_vec();
    store
        .seed(move |s| {
            for w in works {
                s.works.insert(w.id, w);
            }
        })
        .await;
    store
}

pub fn app(store: &MemoryStore) -> Router {
    create_app(AppState::new(
        Arc::new(store.clone()),
        Config::for_memory_store(),
    ))
}

pub fn token(role: &str) -> String {
    let config = Config::for_memory_store();
    let claims = Claims {
        sub: Uuid::new_v4().to_string(),
        role: role.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt.secret.as_bytes()),
    )
    .unwrap()
}

pub fn pdg_token() -> String {
    token(PDG_ROLE)
}

/// Authenticated JSON request
pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Send `request` and decode the JSON body (Null when empty)
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}
