//! HTTP surface tests
//!
//! Webhook signature handling and the PDG guard on protected routes.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use book_ledger_backend::config::Config;
use book_ledger_backend::handlers::webhook::compute_signature;
use serde_json::{json, Value};
use shared::models::PaymentStatus;

use common::{app, json_request, line, order, pdg_token, send, store_with, token, work};

fn webhook_request(body: &Value, signature: Option<String>) -> Request<Body> {
    let config = Config::for_memory_store();
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(config.webhook.signature_header.as_str(), signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn sign(body: &Value) -> String {
    let config = Config::for_memory_store();
    compute_signature(&config.webhook.secret, body.to_string().as_bytes()).unwrap()
}

// ============================================================================
// Webhook
// ============================================================================

#[cfg(test)]
mod webhook_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_signature_is_unauthorized() {
        let store = store_with(&[]).await;
        let body = json!({ "event": "payment.success", "data": {} });

        let (status, response) = send(app(&store), webhook_request(&body, None)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response["error"]["code"], "INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn test_wrong_signature_is_unauthorized() {
        let store = store_with(&[]).await;
        let body = json!({ "event": "payment.success", "data": {} });
        let forged = compute_signature("not-the-secret", body.to_string().as_bytes()).unwrap();

        let (status, _) = send(app(&store), webhook_request(&body, Some(forged))).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signed_payment_settles_order() {
        let w = work("Les Soleils des indépendances", 10, 2);
        let o = order(vec![line(&w, 2)]);
        let store = store_with(&[w.clone()]).await;
        let seeded = o.clone();
        store
            .seed(move |s| {
                s.orders.insert(seeded.id, seeded);
            })
            .await;

        let body = json!({
            "event": "payment.success",
            "data": {
                "transaction_id": "T1",
                "amount": 2000,
                "metadata": { "order_id": o.id.to_string() }
            }
        });
        let (status, response) =
            send(app(&store), webhook_request(&body, Some(sign(&body)))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert_eq!(response["outcome"]["outcome"], "applied");

        let state = store.snapshot().await;
        assert_eq!(state.orders[&o.id].payment_status, PaymentStatus::Paid);
        assert_eq!(state.works[&w.id].stock, 8);

        // redelivery with a valid signature is acknowledged as a duplicate
        let (status, response) =
            send(app(&store), webhook_request(&body, Some(sign(&body)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["outcome"]["outcome"], "duplicate");
        assert_eq!(store.snapshot().await.works[&w.id].stock, 8);
    }

    #[tokio::test]
    async fn test_prefixed_signature_accepted() {
        let store = store_with(&[]).await;
        let body = json!({ "event": "refund.created", "data": {} });

        let (status, response) = send(
            app(&store),
            webhook_request(&body, Some(format!("sha256={}", sign(&body)))),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert!(response.get("outcome").is_none());
    }

    #[tokio::test]
    async fn test_missing_order_id_is_bad_request() {
        let store = store_with(&[]).await;
        let body = json!({
            "event": "payment.success",
            "data": { "transaction_id": "T1", "amount": 100 }
        });

        let (status, _) = send(app(&store), webhook_request(&body, Some(sign(&body)))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_order_is_acknowledged() {
        let store = store_with(&[]).await;
        let body = json!({
            "event": "payment.failed",
            "data": {
                "transaction_id": "T1",
                "metadata": { "order_id": uuid::Uuid::new_v4().to_string() }
            }
        });

        let (status, response) =
            send(app(&store), webhook_request(&body, Some(sign(&body)))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["outcome"]["outcome"], "ignored");
    }
}

// ============================================================================
// Protected routes
// ============================================================================

#[cfg(test)]
mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_stock_requires_token() {
        let store = store_with(&[]).await;

        let (status, _) = send(app(&store), json_request("GET", "/api/v1/stock", None, None)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stock_forbidden_for_non_pdg() {
        let store = store_with(&[]).await;
        let author = token("AUTHOR");

        let (status, body) = send(
            app(&store),
            json_request("GET", "/api/v1/stock", Some(&author), None),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_pdg_can_record_and_list_movements() {
        let w = work("Le Vieux Nègre et la Médaille", 4, 1);
        let store = store_with(&[w.clone()]).await;
        let token = pdg_token();

        let (status, movement) = send(
            app(&store),
            json_request(
                "POST",
                "/api/v1/stock",
                Some(&token),
                Some(json!({ "workId": w.id, "type": "INBOUND", "quantity": 6 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(movement["appliedDelta"], 6);

        let (status, works) = send(
            app(&store),
            json_request("GET", "/api/v1/stock?type=works", Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(works[0]["stock"], 10);

        let (status, body) = send(
            app(&store),
            json_request(
                "DELETE",
                &format!("/api/v1/stock?id={}", movement["id"].as_str().unwrap()),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["newStock"], 4);
    }

    #[tokio::test]
    async fn test_unknown_stock_view_is_bad_request() {
        let store = store_with(&[]).await;

        let (status, _) = send(
            app(&store),
            json_request("GET", "/api/v1/stock?type=bogus", Some(&pdg_token()), None),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let store = store_with(&[]).await;

        let (status, body) = send(app(&store), json_request("GET", "/health", None, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"], "memory");
        assert_eq!(body["database"], "connected");
    }
}
