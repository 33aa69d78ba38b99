//! API integration tests against a running server

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Helper to create a resource and return its id
async fn create(client: &Client, path: &str, body: Value) -> String {
    let response = client
        .post(format!("{}{}", BASE_URL, path))
        .json(&body)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201, "creating {} failed", path);

    let body: Value = response.json().await.expect("Failed to parse response");
    body["id"].as_str().expect("No id in response").to_string()
}

/// Author, borrower and a book with the given number of copies
async fn fixture(client: &Client, copies: i32) -> (String, String) {
    let suffix = uuid::Uuid::new_v4().simple().to_string();

    let author_id = create(client, "/authors", json!({ "name": "Agatha Christie" })).await;
    let user_id = create(
        client,
        "/users",
        json!({ "name": "Test Reader", "email": format!("reader-{}@example.com", suffix) }),
    )
    .await;
    let book_id = create(
        client,
        "/books",
        json!({
            "title": "The Murder of Roger Ackroyd",
            "isbn": format!("978{}", &suffix[..10]),
            "author_id": author_id,
            "total_copies": copies
        }),
    )
    .await;

    (user_id, book_id)
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_borrow_and_return() {
    let client = Client::new();
    let (user_id, book_id) = fixture(&client, 1).await;

    let response = client
        .post(format!("{}/loans", BASE_URL))
        .json(&json!({
            "user_id": user_id,
            "book_id": book_id,
            "due_date": "2030-01-15T00:00:00Z"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);
    let loan: Value = response.json().await.expect("Failed to parse response");
    let loan_id = loan["id"].as_str().expect("No loan ID");

    let response = client
        .post(format!("{}/loans/{}/return", BASE_URL, loan_id))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "closed");

    let response = client
        .post(format!("{}/loans/{}/return", BASE_URL, loan_id))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_borrows_respect_copy_count() {
    let client = Client::new();
    let copies = 3;
    let (_, book_id) = fixture(&client, copies).await;

    let mut handles = Vec::new();
    for i in 0..=copies {
        let client = client.clone();
        let book_id = book_id.clone();
        handles.push(tokio::spawn(async move {
            let user_id = create(
                &client,
                "/users",
                json!({
                    "name": format!("Reader {}", i),
                    "email": format!("reader-{}-{}@example.com", i, uuid::Uuid::new_v4().simple())
                }),
            )
            .await;

            client
                .post(format!("{}/loans", BASE_URL))
                .json(&json!({
                    "user_id": user_id,
                    "book_id": book_id,
                    "due_date": "2030-01-15T00:00:00Z"
                }))
                .send()
                .await
                .expect("Failed to send request")
                .status()
        }));
    }

    let mut created = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.expect("task panicked").as_u16() {
            201 => created += 1,
            400 => refused += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(created, copies);
    assert_eq!(refused, 1);

    let ledger: Value = client
        .get(format!("{}/books/{}/ledger", BASE_URL, book_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(ledger["available_copies"], 0);
    assert_eq!(ledger["consistent"], true);
}

#[tokio::test]
#[ignore]
async fn test_return_unknown_loan() {
    let client = Client::new();

    let response = client
        .post(format!("{}/loans/{}/return", BASE_URL, uuid::Uuid::new_v4()))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
}
