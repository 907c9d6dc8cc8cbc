mod common;

use axum::http::StatusCode;
use common::TestApp;
use kagra_api::rbac::Role;
use serde_json::json;

#[tokio::test]
async fn create_then_fetch_node() {
    let app = TestApp::new();
    let (owner_id, token) = app.user(Role::Editor).await;

    let created = app
        .post(
            "/api/v1/charaxy/nodes",
            &token,
            json!({ "title": "Rust Notes", "description": "ownership", "is_public": true }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["success"], true);
    assert_eq!(created.data()["title"], "Rust Notes");
    assert_eq!(created.data()["type"], "default");
    assert_eq!(created.data()["user_id"], owner_id.to_string());

    let id = created.data()["id"].as_str().unwrap();
    let fetched = app.get(&format!("/api/v1/charaxy/nodes/{}", id), &token).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.data()["description"], "ownership");
}

#[tokio::test]
async fn payloads_are_sanitized_before_storage() {
    let app = TestApp::new();
    let (_, token) = app.user(Role::Editor).await;

    let created = app
        .post(
            "/api/v1/charaxy/nodes",
            &token,
            json!({ "title": "Notes <script>alert(1)</script>" }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);

    let title = created.data()["title"].as_str().unwrap();
    assert!(!title.contains('<'));
    assert!(!title.to_lowercase().contains("<script"));
    assert!(title.starts_with("Notes"));
}

#[tokio::test]
async fn create_rejects_empty_title_and_malformed_json() {
    let app = TestApp::new();
    let (_, token) = app.user(Role::Editor).await;

    let empty = app.post("/api/v1/charaxy/nodes", &token, json!({ "title": "" })).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.body["error"]["code"], 400);

    let missing = app.post("/api/v1/charaxy/nodes", &token, json!({ "description": "x" })).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let malformed = app
        .send(
            "POST",
            "/api/v1/charaxy/nodes",
            Some(&token),
            None,
            &[("content-type", "application/json")],
        )
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);

    let entries = app.store.audit_entries().await;
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| !e.success && e.action.as_str() == "node.create"));
}

#[tokio::test]
async fn private_nodes_are_hidden_from_other_users() {
    let app = TestApp::new();
    let (_, alice) = app.user(Role::Editor).await;
    let (_, bob) = app.user(Role::Editor).await;

    let private = app.node(&alice, "Private Journal", false).await;
    let public = app.node(&alice, "Public Garden", true).await;

    let listed = app.get("/api/v1/charaxy/nodes", &bob).await;
    assert_eq!(listed.status, StatusCode::OK);
    let ids: Vec<&str> = listed
        .data()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["id"].as_str())
        .collect();
    assert_eq!(ids, vec![public.as_str()]);

    let hidden = app.get(&format!("/api/v1/charaxy/nodes/{}", private), &bob).await;
    assert_eq!(hidden.status, StatusCode::FORBIDDEN);

    let hidden_blocks = app
        .get(&format!("/api/v1/charaxy/nodes/{}/blocks", private), &bob)
        .await;
    assert_eq!(hidden_blocks.status, StatusCode::FORBIDDEN);

    let own = app.get("/api/v1/charaxy/nodes", &alice).await;
    assert_eq!(own.data().as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn list_respects_pagination() {
    let app = TestApp::new();
    let (_, token) = app.user(Role::Editor).await;
    for title in ["First", "Second", "Third"] {
        app.node(&token, title, false).await;
    }

    let page = app.get("/api/v1/charaxy/nodes?skip=1&limit=1", &token).await;
    assert_eq!(page.status, StatusCode::OK);
    assert_eq!(page.data().as_array().unwrap().len(), 1);

    let clamped = app.get("/api/v1/charaxy/nodes?limit=0", &token).await;
    assert_eq!(clamped.data().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn only_owner_or_system_admin_may_update() {
    let app = TestApp::new();
    let (_, owner) = app.user(Role::Editor).await;
    let (_, other) = app.user(Role::TenantAdmin).await;
    let (admin_id, admin) = app.user(Role::SuperAdmin).await;
    let id = app.node(&owner, "Rust Notes", true).await;
    let uri = format!("/api/v1/charaxy/nodes/{}", id);

    let denied = app.put(&uri, &other, json!({ "title": "Hijacked" })).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let empty = app.put(&uri, &owner, json!({})).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let renamed = app.put(&uri, &owner, json!({ "title": "Rust Notes 2" })).await;
    assert_eq!(renamed.status, StatusCode::OK);
    assert_eq!(renamed.data()["title"], "Rust Notes 2");

    let moderated = app.put(&uri, &admin, json!({ "is_public": false })).await;
    assert_eq!(moderated.status, StatusCode::OK);
    assert_eq!(moderated.data()["is_public"], false);

    let updates: Vec<_> = app
        .store
        .audit_entries()
        .await
        .into_iter()
        .filter(|e| e.action.as_str() == "node.update" && e.success)
        .collect();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].user_id, Some(admin_id));
    let details = updates[0].details.clone().unwrap();
    assert_eq!(details["old_data"]["title"], "Rust Notes");
    assert_eq!(details["new_data"]["title"], "Rust Notes 2");
}

#[tokio::test]
async fn delete_is_soft_and_hides_the_node() {
    let app = TestApp::new();
    let (_, owner) = app.user(Role::Editor).await;
    let id = app.node(&owner, "Short Lived", false).await;
    let uri = format!("/api/v1/charaxy/nodes/{}", id);

    let deleted = app.delete(&uri, &owner).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.data()["message"], "Node deleted");

    assert_eq!(app.get(&uri, &owner).await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.delete(&uri, &owner).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_ids_are_rejected() {
    let app = TestApp::new();
    let (_, token) = app.user(Role::Viewer).await;

    let reply = app.get("/api/v1/charaxy/nodes/1%20OR%201=1", &token).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_message(), "Invalid node id");
}

#[tokio::test]
async fn search_matches_visible_titles() {
    let app = TestApp::new();
    let (_, alice) = app.user(Role::Editor).await;
    let (_, bob) = app.user(Role::Editor).await;
    app.node(&alice, "Rust Notes", true).await;
    app.node(&alice, "Rust Secrets", false).await;
    app.node(&alice, "Garden Plan", true).await;

    let found = app.get("/api/v1/search?q=rust", &bob).await;
    assert_eq!(found.status, StatusCode::OK);
    let titles: Vec<&str> = found
        .data()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Rust Notes"]);

    let empty = app.get("/api/v1/search?q=", &bob).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let audited = app
        .store
        .audit_entries()
        .await
        .into_iter()
        .find(|e| e.action.as_str() == "search" && e.success)
        .expect("search audited");
    assert_eq!(audited.details.unwrap()["count"], 1);
}

#[tokio::test]
async fn activity_shows_other_users_public_edits() {
    let app = TestApp::new();
    let (_, alice) = app.user(Role::Editor).await;
    let (_, bob) = app.user(Role::Editor).await;

    let public = app.node(&alice, "Public Garden", true).await;
    let private = app.node(&alice, "Private Journal", false).await;
    app.block(&alice, &public, "Seeds").await;
    app.block(&alice, &private, "Diary").await;
    app.block(&bob, &public, "Bob Remarks").await;

    let feed = app.get("/api/v1/charaxy/activity", &bob).await;
    assert_eq!(feed.status, StatusCode::OK);
    let items = feed.data().as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["block_title"], "Seeds");
    assert_eq!(items[0]["node_title"], "Public Garden");
    assert!(items[0]["user_name"].as_str().unwrap().starts_with("editor-"));
}
