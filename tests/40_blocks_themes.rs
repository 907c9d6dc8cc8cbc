mod common;

use axum::http::StatusCode;
use common::TestApp;
use kagra_api::rbac::Role;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn blocks_append_in_sort_order() {
    let app = TestApp::new();
    let (_, token) = app.user(Role::Editor).await;
    let node = app.node(&token, "Rust Notes", false).await;

    let first = app.block(&token, &node, "Intro").await;
    let second = app.block(&token, &node, "Borrowing").await;

    let listed = app
        .get(&format!("/api/v1/charaxy/nodes/{}/blocks", node), &token)
        .await;
    assert_eq!(listed.status, StatusCode::OK);
    let blocks = listed.data().as_array().unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0]["id"], first.as_str());
    assert_eq!(blocks[0]["sort_order"], 0);
    assert_eq!(blocks[1]["id"], second.as_str());
    assert_eq!(blocks[1]["sort_order"], 1);
}

#[tokio::test]
async fn block_creation_checks_the_node() {
    let app = TestApp::new();
    let (_, alice) = app.user(Role::Editor).await;
    let (_, bob) = app.user(Role::Editor).await;
    let private = app.node(&alice, "Private Journal", false).await;

    let unknown = app
        .post(
            "/api/v1/charaxy/blocks",
            &alice,
            json!({ "node_id": Uuid::new_v4(), "title": "Orphan" }),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let hidden = app
        .post(
            "/api/v1/charaxy/blocks",
            &bob,
            json!({ "node_id": private, "title": "Intrusion" }),
        )
        .await;
    assert_eq!(hidden.status, StatusCode::FORBIDDEN);

    let bad_theme = app
        .post(
            "/api/v1/charaxy/blocks",
            &alice,
            json!({ "node_id": private, "title": "Styled", "block_theme_id": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(bad_theme.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blocks_are_owner_only() {
    let app = TestApp::new();
    let (_, alice) = app.user(Role::Editor).await;
    let (_, admin) = app.user(Role::SuperAdmin).await;
    let node = app.node(&alice, "Public Garden", true).await;
    let block = app.block(&alice, &node, "Seeds").await;
    let uri = format!("/api/v1/charaxy/blocks/{}", block);

    assert_eq!(app.get(&uri, &admin).await.status, StatusCode::FORBIDDEN);
    assert_eq!(
        app.put(&uri, &admin, json!({ "title": "Weeds" })).await.status,
        StatusCode::FORBIDDEN
    );
    assert_eq!(app.delete(&uri, &admin).await.status, StatusCode::FORBIDDEN);

    let own = app.get(&uri, &alice).await;
    assert_eq!(own.status, StatusCode::OK);
    assert_eq!(own.data()["title"], "Seeds");

    let updated = app.put(&uri, &alice, json!({ "content": "tomatoes" })).await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.data()["content"], "tomatoes");

    assert_eq!(app.put(&uri, &alice, json!({})).await.status, StatusCode::BAD_REQUEST);

    let deleted = app.delete(&uri, &alice).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.data()["message"], "Block deleted");
    assert_eq!(app.get(&uri, &alice).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blocks_of_a_deleted_node_are_gone() {
    let app = TestApp::new();
    let (_, token) = app.user(Role::Editor).await;
    let node = app.node(&token, "Old Notes", false).await;
    let block = app.block(&token, &node, "Intro").await;
    let uri = format!("/api/v1/charaxy/blocks/{}", block);

    let deleted = app.delete(&format!("/api/v1/charaxy/nodes/{}", node), &token).await;
    assert_eq!(deleted.status, StatusCode::OK);

    assert_eq!(app.get(&uri, &token).await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.put(&uri, &token, json!({ "title": "Revived" })).await.status, StatusCode::NOT_FOUND);
    let theme = app
        .put(&format!("{}/theme", uri), &token, json!({ "theme_id": null }))
        .await;
    assert_eq!(theme.status, StatusCode::NOT_FOUND);
    assert_eq!(app.delete(&uri, &token).await.status, StatusCode::NOT_FOUND);

    let reorder = app
        .put("/api/v1/charaxy/blocks/reorder", &token, json!({ "block_ids": [block] }))
        .await;
    assert_eq!(reorder.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reorder_rewrites_positions() {
    let app = TestApp::new();
    let (_, token) = app.user(Role::Editor).await;
    let node = app.node(&token, "Rust Notes", false).await;
    let a = app.block(&token, &node, "Alpha").await;
    let b = app.block(&token, &node, "Beta").await;
    let c = app.block(&token, &node, "Gamma").await;

    let reply = app
        .put(
            "/api/v1/charaxy/blocks/reorder",
            &token,
            json!({ "block_ids": [c, a, b] }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);

    let listed = app
        .get(&format!("/api/v1/charaxy/nodes/{}/blocks", node), &token)
        .await;
    let order: Vec<&str> = listed
        .data()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|b| b["title"].as_str())
        .collect();
    assert_eq!(order, vec!["Gamma", "Alpha", "Beta"]);

    let entry = app
        .store
        .audit_entries()
        .await
        .into_iter()
        .find(|e| e.action.as_str() == "block.reorder")
        .expect("reorder audited");
    assert_eq!(entry.resource_id.as_deref(), Some("multiple"));
}

#[tokio::test]
async fn reorder_refuses_foreign_or_empty_lists() {
    let app = TestApp::new();
    let (_, alice) = app.user(Role::Editor).await;
    let (_, bob) = app.user(Role::Editor).await;
    let node = app.node(&alice, "Public Garden", true).await;
    let mine = app.block(&bob, &node, "Bob Remarks").await;
    let theirs = app.block(&alice, &node, "Seeds").await;

    let foreign = app
        .put(
            "/api/v1/charaxy/blocks/reorder",
            &bob,
            json!({ "block_ids": [mine, theirs] }),
        )
        .await;
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);

    let empty = app
        .put("/api/v1/charaxy/blocks/reorder", &bob, json!({ "block_ids": [] }))
        .await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn theme_lifecycle_tracks_block_counts() {
    let app = TestApp::new();
    let (_, token) = app.user(Role::ProjectAdmin).await;
    let node = app.node(&token, "Rust Notes", true).await;
    let block = app.block(&token, &node, "Intro").await;

    let created = app
        .post(
            "/api/v1/charaxy/themes",
            &token,
            json!({ "title": "Ocean Blue", "description": "calm" }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.data()["block_count"], 0);
    let theme = created.data()["id"].as_str().unwrap().to_string();

    let assigned = app
        .put(
            &format!("/api/v1/charaxy/blocks/{}/theme", block),
            &token,
            json!({ "theme_id": theme }),
        )
        .await;
    assert_eq!(assigned.status, StatusCode::OK);
    assert_eq!(assigned.data()["block_theme_id"], theme.as_str());

    let fetched = app.get(&format!("/api/v1/charaxy/themes/{}", theme), &token).await;
    assert_eq!(fetched.data()["block_count"], 1);

    let themed = app
        .get(&format!("/api/v1/charaxy/themes/{}/blocks", theme), &token)
        .await;
    assert_eq!(themed.status, StatusCode::OK);
    let entries = themed.data().as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["node_title"], "Rust Notes");

    let renamed = app
        .put(
            &format!("/api/v1/charaxy/themes/{}", theme),
            &token,
            json!({ "title": "Deep Ocean" }),
        )
        .await;
    assert_eq!(renamed.status, StatusCode::OK);
    assert_eq!(renamed.data()["title"], "Deep Ocean");

    let listed = app.get("/api/v1/charaxy/themes", &token).await;
    assert_eq!(listed.data().as_array().unwrap().len(), 1);

    let deleted = app.delete(&format!("/api/v1/charaxy/themes/{}", theme), &token).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.data()["message"], "Theme deleted");

    let detached = app.get(&format!("/api/v1/charaxy/blocks/{}", block), &token).await;
    assert!(detached.data()["block_theme_id"].is_null());
}

#[tokio::test]
async fn themes_belong_to_their_creator() {
    let app = TestApp::new();
    let (_, alice) = app.user(Role::ProjectAdmin).await;
    let (_, bob) = app.user(Role::ProjectAdmin).await;
    let (_, editor) = app.user(Role::Editor).await;

    let created = app
        .post("/api/v1/charaxy/themes", &alice, json!({ "title": "Ocean Blue" }))
        .await;
    let theme = created.data()["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/charaxy/themes/{}", theme);

    assert_eq!(app.get(&uri, &bob).await.status, StatusCode::FORBIDDEN);
    assert_eq!(app.delete(&uri, &bob).await.status, StatusCode::FORBIDDEN);
    assert!(app
        .get("/api/v1/charaxy/themes", &bob)
        .await
        .data()
        .as_array()
        .unwrap()
        .is_empty());

    // editors may create themes but hold no theme:delete
    let own = app
        .post("/api/v1/charaxy/themes", &editor, json!({ "title": "Forest" }))
        .await;
    let own_id = own.data()["id"].as_str().unwrap().to_string();
    let denied = app
        .delete(&format!("/api/v1/charaxy/themes/{}", own_id), &editor)
        .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let missing = app
        .get(&format!("/api/v1/charaxy/themes/{}/blocks", Uuid::new_v4()), &alice)
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}
