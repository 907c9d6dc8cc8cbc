mod common;

use axum::http::StatusCode;
use common::TestApp;
use kagra_api::auth::JwtProvider;
use kagra_api::rbac::Role;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn missing_or_bad_tokens_are_unauthenticated() {
    let app = TestApp::new();

    let anonymous = app.request("GET", "/api/v1/charaxy/nodes", None, None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.body["error"]["code"], 401);
    assert_eq!(anonymous.body["error"]["type"], "http_error");

    let garbage = app.get("/api/v1/charaxy/nodes", "not.a.jwt").await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);

    let foreign = JwtProvider::new("some-other-secret", 1)
        .issue_token(Uuid::new_v4(), None)
        .unwrap();
    let reply = app.get("/api/v1/charaxy/nodes", &foreign).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn identity_without_user_row_is_rejected() {
    let app = TestApp::new();
    let token = JwtProvider::new(app.config.security.jwt_secret.clone(), 1)
        .issue_token(Uuid::new_v4(), Some("ghost@kagra.test".into()))
        .unwrap();

    let reply = app.get("/api/v1/users/me", &token).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn viewer_cannot_create_nodes_and_the_denial_is_audited() {
    let app = TestApp::new();
    let (viewer_id, token) = app.user(Role::Viewer).await;

    let reply = app
        .post("/api/v1/charaxy/nodes", &token, json!({ "title": "Rust Notes" }))
        .await;

    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"]["code"], 403);

    let entries = app.store.audit_entries().await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.action.as_str(), "node.create");
    assert_eq!(entry.user_id, Some(viewer_id));
    assert!(!entry.success);
    let details = entry.details.as_ref().unwrap();
    assert_eq!(details["denied_permission"], "node:create");
    assert_eq!(details["error_type"], "AUTHORIZATION_DENIED");
}

#[tokio::test]
async fn guest_cannot_list_nodes_but_viewer_can() {
    let app = TestApp::new();
    let (_, guest) = app.user(Role::Guest).await;
    let (_, viewer) = app.user(Role::Viewer).await;

    assert_eq!(app.get("/api/v1/charaxy/nodes", &guest).await.status, StatusCode::FORBIDDEN);
    assert_eq!(app.get("/api/v1/charaxy/nodes", &viewer).await.status, StatusCode::OK);
}

#[tokio::test]
async fn profile_and_permissions_reflect_the_stored_role() {
    let app = TestApp::new();
    let (id, token) = app.user(Role::Editor).await;

    let me = app.get("/api/v1/users/me", &token).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.data()["id"], id.to_string());
    assert_eq!(me.data()["role"], "editor");

    let perms = app.get("/api/v1/users/me/permissions", &token).await;
    assert_eq!(perms.status, StatusCode::OK);
    let granted: Vec<&str> = perms.data()["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p.as_str())
        .collect();
    assert!(granted.contains(&"node:create"));
    assert!(granted.contains(&"theme:update"));
    assert!(!granted.contains(&"theme:delete"));
    assert!(!granted.contains(&"system:admin"));
}

#[tokio::test]
async fn admin_area_requires_system_admin() {
    let app = TestApp::new();
    let (_, tenant_admin) = app.user(Role::TenantAdmin).await;
    let (_, super_admin) = app.user(Role::SuperAdmin).await;

    assert_eq!(app.get("/api/v1/admin", &tenant_admin).await.status, StatusCode::FORBIDDEN);

    let overview = app.get("/api/v1/admin", &super_admin).await;
    assert_eq!(overview.status, StatusCode::OK);
    assert_eq!(overview.data()["stats"]["users"], 2);
    assert_eq!(overview.data()["environment"], "development");
    assert_eq!(overview.data()["rate_limiter_capacity"], app.config.api.rate_limit_max_keys);

    let users = app.get("/api/v1/admin/users", &super_admin).await;
    assert_eq!(users.status, StatusCode::OK);
    let listed = users.data().as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|u| u["is_system_admin"] == true));
}

#[tokio::test]
async fn role_change_takes_effect_on_the_next_request() {
    let app = TestApp::new();
    let (_, admin) = app.user(Role::SuperAdmin).await;
    let (viewer_id, viewer) = app.user(Role::Viewer).await;

    let denied = app
        .post("/api/v1/charaxy/nodes", &viewer, json!({ "title": "Garden Plan" }))
        .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let changed = app
        .put(
            &format!("/api/v1/admin/users/{}/role", viewer_id),
            &admin,
            json!({ "role": "editor" }),
        )
        .await;
    assert_eq!(changed.status, StatusCode::OK, "{}", changed.body);
    assert_eq!(changed.data()["role"], "editor");

    let allowed = app
        .post("/api/v1/charaxy/nodes", &viewer, json!({ "title": "Garden Plan" }))
        .await;
    assert_eq!(allowed.status, StatusCode::CREATED);

    let entries = app.store.audit_entries().await;
    let role_change = entries
        .iter()
        .find(|e| e.action.as_str() == "user.role_change")
        .expect("role change audited");
    assert_eq!(role_change.resource_id.as_deref(), Some(viewer_id.to_string().as_str()));
    assert_eq!(role_change.details.as_ref().unwrap()["old_data"]["role"], "viewer");
    assert_eq!(role_change.details.as_ref().unwrap()["new_data"]["role"], "editor");
}

#[tokio::test]
async fn role_change_rejects_bad_input() {
    let app = TestApp::new();
    let (admin_id, admin) = app.user(Role::SuperAdmin).await;
    let (viewer_id, _) = app.user(Role::Viewer).await;

    let unknown = app
        .put(
            &format!("/api/v1/admin/users/{}/role", viewer_id),
            &admin,
            json!({ "role": "overlord" }),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);

    let own = app
        .put(
            &format!("/api/v1/admin/users/{}/role", admin_id),
            &admin,
            json!({ "role": "viewer" }),
        )
        .await;
    assert_eq!(own.status, StatusCode::BAD_REQUEST);

    let missing = app
        .put(
            &format!("/api/v1/admin/users/{}/role", Uuid::new_v4()),
            &admin,
            json!({ "role": "viewer" }),
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}
