mod common;

use axum::http::StatusCode;
use common::TestApp;
use kagra_api::audit::AuditAction;
use kagra_api::rbac::Role;
use serde_json::json;
use uuid::Uuid;

async fn login(app: &TestApp, email: &str, password: &str) -> common::Reply {
    app.send(
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
        &[],
    )
    .await
}

#[tokio::test]
async fn register_opens_a_session_for_a_new_viewer() {
    let app = TestApp::new();

    let session = app.register("Rin@Kagra.test", "correct-horse").await;
    assert_eq!(session["token_type"], "bearer");
    assert_eq!(session["expires_in"], app.config.security.jwt_expiry_hours * 3_600);
    assert_eq!(session["user"]["email"], "rin@kagra.test");
    assert_eq!(session["user"]["role"], "viewer");
    assert!(!session["refresh_token"].as_str().unwrap().is_empty());

    let token = session["access_token"].as_str().unwrap();
    let me = app.get("/api/v1/auth/me", token).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.data()["id"], session["user"]["id"]);

    let entries = app.store.audit_entries().await;
    let created = entries
        .iter()
        .find(|e| e.action == AuditAction::UserCreate)
        .expect("registration audited");
    assert!(created.success);
    assert_eq!(created.user_email.as_deref(), Some("rin@kagra.test"));
    // the password is never part of the record
    assert!(!serde_json::to_string(created).unwrap().contains("correct-horse"));
}

#[tokio::test]
async fn register_rejects_bad_input() {
    let app = TestApp::new();
    app.register("rin@kagra.test", "correct-horse").await;

    for (body, what) in [
        (json!({ "email": "RIN@kagra.test", "password": "another-horse" }), "duplicate"),
        (json!({ "email": "nobody", "password": "correct-horse" }), "bad email"),
        (json!({ "email": "sky@kagra.test", "password": "short" }), "weak password"),
        (json!({ "email": "sky@kagra.test" }), "missing password"),
    ] {
        let reply = app.send("POST", "/api/v1/auth/register", None, Some(body), &[]).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{}: {}", what, reply.body);
    }
}

#[tokio::test]
async fn login_accepts_the_right_password_only() {
    let app = TestApp::new();
    let registered = app.register("rin@kagra.test", "correct-horse").await;

    let ok = login(&app, "RIN@kagra.test", "correct-horse").await;
    assert_eq!(ok.status, StatusCode::OK, "{}", ok.body);
    assert_eq!(ok.data()["user"]["id"], registered["user"]["id"]);

    let wrong = login(&app, "rin@kagra.test", "wrong-horse").await;
    let unknown = login(&app, "sky@kagra.test", "correct-horse").await;
    for reply in [&wrong, &unknown] {
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.error_message(), "Invalid email or password");
    }

    let entries = app.store.audit_entries().await;
    let logins = entries.iter().filter(|e| e.action == AuditAction::Login).count();
    let failures = entries.iter().filter(|e| e.action == AuditAction::LoginFailed).count();
    assert_eq!((logins, failures), (1, 2));
}

#[tokio::test]
async fn refresh_tokens_are_single_use() {
    let app = TestApp::new();
    let session = app.register("rin@kagra.test", "correct-horse").await;
    let refresh_token = session["refresh_token"].as_str().unwrap();

    let rotated = app
        .send(
            "POST",
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh_token })),
            &[],
        )
        .await;
    assert_eq!(rotated.status, StatusCode::OK, "{}", rotated.body);
    assert_ne!(rotated.data()["refresh_token"], session["refresh_token"]);
    let fresh = rotated.data()["access_token"].as_str().unwrap();
    assert_eq!(app.get("/api/v1/auth/me", fresh).await.status, StatusCode::OK);

    let replayed = app
        .send(
            "POST",
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh_token })),
            &[],
        )
        .await;
    assert_eq!(replayed.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_the_access_and_refresh_tokens() {
    let app = TestApp::new();
    let session = app.register("rin@kagra.test", "correct-horse").await;
    let token = session["access_token"].as_str().unwrap();

    let out = app.request("POST", "/api/v1/auth/logout", Some(token), None).await;
    assert_eq!(out.status, StatusCode::OK, "{}", out.body);

    assert_eq!(app.get("/api/v1/auth/me", token).await.status, StatusCode::UNAUTHORIZED);
    let refreshed = app
        .send(
            "POST",
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": session["refresh_token"] })),
            &[],
        )
        .await;
    assert_eq!(refreshed.status, StatusCode::UNAUTHORIZED);

    // a fresh login still works
    assert_eq!(login(&app, "rin@kagra.test", "correct-horse").await.status, StatusCode::OK);
}

#[tokio::test]
async fn profile_updates_are_audited_with_old_and_new_values() {
    let app = TestApp::new();
    let (user_id, token) = app.user(Role::Viewer).await;

    let empty = app.put("/api/v1/users/me", &token, json!({})).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let updated = app
        .put("/api/v1/users/me", &token, json!({ "display_name": "Rin", "email": "Rin@Kagra.test" }))
        .await;
    assert_eq!(updated.status, StatusCode::OK, "{}", updated.body);
    assert_eq!(updated.data()["display_name"], "Rin");
    assert_eq!(updated.data()["email"], "rin@kagra.test");

    let entries = app.store.audit_entries().await;
    let change = entries
        .iter()
        .find(|e| e.action == AuditAction::UserUpdate && e.success)
        .expect("profile update audited");
    assert_eq!(change.resource_id.as_deref(), Some(user_id.to_string().as_str()));
    let details = change.details.as_ref().unwrap();
    assert_eq!(details["new_data"]["display_name"], "Rin");
    assert_ne!(details["old_data"]["display_name"], "Rin");
}

#[tokio::test]
async fn profile_email_must_stay_unique() {
    let app = TestApp::new();
    app.register("rin@kagra.test", "correct-horse").await;
    let (_, token) = app.user(Role::Viewer).await;

    let taken = app.put("/api/v1/users/me", &token, json!({ "email": "RIN@kagra.test" })).await;
    assert_eq!(taken.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_directory_requires_user_read() {
    let app = TestApp::new();
    let (viewer_id, viewer) = app.user(Role::Viewer).await;
    let (_, tenant_admin) = app.user(Role::TenantAdmin).await;

    assert_eq!(app.get("/api/v1/users", &viewer).await.status, StatusCode::FORBIDDEN);
    let denied = app.get(&format!("/api/v1/users/{}", viewer_id), &viewer).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let listed = app.get("/api/v1/users", &tenant_admin).await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.data().as_array().unwrap().len(), 2);

    let found = app.get(&format!("/api/v1/users/{}", viewer_id), &tenant_admin).await;
    assert_eq!(found.status, StatusCode::OK);
    assert_eq!(found.data()["role"], "viewer");

    let missing = app.get(&format!("/api/v1/users/{}", Uuid::new_v4()), &tenant_admin).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn system_admin_can_be_granted_and_revoked() {
    let app = TestApp::new();
    let (_, admin) = app.user(Role::SuperAdmin).await;
    let (editor_id, editor) = app.user(Role::Editor).await;
    let base = format!("/api/v1/admin/system/users/{}", editor_id);

    let before = app.get(&format!("{}/permissions", base), &admin).await;
    assert_eq!(before.status, StatusCode::OK);
    assert_eq!(before.data()["user_id"], editor_id.to_string());
    assert_eq!(before.data()["is_system_admin"], false);
    assert_eq!(before.data()["permissions"]["system_admin"], false);

    let granted = app.request("POST", &format!("{}/admin", base), Some(&admin), None).await;
    assert_eq!(granted.status, StatusCode::OK, "{}", granted.body);
    assert_eq!(granted.data()["is_system_admin"], true);
    assert_eq!(app.get("/api/v1/admin", &editor).await.status, StatusCode::OK);

    let again = app.request("POST", &format!("{}/admin", base), Some(&admin), None).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.data()["message"], "User is already a system admin");

    let revoked = app.request("DELETE", &format!("{}/admin", base), Some(&admin), None).await;
    assert_eq!(revoked.status, StatusCode::OK);
    assert_eq!(revoked.data()["role"], "viewer");
    assert_eq!(app.get("/api/v1/admin", &editor).await.status, StatusCode::FORBIDDEN);

    let entries = app.store.audit_entries().await;
    let changes: Vec<_> = entries
        .iter()
        .filter(|e| e.action == AuditAction::UserRoleChange)
        .collect();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[0].details.as_ref().unwrap()["new_data"]["role"], "super_admin");
    assert_eq!(changes[2].details.as_ref().unwrap()["new_data"]["role"], "viewer");
}

#[tokio::test]
async fn admins_cannot_revoke_themselves_and_others_cannot_grant() {
    let app = TestApp::new();
    let (admin_id, admin) = app.user(Role::SuperAdmin).await;
    let (tenant_admin_id, tenant_admin) = app.user(Role::TenantAdmin).await;

    let own = app
        .request("DELETE", &format!("/api/v1/admin/system/users/{}/admin", admin_id), Some(&admin), None)
        .await;
    assert_eq!(own.status, StatusCode::BAD_REQUEST);

    let escalate = app
        .request("POST", &format!("/api/v1/admin/system/users/{}/admin", tenant_admin_id), Some(&tenant_admin), None)
        .await;
    assert_eq!(escalate.status, StatusCode::FORBIDDEN);

    let missing = app
        .request("POST", &format!("/api/v1/admin/system/users/{}/admin", Uuid::new_v4()), Some(&admin), None)
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}
