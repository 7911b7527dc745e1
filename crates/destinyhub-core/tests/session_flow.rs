//! End-to-end session flow against a mock Bungie.net: browser login over the
//! loopback listener, a rejected token recovered by refresh, and a second
//! process resuming from the credential file.

use std::sync::Arc;
use std::time::Duration;

use destinyhub_core::{
    ApiClient, ApiError, ClientConfig, CredentialStore, FileCredentialStore, HttpTokenAuthority,
    LoopbackListener, SessionManager, SessionState,
};
use mockito::Matcher;
use reqwest::Url;

const USER_PATH: &str = "/Platform/User/GetCurrentBungieNetUser/";

fn user_body(id: &str) -> String {
    format!(
        r#"{{"Response": {{"membershipId": "{}", "displayName": "Guardian"}}, "ErrorCode": 1}}"#,
        id
    )
}

fn config_for(server: &mockito::ServerGuard) -> Arc<ClientConfig> {
    let mut config = ClientConfig::new("49198", "integration-key");
    config.token_url = format!("{}/token", server.url());
    config.api_base_url = format!("{}/Platform", server.url());
    config.callback_ports = None;
    Arc::new(config)
}

fn session_for(config: &Arc<ClientConfig>, store: FileCredentialStore) -> Arc<SessionManager> {
    let authority = HttpTokenAuthority::new(config.clone()).unwrap();
    Arc::new(
        SessionManager::new(
            config,
            Arc::new(store),
            Arc::new(authority),
            LoopbackListener::from_config(config),
        )
        .with_callback_timeout(Duration::from_secs(10)),
    )
}

/// Plays the browser: follows the authorization URL straight to the redirect
/// with `code` and the state it was given.
fn approve_in_browser(code: &'static str) -> impl FnOnce(&str) + Send {
    move |url: &str| {
        let url = Url::parse(url).unwrap();
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        let mut redirect = Url::parse(&param("redirect_uri")).unwrap();
        redirect
            .query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", &param("state"));
        tokio::spawn(async move {
            let _ = reqwest::get(redirect).await;
        });
    }
}

#[tokio::test]
async fn test_login_call_refresh_and_resume() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();

    let exchange = server
        .mock("POST", "/token")
        .match_header("x-api-key", "integration-key")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "browser-code".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600,
                "refresh_expires_in":7776000,"membership_id":"555"}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"access_token":"at-2","refresh_token":"rt-2","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;
    let revoked = server
        .mock("GET", USER_PATH)
        .match_header("authorization", "Bearer at-1")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", USER_PATH)
        .match_header("authorization", "Bearer at-2")
        .with_status(200)
        .with_body(user_body("555"))
        .expect(2)
        .create_async()
        .await;

    let config = config_for(&server);
    let store = FileCredentialStore::new(dir.path());

    // First process: nothing stored, log in through the loopback listener.
    {
        let session = session_for(&config, store.clone());
        let api = ApiClient::new(config.clone(), session.clone()).unwrap();

        assert_eq!(session.resume(&api.probe()).await.unwrap(), SessionState::Anonymous);
        assert!(matches!(api.current_user().await, Err(ApiError::RequiresLogin)));

        session.login(approve_in_browser("browser-code")).await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.membership_id().await.as_deref(), Some("555"));

        // at-1 has been revoked server side: one refresh, one retry.
        let user = api.current_user().await.unwrap();
        assert_eq!(user.membership_id, "555");
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    exchange.assert_async().await;
    refresh.assert_async().await;
    revoked.assert_async().await;

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.access_token, "at-2");
    assert_eq!(saved.refresh_token, "rt-2");
    assert_eq!(saved.membership_id.as_deref(), Some("555"));

    // Second process: resumes from the file without logging in again.
    let session = session_for(&config, store.clone());
    let api = ApiClient::new(config.clone(), session.clone()).unwrap();
    assert_eq!(
        session.resume(&api.probe()).await.unwrap(),
        SessionState::Authenticated
    );
    assert_eq!(api.current_user().await.unwrap().membership_id, "555");
    accepted.assert_async().await;

    session.logout().await.unwrap();
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_login_times_out_without_redirect() {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server);
    let authority = HttpTokenAuthority::new(config.clone()).unwrap();
    let session = SessionManager::new(
        &config,
        Arc::new(FileCredentialStore::new(dir.path())),
        Arc::new(authority),
        LoopbackListener::from_config(&config),
    )
    .with_callback_timeout(Duration::from_millis(100));

    let mut presented = None;
    let err = session
        .login(|url: &str| presented = Some(url.to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, destinyhub_core::AuthError::Timeout));
    assert!(presented.unwrap().contains("response_type=code"));
    assert_eq!(session.state(), SessionState::Anonymous);
}
