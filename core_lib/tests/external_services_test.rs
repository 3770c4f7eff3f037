use std::net::TcpListener;
use std::time::Duration;

use sys_agent_core::{ExternalServices, Providers};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_mixed_services_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
        .mount(&server)
        .await;

    let declarations = vec![
        "c:docker:///definitely/not/a/docker.sock".to_string(),
        format!("a:{}/health", server.uri()),
        format!("b:http://127.0.0.1:{}/health", refused_port()),
    ];

    let providers = Providers::new(Duration::from_secs(2), true).unwrap();
    let services = ExternalServices::new(providers, 4, Duration::from_secs(2), &declarations);

    let results = services.status().await;
    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    assert_eq!(results[0].status_code, 200);
    assert_eq!(results[0].body.as_ref().unwrap()["status"], "ok");

    assert_eq!(results[1].status_code, 500);
    assert!(results[1].body.is_none());

    assert_eq!(results[2].status_code, 500);
    assert!(results[2].body.is_none());
}

#[tokio::test]
async fn test_file_and_program_services() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("marker.txt");
    std::fs::write(&file, "marker").unwrap();

    let declarations = vec![
        format!("marker:file://{}", file.display()),
        "missing:file:///definitely/not/here".to_string(),
        "echo:program://echo?args=hi".to_string(),
        "unknown:gopher://example.com".to_string(),
    ];

    let providers = Providers::new(Duration::from_secs(2), true).unwrap();
    let services = ExternalServices::new(providers, 2, Duration::from_secs(2), &declarations);
    let results = services.status().await;

    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "marker", "missing", "unknown"]);

    assert_eq!(results[0].body.as_ref().unwrap()["stdout"], "hi\n");
    assert_eq!(results[1].body.as_ref().unwrap()["content"], "marker");
    assert_eq!(results[2].status_code, 200);
    assert_eq!(results[2].body.as_ref().unwrap()["status"], "not found");
    assert_eq!(results[3].status_code, 500);

    assert_eq!(services.cache().len(), 4);
}
