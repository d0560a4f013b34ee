//! Socket-level end-to-end scenarios: a real harness instance, real stub
//! clients over TCP, real HTTP calls through reqwest.

use std::io::Write;
use std::time::Duration;

use understudy::client::{ClientError, StubClient};
use understudy::config::{AdminConfig, ChannelConfig, Config, DispatchMode, GatewayConfig};
use understudy::handler::Handler;
use understudy::harness::Harness;
use understudy::model::MockResponse;
use understudy::rules::load_rules;

fn test_config(mode: DispatchMode, port_count: usize) -> Config {
    Config {
        log_level: "info".into(),
        gateway: GatewayConfig {
            ports: vec![0; port_count],
            mode,
            reply_timeout: Duration::from_millis(500),
        },
        channel: ChannelConfig { bind: "127.0.0.1:0".into() },
        admin: AdminConfig { traffic_capacity: 64 },
    }
}

async fn start(mode: DispatchMode, port_count: usize) -> Harness {
    Harness::start(test_config(mode, port_count)).await.unwrap()
}

fn url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

/// Poll until the harness has registered `n` clients.
async fn wait_clients(harness: &Harness, n: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while harness.registry().client_count().await != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients register in time");
}

#[tokio::test]
async fn handler_answers_with_route_capture() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let client = StubClient::connect(&harness.channel_addr().to_string())
        .await
        .unwrap();
    let port = client.port().expect("port-per-client assigns a port");
    client
        .register(
            Handler::builder()
                .method("GET")
                .route("/users/{id}")
                .respond_with(|req, caps| {
                    MockResponse::json(
                        req.id,
                        200,
                        &serde_json::json!({ "id": caps.get("id").unwrap_or("") }),
                    )
                })
                .build()
                .unwrap(),
        )
        .await;
    wait_clients(&harness, 1).await;

    let resp = reqwest::get(url(port, "/users/7")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "7");
}

#[tokio::test]
async fn unmatched_request_is_501() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let client = StubClient::connect(&harness.channel_addr().to_string())
        .await
        .unwrap();
    let port = client.port().unwrap();
    wait_clients(&harness, 1).await;

    let resp = reqwest::get(url(port, "/anything")).await.unwrap();
    assert_eq!(resp.status(), 501);
}

#[tokio::test]
async fn unbound_port_is_503() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let port = harness.gateway_ports()[0];

    // No client ever connects.
    let resp = reqwest::get(url(port, "/users/1")).await.unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn silent_client_times_out_as_504() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let client = StubClient::connect(&harness.channel_addr().to_string())
        .await
        .unwrap();
    let port = client.port().unwrap();
    client
        .register(
            Handler::builder()
                .route("/never")
                .respond_async(|req, _| async move {
                    // Longer than the harness reply timeout.
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    MockResponse::text(req.id, 200, "too late")
                })
                .build()
                .unwrap(),
        )
        .await;
    wait_clients(&harness, 1).await;

    let resp = reqwest::get(url(port, "/never")).await.unwrap();
    assert_eq!(resp.status(), 504);
    // The late reply must not leak a pending entry.
    assert_eq!(harness.pending().len().await, 0);
}

#[tokio::test]
async fn last_registered_handler_wins() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let client = StubClient::connect(&harness.channel_addr().to_string())
        .await
        .unwrap();
    let port = client.port().unwrap();
    client
        .register(
            Handler::builder()
                .route("/users/{id}")
                .respond_with(|req, _| MockResponse::text(req.id, 200, "old"))
                .build()
                .unwrap(),
        )
        .await;
    client
        .register(
            Handler::builder()
                .route("/users/{id}")
                .respond_with(|req, _| MockResponse::text(req.id, 200, "new"))
                .build()
                .unwrap(),
        )
        .await;
    wait_clients(&harness, 1).await;

    let resp = reqwest::get(url(port, "/users/1")).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "new");
}

#[tokio::test]
async fn broadcast_race_yields_exactly_one_reply() {
    let harness = start(DispatchMode::Broadcast, 1).await;
    let port = harness.gateway_ports()[0];
    let addr = harness.channel_addr().to_string();

    let a = StubClient::connect(&addr).await.unwrap();
    let b = StubClient::connect(&addr).await.unwrap();
    for (client, tag) in [(&a, "a"), (&b, "b")] {
        let tag = tag.to_string();
        client
            .register(
                Handler::builder()
                    .route("/race")
                    .respond_with(move |req, _| MockResponse::text(req.id, 200, tag.clone()))
                    .build()
                    .unwrap(),
            )
            .await;
    }
    wait_clients(&harness, 2).await;

    let resp = reqwest::get(url(port, "/race")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    // One of the two answers, never a merge or an error.
    assert!(body == "a" || body == "b", "unexpected body: {body}");
    // The losing reply is dropped as stale without leaking an entry.
    assert_eq!(harness.pending().len().await, 0);
}

#[tokio::test]
async fn disconnect_frees_the_port_for_the_next_client() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let addr = harness.channel_addr().to_string();

    let first = StubClient::connect(&addr).await.unwrap();
    let port = first.port().unwrap();

    // The pool has exactly one port, so a second connect is refused.
    let refused = StubClient::connect(&addr).await.unwrap_err();
    assert!(matches!(refused, ClientError::Refused(_)));

    first.close();
    drop(first);
    wait_clients(&harness, 0).await;

    let second = StubClient::connect(&addr).await.unwrap();
    assert_eq!(second.port(), Some(port));
}

#[tokio::test]
async fn admin_surface_reports_health_clients_and_traffic() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let client = StubClient::connect(&harness.channel_addr().to_string())
        .await
        .unwrap();
    let port = client.port().unwrap();
    client
        .register(
            Handler::builder()
                .route("/ping")
                .respond_with(|req, _| MockResponse::text(req.id, 200, "pong"))
                .build()
                .unwrap(),
        )
        .await;
    wait_clients(&harness, 1).await;

    let health: serde_json::Value = reqwest::get(url(port, "/__understudy/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["clients"], 1);

    let clients: serde_json::Value = reqwest::get(url(port, "/__understudy/clients"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(clients["clients"].as_array().unwrap().len(), 1);
    assert_eq!(clients["clients"][0]["port"], port);

    // Generate one exchange, then inspect it.
    reqwest::get(url(port, "/ping")).await.unwrap();
    let traffic: serde_json::Value = reqwest::get(url(port, "/__understudy/traffic"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let exchanges = traffic["exchanges"].as_array().unwrap();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0]["path"], "/ping");
    assert_eq!(exchanges[0]["status"], 200);
    assert_eq!(exchanges[0]["outcome"], "completed");

    // Unknown admin paths 404 without dispatching.
    let resp = reqwest::get(url(port, "/__understudy/unknown")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn two_clients_answer_independently_on_their_own_ports() {
    let harness = start(DispatchMode::PortPerClient, 2).await;
    let addr = harness.channel_addr().to_string();

    let a = StubClient::connect(&addr).await.unwrap();
    let b = StubClient::connect(&addr).await.unwrap();
    let port_a = a.port().unwrap();
    let port_b = b.port().unwrap();
    assert_ne!(port_a, port_b);

    for (client, tag) in [(&a, "alpha"), (&b, "beta")] {
        let tag = tag.to_string();
        client
            .register(
                Handler::builder()
                    .route("/who")
                    .respond_with(move |req, _| MockResponse::text(req.id, 200, tag.clone()))
                    .build()
                    .unwrap(),
            )
            .await;
    }
    wait_clients(&harness, 2).await;

    let from_a = reqwest::get(url(port_a, "/who")).await.unwrap().text().await.unwrap();
    let from_b = reqwest::get(url(port_b, "/who")).await.unwrap().text().await.unwrap();
    assert_eq!(from_a, "alpha");
    assert_eq!(from_b, "beta");
}

#[tokio::test]
async fn rule_file_stub_serves_templated_responses() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let client = StubClient::connect(&harness.channel_addr().to_string())
        .await
        .unwrap();
    let port = client.port().unwrap();

    let mut rules = tempfile::NamedTempFile::new().unwrap();
    rules
        .write_all(
            br#"
[[stub]]
name = "get-user"
methods = ["GET"]
route = "/users/{id}"

[stub.response]
status = 200
content_type = "application/json"
body = '{"id": "{{ route.id }}"}'

[[stub]]
name = "create-order"
methods = ["POST"]
route = "/orders"

[stub.match]
body_expr = ["body.total > 10"]

[stub.response]
status = 201
body = 'order for {{ body.total }}'
"#,
        )
        .unwrap();
    for handler in load_rules(rules.path()).unwrap() {
        client.register(handler).await;
    }
    wait_clients(&harness, 1).await;

    let resp = reqwest::get(url(port, "/users/42")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "42");

    let http = reqwest::Client::new();
    let resp = http
        .post(url(port, "/orders"))
        .body(r#"{"total": 25}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(resp.text().await.unwrap(), "order for 25");

    // Below the expression threshold, no stub matches.
    let resp = http
        .post(url(port, "/orders"))
        .body(r#"{"total": 5}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 501);
}

#[tokio::test]
async fn sustained_timeouts_leave_no_pending_entries() {
    let harness = start(DispatchMode::PortPerClient, 1).await;
    let client = StubClient::connect(&harness.channel_addr().to_string())
        .await
        .unwrap();
    let port = client.port().unwrap();
    // A client with no handlers still answers 501, so force timeouts with a
    // never-resolving responder instead.
    client
        .register(
            Handler::builder()
                .respond_async(|req, _| async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    MockResponse::text(req.id, 200, "never")
                })
                .build()
                .unwrap(),
        )
        .await;
    wait_clients(&harness, 1).await;

    let http = reqwest::Client::new();
    for _ in 0..5 {
        let resp = http.get(url(port, "/black-hole")).send().await.unwrap();
        assert_eq!(resp.status(), 504);
    }
    assert_eq!(harness.pending().len().await, 0);
}
