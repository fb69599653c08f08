use std::time::Duration;

use anyhow::Result;

use intermine_client::{ClientError, ServiceConnection};

use testing::fixtures::{MockService, Reply};

#[tokio::test]
async fn connect_is_lazy() -> Result<()> {
    let service = MockService::new();
    let _conn = service.connect()?;
    assert!(service.transport.calls().is_empty());

    let conn = ServiceConnection::connect("http://localhost:1/service", None, Duration::from_secs(1))?;
    assert_eq!(conn.base_url(), "http://localhost:1/service");
    Ok(())
}

#[tokio::test]
async fn fetch_model_hits_network_once() -> Result<()> {
    let service = MockService::new();
    let conn = service.connect()?;

    let first = conn.fetch_model().await?;
    let second = conn.fetch_model().await?;

    assert_eq!(service.transport.call_count("/model"), 1);
    assert_eq!(first, second);
    assert_eq!(first.name(), "testmodel");

    let call = service.transport.last_call("/model").unwrap();
    assert!(call.params.contains(&("format".to_string(), "json".to_string())));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connections_share_a_registry() -> Result<()> {
    let service = MockService::new();
    let a = service.connect()?;
    let b = service.connect()?;

    let (ma, mb) = tokio::join!(a.fetch_model(), b.fetch_model());
    assert_eq!(ma?, mb?);
    assert_eq!(service.transport.call_count("/model"), 1);

    b.new_query().await?;
    assert_eq!(service.transport.call_count("/model"), 1);
    Ok(())
}

#[tokio::test]
async fn close_invalidates_the_model() -> Result<()> {
    let service = MockService::new();
    let conn = service.connect()?;
    conn.fetch_model().await?;
    assert!(service.registry.get(&service.base_url).is_some());

    conn.close();
    assert!(service.registry.get(&service.base_url).is_none());

    let conn = service.connect()?;
    conn.fetch_model().await?;
    assert_eq!(service.transport.call_count("/model"), 2);
    Ok(())
}

#[tokio::test]
async fn version_and_release_are_fetched_once() -> Result<()> {
    let service = MockService::new();
    let conn = service.connect()?;

    assert_eq!(conn.version().await?, 33);
    assert_eq!(conn.version().await?, 33);
    assert_eq!(conn.release().await?, "testmodel 2024-01");
    assert_eq!(conn.release().await?, "testmodel 2024-01");

    assert_eq!(service.transport.call_count("/version"), 1);
    assert_eq!(service.transport.call_count("/version/release"), 1);
    Ok(())
}

#[tokio::test]
async fn garbage_version_is_malformed() -> Result<()> {
    let service = MockService::new();
    service.transport.reply("/version", Reply::ok("<html>"));
    let conn = service.connect()?;

    assert!(matches!(
        conn.version().await,
        Err(ClientError::MalformedResponseError { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn status_codes_map_to_errors() -> Result<()> {
    let cases: Vec<(Reply, fn(&ClientError) -> bool)> = vec![
        (Reply::status(401, ""), |e| {
            matches!(e, ClientError::AuthenticationError { .. })
        }),
        (Reply::status(403, r#"{"error": "bad token"}"#), |e| {
            matches!(e, ClientError::AuthenticationError { message } if message == "bad token")
        }),
        (Reply::status(429, ""), |e| {
            matches!(e, ClientError::QuotaExceededError { .. })
        }),
        (Reply::status(502, "bad gateway"), |e| {
            matches!(e, ClientError::ServiceUnavailableError { .. })
        }),
        (Reply::status(404, r#"{"error": "not here"}"#), |e| {
            matches!(e, ClientError::ServerReturnedError { status: 404, .. })
        }),
        (Reply::unreachable(), |e| {
            matches!(e, ClientError::ServiceUnavailableError { .. })
        }),
        (Reply::timeout(), |e| {
            matches!(e, ClientError::ServiceUnavailableError { .. })
        }),
    ];

    for (reply, expected) in cases {
        let service = MockService::new();
        service.transport.reply("/model", reply.clone());
        let conn = service.connect()?;

        let err = conn.fetch_model().await.unwrap_err();
        assert!(expected(&err), "{:?} gave {:?}", reply, err);
        assert!(service.registry.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn failed_fetch_is_retried() -> Result<()> {
    let service = MockService::new();
    service.transport.reply("/model", Reply::status(503, ""));
    let conn = service.connect()?;
    assert!(conn.fetch_model().await.is_err());

    service
        .transport
        .reply("/model", Reply::ok(testing::fixtures::TEST_MODEL_JSON));
    conn.fetch_model().await?;
    assert_eq!(service.transport.call_count("/model"), 2);
    Ok(())
}

fn impatient(service: &MockService) -> Result<ServiceConnection> {
    Ok(ServiceConnection::builder()
        .with_base_url(service.base_url.clone())
        .with_transport(service.transport.clone())
        .with_registry(service.registry.clone())
        .with_read_timeout(Duration::from_millis(50))
        .build()?)
}

#[tokio::test]
async fn stalled_body_times_out() -> Result<()> {
    let service = MockService::new();
    let (head, _) = testing::fixtures::TEST_MODEL_JSON.split_at(40);
    service.transport.reply("/model", Reply::chunked(vec![head]).stalled());
    service.transport.reply("/version", Reply::ok("3").stalled());
    let conn = impatient(&service)?;

    let model = tokio::time::timeout(Duration::from_secs(5), conn.fetch_model()).await?;
    assert!(matches!(model, Err(ClientError::ServiceUnavailableError { .. })));
    assert!(service.registry.is_empty());

    let version = tokio::time::timeout(Duration::from_secs(5), conn.version()).await?;
    assert!(matches!(version, Err(ClientError::ServiceUnavailableError { .. })));

    assert_eq!(service.transport.open_handles(), 0);
    Ok(())
}

#[tokio::test]
async fn stalled_error_body_still_fails() -> Result<()> {
    let service = MockService::new();
    service
        .transport
        .reply("/model", Reply::status(503, "down for maintenance").stalled());
    let conn = impatient(&service)?;

    let model = tokio::time::timeout(Duration::from_secs(5), conn.fetch_model()).await?;
    assert!(matches!(model, Err(ClientError::ServiceUnavailableError { .. })));
    assert_eq!(service.transport.open_handles(), 0);
    Ok(())
}

#[tokio::test]
async fn long_error_body_is_cut_short() -> Result<()> {
    let service = MockService::new();
    service
        .transport
        .reply("/version", Reply::status(500, "x".repeat(1 << 20)));
    let conn = service.connect()?;

    match conn.version().await {
        Err(ClientError::ServiceUnavailableError { message }) => {
            assert!(!message.is_empty());
            assert!(message.len() <= 64 * 1024);
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn unparseable_model() -> Result<()> {
    let service = MockService::new();
    service.transport.reply("/model", Reply::ok("{\"model\": 3}"));
    let conn = service.connect()?;

    assert!(matches!(
        conn.fetch_model().await,
        Err(ClientError::ModelError { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn builder_requires_base_url() {
    assert!(matches!(
        ServiceConnection::builder().build(),
        Err(ClientError::MissingBaseUrl)
    ));
}
