use std::time::Duration;

use anyhow::Result;

use futures::TryStreamExt;

use intermine_client::{ClientError, Operator, Page, Query, ServiceConnection};

use testing::fixtures::{tab_rows, MockService, Reply};

async fn gene_query(conn: &ServiceConnection) -> Result<Query> {
    let mut builder = conn.new_query().await?;
    builder.add_view_str("Gene.symbol, Gene.length")?;
    builder.add_constraint("Gene.length", Operator::Gt, 100)?;
    Ok(builder.build()?)
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn rows_match_the_view() -> Result<()> {
    let service = MockService::new();
    service.transport.reply(
        "/query/results",
        Reply::ok(tab_rows(&[&["zen", "1200"], &["eve", "500"], &["bcd", "3600"]])),
    );
    let conn = service.connect()?;
    let query = gene_query(&conn).await?;

    let rows = conn.execute(&query).await?.collect_rows().await?;
    assert_eq!(rows.len(), 3);
    for row in rows.iter() {
        assert_eq!(row.len(), query.views().len());
        assert_eq!(row.view(), query.views());
    }
    assert_eq!(rows[1].get("Gene.symbol"), Some("eve"));
    assert_eq!(&rows[2][1], "3600");
    assert_eq!(service.transport.open_handles(), 0);
    Ok(())
}

#[tokio::test]
async fn query_is_posted_as_pathquery_xml() -> Result<()> {
    let service = MockService::new();
    service.transport.reply("/query/results", Reply::ok(""));
    let conn = service.connect()?;
    let query = gene_query(&conn).await?;

    let rows = conn.execute(&query).await?.collect_rows().await?;
    assert!(rows.is_empty());

    let call = service.transport.last_call("/query/results").unwrap();
    assert_eq!(call.method, intermine_client::Method::Post);
    assert_eq!(param(&call.params, "format"), Some("tab"));
    assert_eq!(param(&call.params, "start"), None);
    assert_eq!(param(&call.params, "size"), None);

    let xml = param(&call.params, "query").unwrap();
    assert!(xml.starts_with(r#"<query name="" model="testmodel" view="Gene.symbol Gene.length""#));
    let sent = Query::from_xml(xml, query.model().clone())?;
    assert_eq!(sent, query);
    Ok(())
}

#[tokio::test]
async fn page_is_sent_and_enforced() -> Result<()> {
    let service = MockService::new();
    // A service ignoring the page size still gets cut off at it.
    service.transport.reply(
        "/query/results",
        Reply::ok(tab_rows(&[&["a", "1"], &["b", "2"], &["c", "3"]])),
    );
    let conn = service.connect()?;
    let query = gene_query(&conn).await?;

    let mut results = conn.execute_page(&query, Page::new(10, 2)).await?;
    assert!(results.next_row().await.is_some());
    assert!(results.next_row().await.is_some());
    assert!(results.next_row().await.is_none());
    assert_eq!(results.rows_read(), 2);
    assert!(!results.is_open());
    assert_eq!(service.transport.open_handles(), 0);

    let call = service.transport.last_call("/query/results").unwrap();
    assert_eq!(param(&call.params, "start"), Some("10"));
    assert_eq!(param(&call.params, "size"), Some("2"));
    Ok(())
}

#[tokio::test]
async fn malformed_row() -> Result<()> {
    let service = MockService::new();
    service.transport.reply(
        "/query/results",
        Reply::ok(tab_rows(&[&["zen", "1200"], &["eve"], &["bcd", "3600"]])),
    );
    let conn = service.connect()?;
    let query = gene_query(&conn).await?;

    let mut results = conn.execute(&query).await?;
    assert!(results.next_row().await.unwrap().is_ok());
    match results.next_row().await {
        Some(Err(ClientError::MalformedResponseError { message })) => {
            assert_eq!(message, "expected 2 columns, got 1 in row 2")
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(results.next_row().await.is_none());
    assert_eq!(service.transport.open_handles(), 0);
    Ok(())
}

#[tokio::test]
async fn dropping_early_releases_the_body() -> Result<()> {
    let service = MockService::new();
    service.transport.reply(
        "/query/results",
        Reply::chunked(vec!["zen\t1200\n", "eve\t500\n"]).stalled(),
    );
    let conn = service.connect()?;
    let query = gene_query(&conn).await?;

    let mut results = conn.execute(&query).await?;
    assert_eq!(service.transport.open_handles(), 1);
    assert!(results.next_row().await.is_some());
    drop(results);
    assert_eq!(service.transport.open_handles(), 0);

    let mut results = conn.execute(&query).await?;
    results.close();
    assert!(results.next_row().await.is_none());
    assert_eq!(service.transport.open_handles(), 0);
    Ok(())
}

#[tokio::test]
async fn stalled_body_times_out() -> Result<()> {
    let service = MockService::new();
    service.transport.reply(
        "/query/results",
        Reply::chunked(vec!["zen\t1200\n"]).stalled(),
    );
    let conn = ServiceConnection::builder()
        .with_base_url(service.base_url.clone())
        .with_transport(service.transport.clone())
        .with_read_timeout(Duration::from_millis(50))
        .build()?;
    let query = gene_query(&conn).await?;

    let mut results = conn.execute(&query).await?;
    assert!(results.next_row().await.unwrap().is_ok());
    assert!(matches!(
        results.next_row().await,
        Some(Err(ClientError::ServiceUnavailableError { .. }))
    ));
    assert!(!results.is_open());
    assert_eq!(service.transport.open_handles(), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_query() -> Result<()> {
    let service = MockService::new();
    service.transport.reply(
        "/query/results",
        Reply::status(400, r#"{"error": "Gene.length is not in the model", "statusCode": 400}"#),
    );
    let conn = service.connect()?;
    let query = gene_query(&conn).await?;

    match conn.execute(&query).await {
        Err(ClientError::ServerReturnedError { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Gene.length is not in the model");
        }
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("query should have failed"),
    }
    assert_eq!(service.transport.open_handles(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rows_as_a_stream() -> Result<()> {
    let service = MockService::new();
    service.transport.reply(
        "/query/results",
        Reply::chunked(vec!["zen\t12", "00\neve\t5", "00\n"]),
    );
    let conn = service.connect()?;
    let query = gene_query(&conn).await?;

    let stream = conn.execute(&query).await?.into_stream();
    let symbols: Vec<String> = stream
        .map_ok(|row| row.into_values().remove(0))
        .try_collect()
        .await?;
    assert_eq!(symbols, vec!["zen", "eve"]);
    Ok(())
}
