use anyhow::Result;

use intermine_client::{ClientError, Switchable};

use testing::fixtures::{tab_rows, MockService, Reply};

fn pairs(params: &[(String, String)]) -> Vec<(&str, &str)> {
    params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

#[tokio::test]
async fn templates_are_fetched_once() -> Result<()> {
    let service = MockService::new();
    let conn = service.connect()?;

    let templates = conn.templates().await?;
    assert_eq!(
        templates.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["employeesByAge", "geneLookup"]
    );

    let template = conn.template("employeesByAge").await?;
    assert_eq!(template.title(), "Employees --> age");
    assert_eq!(template.query().views(), &["Employee.name", "Employee.age"]);
    assert_eq!(template.editable_codes().collect::<Vec<_>>(), vec!['A', 'C']);
    assert_eq!(template.settings('C').unwrap().switchable, Switchable::Off);

    assert_eq!(service.transport.call_count("/templates"), 1);
    assert_eq!(service.transport.call_count("/model"), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_template() -> Result<()> {
    let service = MockService::new();
    let conn = service.connect()?;

    match conn.template("nope").await {
        Err(ClientError::UnknownTemplateError { name }) => assert_eq!(name, "nope"),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("template should not exist"),
    }
    Ok(())
}

#[tokio::test]
async fn broken_templates_are_skipped() -> Result<()> {
    let service = MockService::new();
    service.transport.reply(
        "/templates",
        Reply::ok(
            r#"{"templates": {
                "good": {"name": "good", "title": "", "comment": "", "model": "testmodel",
                         "view": ["Gene.symbol"]},
                "stale": {"name": "stale", "title": "", "comment": "", "model": "testmodel",
                          "view": ["Gene.noSuchField"]}
            }}"#,
        ),
    );
    let conn = service.connect()?;

    let templates = conn.templates().await?;
    assert_eq!(templates.len(), 1);
    assert!(templates.contains_key("good"));
    Ok(())
}

#[tokio::test]
async fn execute_template_sends_editable_constraints() -> Result<()> {
    let service = MockService::new();
    service.transport.reply(
        "/template/results",
        Reply::ok(tab_rows(&[&["Tatjana Berkel", "45"], &["Jennifer Schirrmann", "52"]])),
    );
    let conn = service.connect()?;

    let mut template = conn.template("employeesByAge").await?;
    template.with_value('A', 40)?;

    let rows = conn.execute_template(&template).await?.collect_rows().await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("Employee.age"), Some("45"));

    let call = service.transport.last_call("/template/results").unwrap();
    assert_eq!(
        pairs(&call.params),
        vec![
            ("name", "employeesByAge"),
            ("constraint1", "Employee.age"),
            ("op1", ">"),
            ("value1", "40"),
            ("code1", "A"),
            ("format", "tab"),
        ]
    );

    template.switch_on('C')?;
    conn.execute_template(&template).await?;
    let call = service.transport.last_call("/template/results").unwrap();
    let params = pairs(&call.params);
    assert!(params.contains(&("constraint2", "Employee.fullTime")));
    assert!(params.contains(&("code2", "C")));
    Ok(())
}

#[tokio::test]
async fn lookup_template_sends_extra_value() -> Result<()> {
    let service = MockService::new();
    service
        .transport
        .reply("/template/results", Reply::ok(tab_rows(&[&["zen", "D. melanogaster"]])));
    let conn = service.connect()?;

    let template = conn.template("geneLookup").await?;
    let rows = conn.execute_template(&template).await?.collect_rows().await?;
    assert_eq!(rows[0].values(), &["zen", "D. melanogaster"]);

    let call = service.transport.last_call("/template/results").unwrap();
    let params = pairs(&call.params);
    assert!(params.contains(&("op1", "LOOKUP")));
    assert!(params.contains(&("value1", "zen")));
    assert!(params.contains(&("extra1", "D. melanogaster")));
    Ok(())
}

#[tokio::test]
async fn locked_constraints_cannot_change() -> Result<()> {
    let service = MockService::new();
    let conn = service.connect()?;

    let mut template = conn.template("employeesByAge").await?;
    assert!(template.with_value('B', "Accounting").is_err());
    assert!(template.switch_off('A').is_err());
    assert!(template.with_value('Z', "x").is_err());
    Ok(())
}
