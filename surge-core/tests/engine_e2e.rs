use std::time::Duration;

use bytes::Bytes;
use surge_core::{
    HttpRequest, MetricKind, ScenarioError, TestConfig, ThinkTime, ThresholdRule,
    TransportErrorKind, run_test,
};
use surge_testserver::TestServer;

fn rule(selector: &str, expr: &str) -> anyhow::Result<ThresholdRule> {
    ThresholdRule::parse(selector, expr).map_err(|e| anyhow::anyhow!(e))
}

#[tokio::test]
async fn e2e_clean_run_passes_thresholds() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let hello = server.urls().hello.clone();

    let mut config = TestConfig::new(3, Duration::from_secs(1));
    config.think_time = ThinkTime::Fixed(Duration::from_millis(10));
    config.thresholds = vec![
        rule("http_req_failed", "rate<0.01")?,
        rule("checks", "rate>0.99")?,
        rule("http_req_duration", "p(95)<5000")?,
    ];

    let summary = run_test(config, move |ctx| {
        let hello = hello.clone();
        async move {
            let res = ctx.http().get(&hello).await;
            ctx.check("status is 200", res.status == Some(200));
            ctx.check("body says hello", res.body_utf8() == Some("Hello World!"));
            Ok(())
        }
    })
    .await?;

    assert_eq!(summary.http_failure_rate, 0.0);
    assert!(summary.passed);
    assert!(summary.iterations_total > 0);
    assert!(summary.requests_total >= summary.iterations_total);
    assert!(summary.latency.is_some());
    assert!(summary.thresholds.iter().all(|t| t.passed));
    assert!(server.stats().requests_total() > 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn e2e_failing_checks_do_not_stop_the_vus() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let hello = server.urls().hello.clone();

    let mut config = TestConfig::new(2, Duration::from_millis(500));
    config.think_time = ThinkTime::Fixed(Duration::from_millis(10));
    config.thresholds = vec![rule("checks", "rate>0.99")?];

    let summary = run_test(config, move |ctx| {
        let hello = hello.clone();
        async move {
            let res = ctx.http().get(&hello).await;
            ctx.check("impossible status", res.status == Some(599));
            Ok(())
        }
    })
    .await?;

    // The check fails every iteration; the virtual users keep going anyway.
    assert!(summary.iterations_total > 2);
    assert!(!summary.passed);

    let checks = &summary.checks;
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].name, "impossible status");
    assert_eq!(checks[0].failed, checks[0].total);
    assert_eq!(checks[0].pass_rate, 0.0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn e2e_timeouts_are_transport_errors() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let slow = format!("{}?ms=5000", server.urls().slow);

    let mut config = TestConfig::new(1, Duration::from_millis(400));
    config.think_time = ThinkTime::Fixed(Duration::from_millis(10));
    config.thresholds = vec![rule("http_req_failed", "rate<0.01")?];

    let summary = run_test(config, move |ctx| {
        let slow = slow.clone();
        async move {
            let mut req = HttpRequest::get(&slow);
            req.timeout = Some(Duration::from_millis(50));
            let res = ctx.http().execute(req).await;
            ctx.check("timed out", res.error == Some(TransportErrorKind::Timeout));
            ctx.check("status unset", res.status.is_none());
            Ok(())
        }
    })
    .await?;

    assert_eq!(summary.http_failure_rate, 1.0);
    assert!(!summary.passed);

    let checks_ok = summary
        .checks
        .iter()
        .all(|c| c.failed == 0 && c.total > 0);
    assert!(checks_ok, "timeout classification checks failed: {:?}", summary.checks);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn e2e_http_error_statuses_are_normal_results() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let not_found = server.urls().status(404);

    let mut config = TestConfig::new(1, Duration::from_millis(300));
    config.think_time = ThinkTime::Fixed(Duration::from_millis(10));

    let summary = run_test(config, move |ctx| {
        let not_found = not_found.clone();
        async move {
            let res = ctx.http().get(&not_found).await;
            ctx.check("status is 404", res.status == Some(404));
            ctx.check("no transport error", res.error.is_none());
            Ok(())
        }
    })
    .await?;

    // 4xx counts toward the failure rate but never raises an error.
    assert_eq!(summary.http_failure_rate, 1.0);
    assert_eq!(summary.failed_iterations_total, 0);
    let checks_ok = summary.checks.iter().all(|c| c.failed == 0);
    assert!(checks_ok, "4xx classification checks failed: {:?}", summary.checks);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn e2e_custom_metrics_and_tagged_thresholds() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let hello = server.urls().hello.clone();

    let mut config = TestConfig::new(2, Duration::from_millis(600));
    config.think_time = ThinkTime::Range {
        min: Duration::from_millis(5),
        max: Duration::from_millis(20),
    };
    config.seed = 42;
    config.thresholds = vec![
        rule("latency", "p(95)<5000")?,
        rule("requests_made", "count>0")?,
        rule("http_req_duration{endpoint:hello}", "count>0")?,
    ];

    let summary = run_test(config, move |ctx| {
        let hello = hello.clone();
        async move {
            let latency = ctx
                .metrics()
                .register_handle("latency", MetricKind::Trend)
                .map_err(|e| ScenarioError::fatal(e.to_string()))?;
            let requests = ctx
                .metrics()
                .register_handle("requests_made", MetricKind::Counter)
                .map_err(|e| ScenarioError::fatal(e.to_string()))?;

            let mut req = HttpRequest::get(&hello);
            req.tags
                .push(("endpoint".to_string(), "hello".to_string()));
            let res = ctx.http().execute(req).await;

            latency.add(res.duration_ms());
            requests.add(1.0);
            ctx.check("status is 200", res.status == Some(200));
            Ok(())
        }
    })
    .await?;

    assert!(summary.passed, "thresholds: {:?}", summary.thresholds);

    let latency_series = summary
        .metrics
        .iter()
        .find(|m| m.name == "latency" && m.tags.is_empty());
    assert!(latency_series.is_some(), "custom trend metric missing");

    let tagged_series = summary.metrics.iter().find(|m| {
        m.name == "http_req_duration"
            && m.tags == vec![("endpoint".to_string(), "hello".to_string())]
    });
    assert!(tagged_series.is_some(), "tagged request series missing");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn e2e_login_then_fetch_mirrors_an_auth_scenario() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let login = server.urls().login.clone();
    let hello = server.urls().hello.clone();

    let mut config = TestConfig::new(2, Duration::from_millis(500));
    config.think_time = ThinkTime::Fixed(Duration::from_millis(10));
    config.thresholds = vec![
        rule("http_req_failed", "rate<0.01")?,
        rule("checks", "rate>0.98")?,
    ];

    let summary = run_test(config, move |ctx| {
        let login = login.clone();
        let hello = hello.clone();
        async move {
            let mut req = HttpRequest::post(
                &login,
                Bytes::from_static(br#"{"username":"vu","password":"secret"}"#),
            );
            req.headers
                .push(("content-type".to_string(), "application/json".to_string()));
            let res = ctx.http().execute(req).await;

            let token_present = res
                .body_utf8()
                .is_some_and(|body| body.contains("token-vu"));
            ctx.check("login succeeded", res.status == Some(200));
            if !ctx.check("token exists", token_present) {
                // Without a token the rest of this VU's iterations are pointless.
                return Err(ScenarioError::fatal("could not obtain auth token"));
            }

            let mut fetch = HttpRequest::get(&hello);
            fetch
                .headers
                .push(("authorization".to_string(), "Bearer token-vu".to_string()));
            let res = ctx.http().execute(fetch).await;
            ctx.check("fetch succeeded", res.status == Some(200));
            Ok(())
        }
    })
    .await?;

    assert!(summary.passed, "thresholds: {:?}", summary.thresholds);
    assert_eq!(summary.failed_iterations_total, 0);
    assert!(server.stats().logins_total() > 0);
    assert!(server.stats().saw_json_content_type() > 0);

    server.shutdown().await;
    Ok(())
}
