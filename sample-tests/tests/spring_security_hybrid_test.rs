//! Spring security hybrid sample: accepts XSUAA tokens and identity service tokens.

mod common;

use common::{expect_body, expect_status};
use sample_tests::{HarnessContext, SampleApp};
use serial_test::serial;

fn app() -> SampleApp {
    SampleApp::new("spring-security-hybrid-usage")
        .with_xsuaa("xsuaa-authn")
        .with_identity("ias-authn")
}

async fn say_hello_xsuaa(context: &mut HarnessContext) -> anyhow::Result<()> {
    let path = "/sayHello";
    expect_status(&context.get(path).await?, 401, path)?;
    expect_status(&context.get_with_token(path).await?, 403, path)?;

    context.add_user_to_role("XSUAA-Viewer").await?;
    let response = context.get_with_token(path).await?;
    expect_status(&response, 200, path)?;
    let client_id = context.deployed_app().await?.credentials("xsuaa")?.require("clientid")?.to_string();
    expect_body(&response, &client_id, path)?;

    let path = "/method";
    let response = context.get_with_token(path).await?;
    expect_status(&response, 200, path)?;
    expect_body(&response, "You got the sensitive data for zone", path)
}

async fn say_hello_identity(context: &mut HarnessContext) -> anyhow::Result<()> {
    let path = "/sayHello";
    let id_token = context.id_token().await?;
    expect_status(&context.get_with_bearer(path, &id_token).await?, 403, path)
}

async fn checks(context: &mut HarnessContext) -> anyhow::Result<()> {
    say_hello_xsuaa(context).await?;
    say_hello_identity(context).await
}

#[tokio::test]
#[serial]
async fn spring_security_hybrid_sample() {
    skip_unless_enabled!();
    let mut context = common::setup(app()).await;

    let checks = checks(&mut context).await;
    common::finish(context, checks).await;
}
