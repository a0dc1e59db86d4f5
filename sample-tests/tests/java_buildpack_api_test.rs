//! SAP Java buildpack API sample behind an app router.

mod common;

use common::{expect_body, expect_status};
use sample_tests::{HarnessContext, SampleApp};
use serial_test::serial;

fn app() -> SampleApp {
    SampleApp::new("sap-java-buildpack-api-usage")
        .with_xsuaa("xsuaa-buildpack")
        .with_app_router("approuter-sap-java-buildpack-api-usage")
}

async fn hello_token_servlet(context: &mut HarnessContext) -> anyhow::Result<()> {
    let path = "/hello-token";
    expect_status(&context.get(path).await?, 401, path)?;
    expect_status(&context.get_with_token(path).await?, 403, path)?;

    context.add_user_to_role("Buildpack_API_Viewer").await?;
    let response = context.get_with_token(path).await?;
    expect_status(&response, 200, path)?;
    let username = context.credentials.username.clone();
    expect_body(&response, &username, path)
}

#[tokio::test]
#[serial]
async fn java_buildpack_api_sample() {
    skip_unless_enabled!();
    let mut context = common::setup(app()).await;

    let checks = hello_token_servlet(&mut context).await;
    common::finish(context, checks).await;
}
