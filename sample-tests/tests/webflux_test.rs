//! Spring webflux XSUAA sample behind an app router.

mod common;

use common::{expect_body, expect_status};
use sample_tests::{HarnessContext, SampleApp};
use serial_test::serial;

fn app() -> SampleApp {
    SampleApp::new("spring-webflux-security-xsuaa-usage")
        .with_xsuaa("xsuaa-webflux")
        .with_app_router("approuter-spring-webflux-security-xsuaa-usage")
}

async fn say_hello(context: &mut HarnessContext) -> anyhow::Result<()> {
    let path = "/v1/sayHello";
    expect_status(&context.get(path).await?, 401, path)?;
    expect_status(&context.get_with_token(path).await?, 403, path)?;

    context.add_user_to_role("Webflux_API_Viewer").await?;
    let response = context.get_with_token(path).await?;
    expect_status(&response, 200, path)?;
    let username = context.credentials.username.clone();
    expect_body(&response, &username, path)
}

#[tokio::test]
#[serial]
async fn webflux_sample() {
    skip_unless_enabled!();
    let mut context = common::setup(app()).await;

    let checks = say_hello(&mut context).await;
    common::finish(context, checks).await;
}
