use std::sync::Arc;

use spark_sitemap::{
    ComponentGateway, ComponentHandle, ComponentSelector, codes,
    test_stubs::{
        CountingGlobalComponent, CountingRequestComponent, InMemoryContainer, StubSelector,
        UppercaseTransformer,
    },
};

use crate::support::{Harness, handle};

/// 验证登记为自动释放的池化组件在最外层出栈时归还，且先于作用域组件。
#[test]
fn managed_components_release_before_scoped_ones() {
    let container = InMemoryContainer::new()
        .with("plain", || handle(UppercaseTransformer))
        .with("counter", || handle(CountingRequestComponent::default()))
        .with("global", || handle(CountingGlobalComponent::default()));
    let mut harness = Harness::new(container);
    harness.enter("root");

    let plain = harness
        .gateway
        .lookup(&harness.stack, "plain")
        .expect("池化组件查找应成功");
    harness
        .gateway
        .add_for_automatic_release(&harness.stack, plain)
        .expect("有活动环境时登记应成功");
    harness.gateway.lookup(&harness.stack, "counter").expect("查找应成功");
    harness.gateway.lookup(&harness.stack, "global").expect("查找应成功");

    harness.stack.leave_environment();

    let releases: Vec<String> = harness
        .container
        .events()
        .into_iter()
        .filter(|event| event.starts_with("release:"))
        .collect();
    assert_eq!(
        releases,
        vec!["release:plain", "release:counter", "release:global"],
        "释放顺序：自动释放登记，然后每请求，最后全局"
    );
    assert_eq!(harness.container.outstanding(), 0);
}

/// 验证注销自动释放登记会立即归还组件，请求结束时不再重复归还。
#[test]
fn removing_registration_releases_immediately() {
    let container = InMemoryContainer::new().with("plain", || handle(UppercaseTransformer));
    let mut harness = Harness::new(container);
    harness.enter("root");

    let plain = harness
        .gateway
        .lookup(&harness.stack, "plain")
        .expect("查找应成功");
    harness
        .gateway
        .add_for_automatic_release(&harness.stack, Arc::clone(&plain))
        .expect("登记应成功");
    ComponentGateway::remove_from_automatic_release(&harness.stack, &plain)
        .expect("已登记的组件应能注销");
    assert_eq!(harness.container.count("release:plain"), 1);
    assert_eq!(
        harness
            .stack
            .request_scope()
            .map(|scope| scope.auto_release_count()),
        Some(0)
    );

    harness.stack.leave_environment();
    assert_eq!(harness.container.count("release:plain"), 1, "不得重复归还");
}

/// 验证注销从未登记的组件返回稳定错误码。
#[test]
fn removing_unknown_component_is_an_error() {
    let mut harness = Harness::new(InMemoryContainer::new());
    harness.enter("root");

    let stranger = handle(UppercaseTransformer);
    let err = ComponentGateway::remove_from_automatic_release(&harness.stack, &stranger)
        .expect_err("未登记的组件不能注销");
    assert_eq!(err.code(), codes::COMPONENT_AUTO_RELEASE_UNKNOWN);

    harness.stack.leave_environment();
}

/// 验证经选择器取得的组件先交还选择器，再把选择器交还外层网关。
#[test]
fn selected_components_return_to_selector_then_outer_gateway() {
    let chosen = handle(UppercaseTransformer);
    let selector = Arc::new(StubSelector::default().with_choice("upper", Arc::clone(&chosen)));
    let selector_handle: ComponentHandle = selector.clone();
    let container = InMemoryContainer::new().with_shared("selector", selector_handle);
    let mut harness = Harness::new(container);
    harness.enter("root");

    harness
        .gateway
        .lookup(&harness.stack, "selector")
        .expect("选择器查找应成功");
    let component = selector.select("upper").expect("hint 应命中");
    let as_selector: Arc<dyn ComponentSelector> = selector.clone();
    ComponentGateway::add_selected_for_automatic_release(
        &harness.stack,
        as_selector,
        component,
        Some(Arc::clone(&harness.gateway)),
    )
    .expect("登记应成功");

    assert_eq!(selector.released(), 0);
    harness.stack.leave_environment();
    assert_eq!(selector.released(), 1, "组件必须交还选择器");
    assert_eq!(
        harness.container.count("release:selector"),
        1,
        "选择器必须交还外层网关"
    );
}

/// 验证没有活动环境时登记自动释放失败。
#[test]
fn registration_requires_an_active_environment() {
    let harness = Harness::new(InMemoryContainer::new());
    let err = harness
        .gateway
        .add_for_automatic_release(&harness.stack, handle(UppercaseTransformer))
        .expect_err("空栈上没有可挂靠的登记表");
    assert_eq!(err.code(), codes::ENVIRONMENT_MISSING);
}
