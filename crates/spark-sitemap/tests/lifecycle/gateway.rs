use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use spark_sitemap::{
    ComponentGateway, ComponentHandle, Parameters, SOURCE_RESOLVER_ROLE, SitemapError,
    SitemapSettings, Source, codes,
    component::{downcast_component, same_component},
    test_stubs::{
        ConfigurableComponent, InMemoryContainer, ParentAwareComponent, RecomposingComponent,
        StubSourceResolver,
    },
};

use crate::support::{Harness, handle};

fn resolver_container() -> (InMemoryContainer, Arc<StubSourceResolver>) {
    let resolver = Arc::new(StubSourceResolver::default());
    let shared: ComponentHandle = resolver.clone();
    (
        InMemoryContainer::new().with_shared(SOURCE_RESOLVER_ROLE, shared),
        resolver,
    )
}

/// 验证解析门面以当前环境上下文为基准，并且对门面的归还不触达容器。
#[test]
fn source_resolver_facade_uses_environment_context() {
    let (container, resolver) = resolver_container();
    let mut harness = Harness::new(container);
    harness.enter("root");

    let facade = harness
        .gateway
        .lookup(&harness.stack, SOURCE_RESOLVER_ROLE)
        .expect("解析器 role 永远可查找");
    let source = facade
        .as_source_resolver()
        .expect("门面必须暴露解析能力")
        .resolve_uri("page.xml", Some("/app/"), &Parameters::new())
        .expect("解析应成功");
    assert_eq!(source.uri(), "/app/page.xml");

    let source = harness
        .gateway
        .source_resolver(&harness.stack)
        .resolve("index.xml", &Parameters::new())
        .expect("解析应成功");
    assert_eq!(source.uri(), "/app/index.xml");
    assert_eq!(resolver.resolved(), vec!["/app/page.xml", "/app/index.xml"]);
    assert_eq!(
        harness.container.count("lookup:source-resolver"),
        1,
        "真实解析器只查找一次并缓存"
    );

    let err = harness
        .gateway
        .source_resolver(&harness.stack)
        .resolve("", &Parameters::new())
        .err().expect("空 URI 无法解析");
    assert_eq!(err.code(), codes::SOURCE_RESOLUTION_FAILED);

    harness.gateway.release(&facade);
    assert_eq!(harness.container.count("release:source-resolver"), 0);
    harness.stack.leave_environment();
}

/// 验证销毁顺序：先归还缓存的解析器再销毁容器；销毁后查找失败，重复销毁为空操作。
#[test]
fn dispose_releases_resolver_before_container() {
    let (container, _resolver) = resolver_container();
    let mut harness = Harness::new(container);
    harness.enter("root");
    harness
        .gateway
        .source_resolver(&harness.stack)
        .resolve("page.xml", &Parameters::new())
        .expect("解析应成功");
    harness.stack.leave_environment();

    harness.gateway.dispose();
    harness.gateway.dispose();

    let events = harness.container.events();
    assert_eq!(
        events[events.len() - 2..],
        ["release:source-resolver".to_owned(), "dispose".to_owned()]
    );
    assert_eq!(harness.container.count("dispose"), 1, "重复销毁必须是空操作");
    assert!(harness.gateway.is_disposed());

    let err = harness
        .gateway
        .lookup(&harness.stack, "anything")
        .err().expect("销毁后的网关不得再提供组件");
    assert_eq!(err.code(), codes::COMPONENT_DISPOSED);
}

/// 验证 role 为空与容器缺失 role 的错误码。
#[test]
fn lookup_reports_missing_roles() {
    let harness = Harness::new(InMemoryContainer::new());

    let err = harness
        .gateway
        .lookup(&harness.stack, "")
        .err().expect("空 role 必须拒绝");
    assert_eq!(err.code(), codes::COMPONENT_ROLE_MISSING);

    let err = harness
        .gateway
        .lookup(&harness.stack, "nowhere")
        .err().expect("未注册的 role 必须失败");
    assert_eq!(err.code(), codes::COMPONENT_LOOKUP_FAILED);
    assert_eq!(err.role(), Some("nowhere"));
    assert!(!harness.gateway.has_component("nowhere"));
    assert!(harness.gateway.has_component(SOURCE_RESOLVER_ROLE));
}

/// 验证子网关初始化时为父容器感知组件注入定位器，定位器从父网关取组件。
#[test]
fn initialize_injects_parent_locator() {
    let parent_container = Arc::new(
        InMemoryContainer::new().with("catalogue", || handle(ParentAwareComponent::default())),
    );
    let parent = ComponentGateway::new(
        "parent",
        parent_container.clone(),
        Arc::new(SitemapSettings::default()),
    );

    let aware = Arc::new(ParentAwareComponent::default());
    let aware_handle: ComponentHandle = aware.clone();
    let orphan = Arc::new(ParentAwareComponent::default());
    let orphan_handle: ComponentHandle = orphan.clone();
    let child_container = Arc::new(
        InMemoryContainer::new()
            .with_shared("catalogue", aware_handle)
            .with_shared("orphan", orphan_handle)
            .with_parent_aware("catalogue")
            .with_parent_aware("orphan"),
    );
    let child = ComponentGateway::with_parent("child", child_container.clone(), Arc::clone(&parent));

    child.initialize().expect("初始化应成功");

    let locator = aware.locator().expect("父网关能提供的 role 必须注入定位器");
    assert_eq!(locator.role(), "catalogue");
    assert!(orphan.locator().is_none(), "父网关没有的 role 不注入");
    assert_eq!(child_container.count("lookup:catalogue"), 1);
    assert_eq!(child_container.count("release:catalogue"), 1);
    assert_eq!(parent_container.count("lookup:catalogue"), 0, "父组件按需获取");

    let mut harness = Harness::new(InMemoryContainer::new());
    harness.enter("root");
    let from_parent = locator.lookup(&harness.stack).expect("定位器应从父网关取得组件");
    locator.release(&from_parent);
    assert_eq!(parent_container.count("lookup:catalogue"), 1);
    assert_eq!(parent_container.count("release:catalogue"), 1);
    harness.stack.leave_environment();
}

/// 验证 sitemap 配置注入：同一 role 的多个实例共享一次解析结果，销毁时清空持有者。
#[test]
fn configuration_holder_is_parsed_once_per_role() {
    let settings = SitemapSettings::from_toml_str(
        r#"
        [components.configured]
        value = "hello"
        "#,
    )
    .expect("配置应可解析");
    let parses = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&parses);
    let container = InMemoryContainer::new()
        .with("configured", move || {
            handle(ConfigurableComponent::with_counter(Arc::clone(&counter)))
        })
        .with("broken", || handle(ConfigurableComponent::default()));
    let harness = Harness::with_settings(container, settings);

    for _ in 0..2 {
        let component = harness
            .gateway
            .lookup(&harness.stack, "configured")
            .expect("配置注入应成功");
        let configured =
            downcast_component::<ConfigurableComponent>(&component).expect("类型应匹配");
        assert_eq!(configured.value().as_deref(), Some("hello"));
        harness.gateway.release(&component);
    }
    assert_eq!(parses.load(Ordering::SeqCst), 1, "解析结果必须缓存在持有者上");

    let err = harness
        .gateway
        .lookup(&harness.stack, "broken")
        .err().expect("缺少配置字段时注入失败");
    assert!(matches!(err, SitemapError::Configuration { .. }));
    assert_eq!(err.code(), codes::COMPONENT_CONFIGURATION_FAILED);
    assert_eq!(err.role(), Some("broken"));
    assert_eq!(
        harness.container.count("release:broken"),
        1,
        "注入失败的池化实例必须归还"
    );
    assert_eq!(harness.gateway.configuration_holder_count(), 2);

    harness.gateway.dispose();
    assert_eq!(harness.gateway.configuration_holder_count(), 0);
}

/// 验证作用域组件配置注入失败时不入登记表：再次查找仍然失败，且每个实例都交还容器。
#[test]
fn failed_configuration_of_scoped_component_is_not_registered() {
    let container = InMemoryContainer::new()
        .with("scoped-configured", || handle(ConfigurableComponent::request_scoped()));
    let mut harness = Harness::new(container);
    harness.enter("root");

    for attempt in 1..=2 {
        let err = harness
            .gateway
            .lookup(&harness.stack, "scoped-configured")
            .err().expect("缺少配置字段时每次查找都必须失败");
        assert!(matches!(err, SitemapError::Configuration { .. }));
        assert_eq!(err.role(), Some("scoped-configured"));
        assert_eq!(harness.container.count("lookup:scoped-configured"), attempt);
        assert_eq!(harness.container.count("release:scoped-configured"), attempt);
    }
    let scope = harness.stack.request_scope().expect("作用域组件的查找会创建登记表");
    assert_eq!(scope.request_count(), 0, "配置失败的实例不得入表");

    harness.stack.leave_environment();
    assert_eq!(harness.container.count("release:scoped-configured"), 2);
}

/// 验证重组先于一次性初始化执行，命中登记表时按查找网关再次重组。
#[test]
fn recomposition_follows_the_looking_up_gateway() {
    let container = InMemoryContainer::new()
        .with("recomposing", || handle(RecomposingComponent::default()));
    let mut harness = Harness::new(container);
    harness.enter("root");

    let first = harness
        .gateway
        .lookup(&harness.stack, "recomposing")
        .expect("首次查找应成功");
    let component = downcast_component::<RecomposingComponent>(&first).expect("类型应匹配");
    assert_eq!(component.recomposed_by(), vec!["root"]);
    assert_eq!(component.recomposed_before_setup(), Some(1), "重组必须先于初始化");
    assert_eq!(component.setups(), 1);

    let child = ComponentGateway::with_parent(
        "child",
        harness.container.clone(),
        Arc::clone(&harness.gateway),
    );
    let again = child
        .lookup(&harness.stack, "recomposing")
        .expect("子网关命中登记表");
    assert!(same_component(&first, &again));
    assert_eq!(component.recomposed_by(), vec!["root", "child"]);
    assert_eq!(component.setups(), 1, "命中登记表不再初始化");

    component.refuse_recompose();
    let err = harness
        .gateway
        .lookup(&harness.stack, "recomposing")
        .err().expect("命中时重组失败必须传播");
    assert_eq!(err.code(), codes::COMPONENT_SETUP_FAILED);
    assert_eq!(err.role(), Some("recomposing"));

    harness.stack.leave_environment();
    assert_eq!(harness.container.count("lookup:recomposing"), 1);
    assert_eq!(harness.container.count("release:recomposing"), 1);
}

/// 验证初始化前的重组失败按初始化失败处理：实例归还容器且不入表。
#[test]
fn recompose_failure_before_setup_releases_instance() {
    let container = InMemoryContainer::new()
        .with("stubborn", || handle(RecomposingComponent::failing()));
    let mut harness = Harness::new(container);
    harness.enter("root");

    for attempt in 1..=2 {
        let err = harness
            .gateway
            .lookup(&harness.stack, "stubborn")
            .err().expect("重组失败必须传播");
        assert_eq!(err.code(), codes::COMPONENT_SETUP_FAILED);
        assert_eq!(harness.container.count("release:stubborn"), attempt);
    }
    assert_eq!(harness.container.outstanding(), 0);
    harness.stack.leave_environment();
}
