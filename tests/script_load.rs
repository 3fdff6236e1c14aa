// tests/script_load.rs
mod common;

use common::{fixture_plugin, load, Concurrency};
use std::sync::Arc;
use worklens::config::Settings;
use worklens::ingest::providers::{github, jira};
use worklens::{
    builtin_registry, CallableRole, EngineSettings, Error, FetchContext, Plugin, Registry,
    RuntimeLimits, ScriptRuntime, ScriptSource,
};

async fn load_with(registry: Registry, script: &str) -> worklens::Result<(Arc<Registry>, ScriptRuntime)> {
    let registry = Arc::new(registry);
    let runtime = ScriptRuntime::load(
        Arc::clone(&registry),
        ScriptSource::inline("test.rhai", script),
        RuntimeLimits::default(),
    )
    .await?;
    Ok((registry, runtime))
}

#[test]
fn duplicate_plugin_is_a_configuration_error() {
    let mut registry = builtin_registry(&Settings::default()).unwrap();
    let err = registry
        .register(github::plugin(Default::default()))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicatePlugin(ref name) if name == "github"));
}

#[test]
fn builtin_names_are_unique_across_plugins() {
    let mut registry = Registry::new();
    registry
        .register(fixture_plugin(Arc::new(Concurrency::default())))
        .unwrap();
    let shadow = Plugin::new("shadow").with_builtin("fixture", |_| {
        Err(Error::invalid_arguments("fixture", "unreachable"))
    });
    assert!(matches!(
        registry.register(shadow),
        Err(Error::DuplicateBuiltin { .. })
    ));
}

#[tokio::test]
async fn syntax_error_stops_before_any_fetch() {
    let err = load("fixture(#{ project: \"p\" ").await.err().unwrap();
    assert!(matches!(err, Error::Script { ref origin, .. } if origin == "fixture.rhai"));
}

#[tokio::test]
async fn runtime_error_in_script_body_is_reported() {
    let err = load(r#"let x = undefined_function(1);"#).await.err().unwrap();
    assert!(matches!(err, Error::Script { .. }), "{err}");
}

#[tokio::test]
async fn non_callable_filter_is_rejected_at_load() {
    let err = load(r#"fixture(#{ project: "p", filters: [|e| true, "not a function"] });"#)
        .await
        .err()
        .unwrap();
    assert!(
        matches!(err, Error::InvalidArguments { ref builtin, .. } if builtin == "fixture"),
        "{err}"
    );
    assert!(err.to_string().contains("filters[1]"), "{err}");
}

#[tokio::test]
async fn non_callable_status_is_rejected_at_load() {
    let err = load(r#"fixture(#{ project: "p", status: "Open" });"#)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidArguments { .. }), "{err}");
}

#[tokio::test]
async fn filter_taking_two_parameters_is_rejected_at_load() {
    let err = load(r#"fixture(#{ project: "p", entries: [#{ id: "1" }], filters: [|a, b| true] });"#)
        .await
        .err()
        .unwrap();
    assert!(
        matches!(err, Error::InvalidArguments { ref builtin, .. } if builtin == "fixture"),
        "{err}"
    );
    assert!(err.to_string().contains("filters[0]"), "{err}");
}

#[tokio::test]
async fn reference_to_undefined_function_is_rejected_at_load() {
    let err = load(r#"fixture(#{ project: "p", status: Fn("missing") });"#)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidArguments { .. }), "{err}");
    assert!(err.to_string().contains("missing"), "{err}");
}

#[tokio::test]
async fn bad_signature_on_an_empty_source_is_still_reported() {
    // no entries means the function would never be called during the run
    let err = load(r#"fixture(#{ project: "empty", priorities: [|e, extra| 1] });"#)
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("priorities[0]"), "{err}");
}

#[tokio::test]
async fn named_and_capturing_functions_pass_the_signature_check() {
    let h = load(
        r#"
        fn weight(e) { 2 }
        let bonus = 3;
        fixture(#{ project: "p", entries: [#{ id: "1" }],
                   priorities: [Fn("weight"), |e| bonus], status: |e| "Open" });
        "#,
    )
    .await
    .unwrap();
    let report = h
        .engine(EngineSettings::default())
        .run(&FetchContext::background())
        .await
        .unwrap();
    assert_eq!(report.results[0].items[0].priority, 5);
}

#[tokio::test]
async fn unknown_backend_keys_are_rejected() {
    let registry = builtin_registry(&Settings::default()).unwrap();
    let err = load_with(registry, r#"github(#{ repo: "org/repo", milestone: "v2" });"#)
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("milestone"), "{err}");
}

#[tokio::test]
async fn tracker_builtins_register_sources_in_plugin_order() {
    let registry = builtin_registry(&Settings::default()).unwrap();
    let (registry, _runtime) = load_with(
        registry,
        r#"
        jira(#{ host: "jira.example.com", project: "OPS" });
        github(#{ repo: "org/api", state: "open", labels: ["bug"], limit: 20,
                  priorities: [|e| if e.kind == "PullRequest" { 1 } else { 0 }] });
        github(#{ host: "git.example.com", repo: "org/web" });
        "#,
    )
    .await
    .unwrap();

    assert!(registry.is_frozen());
    let sources: Vec<(String, String)> = registry
        .sources()
        .iter()
        .map(|s| (s.name().to_string(), s.project().to_string()))
        .collect();
    assert_eq!(
        sources,
        [
            (github::SOURCE_NAME.to_string(), "org/api".to_string()),
            (github::SOURCE_NAME.to_string(), "org/web".to_string()),
            (jira::SOURCE_NAME.to_string(), "OPS".to_string()),
        ]
    );
}

#[tokio::test]
async fn script_is_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worklens.rhai");
    std::fs::write(
        &path,
        "// one source\nfixture(#{ project: \"from-file\", entries: [#{ id: \"1\" }] });\n",
    )
    .unwrap();

    let mut registry = Registry::new();
    registry
        .register(fixture_plugin(Arc::new(Concurrency::default())))
        .unwrap();
    let registry = Arc::new(registry);
    let runtime = ScriptRuntime::load(
        Arc::clone(&registry),
        ScriptSource::from_path(&path).unwrap(),
        RuntimeLimits::default(),
    )
    .await
    .unwrap();

    let engine = worklens::Engine::new(registry, runtime.handle(), EngineSettings::default());
    let report = engine.run(&FetchContext::background()).await.unwrap();
    assert_eq!(report.results[0].project, "from-file");
}

#[test]
fn missing_script_file_is_a_script_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ScriptSource::from_path(&dir.path().join("nope.rhai")).unwrap_err();
    assert!(matches!(err, Error::Script { .. }));
}

#[tokio::test]
async fn runaway_callable_is_stopped_by_the_operation_limit() {
    let mut registry = Registry::new();
    registry
        .register(fixture_plugin(Arc::new(Concurrency::default())))
        .unwrap();
    let registry = Arc::new(registry);
    let runtime = ScriptRuntime::load(
        Arc::clone(&registry),
        ScriptSource::inline(
            "limit.rhai",
            r#"fixture(#{ project: "p", entries: [#{ id: "1" }],
                          priorities: [|e| { let n = 0; loop { n += 1; } }] });"#,
        ),
        RuntimeLimits {
            max_operations: 50_000,
        },
    )
    .await
    .unwrap();

    let engine = worklens::Engine::new(registry, runtime.handle(), EngineSettings::default());
    let report = engine.run(&FetchContext::background()).await.unwrap();
    assert!(report.results.is_empty());
    assert!(matches!(
        report.failures[0].error,
        Error::Callable {
            role: CallableRole::Priority,
            ..
        }
    ));
}

#[tokio::test]
async fn script_print_does_not_disturb_loading() {
    let h = load(r#"print("configuring"); debug("details"); fixture(#{ project: "p" });"#)
        .await
        .unwrap();
    assert_eq!(h.registry.sources().len(), 1);
}

#[tokio::test]
async fn example_script_loads_against_the_tracker_plugins() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/worklens.rhai.example");
    let registry = Arc::new(builtin_registry(&Settings::default()).unwrap());
    let _runtime = ScriptRuntime::load(
        Arc::clone(&registry),
        ScriptSource::from_path(&path).unwrap(),
        RuntimeLimits::default(),
    )
    .await
    .unwrap();
    assert_eq!(registry.sources().len(), 2);
}
