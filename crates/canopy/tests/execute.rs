//! Remote execution over loopback TCP.

use std::time::Duration;

use canopy::sync::{Execution, SyncError};
use canopy::{Model, NodeKey, Scope, Value};
use canopy_core::ErrorCode;
use canopy_sync::Dispatcher;
use canopy_testkit::{node, wide_config, Loopback, TEST_TIMEOUT};

type Action = (&'static str, Vec<(&'static str, &'static str)>);

/// Build a detached script in the client's tree.
async fn script(client: &Dispatcher, actions: Vec<Action>) -> NodeKey {
    client
        .with_model(move |m| {
            let script = m.create_node("script");
            for (kind, attrs) in &actions {
                node(m, script, kind, attrs);
            }
            script
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_execute_round_trip() {
    let loopback = Loopback::start(|m| {
        wide_config(m);
    })
    .await;
    let (client, peer) = loopback.client().await;
    let script = script(
        &client,
        vec![
            ("assign", vec![("name", "x"), ("select", "/config/group")]),
            ("return", vec![("select", "$x")]),
        ],
    )
    .await;

    let mut scope = Scope::new();
    scope.set("greeting", Value::Text("hi".into()));
    let results = peer.execute(&mut scope, &[], script).await.unwrap();

    assert_eq!(results.len(), 1);
    let returned = results[0].as_nodes().unwrap().to_vec();
    assert_eq!(returned.len(), 4);
    let bound = scope.get("x").and_then(Value::as_nodes).unwrap().to_vec();
    assert_eq!(bound.len(), 4);
    assert_eq!(scope.get("greeting"), Some(&Value::Text("hi".into())));

    let types = client
        .with_model(move |m| {
            returned
                .iter()
                .map(|k| (m.type_name(*k).map(str::to_owned), m.parent(*k)))
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();
    assert!(types.iter().all(|(t, parent)| t.as_deref() == Some("group") && parent.is_none()));
}

#[tokio::test]
async fn test_execute_changes_reach_the_server_tree() {
    let loopback = Loopback::start(|m| {
        wide_config(m);
    })
    .await;
    let (client, peer) = loopback.client().await;
    let script = script(
        &client,
        vec![
            ("set", vec![("select", "/config"), ("name", "mode"), ("value", "remote")]),
            ("return", vec![("select", "count(/config/group)")]),
        ],
    )
    .await;

    let results = peer.execute(&mut Scope::new(), &[], script).await.unwrap();
    assert_eq!(results, vec![Value::Number(4.0)]);

    let mode = loopback
        .with_model(|m: &mut Model| {
            let config = m.children(m.root())[0];
            m.attribute(config, "mode").map(str::to_owned)
        })
        .await;
    assert_eq!(mode.as_deref(), Some("remote"));
}

#[tokio::test]
async fn test_script_failure_is_remote_error_with_location() {
    let loopback = Loopback::start(|m| {
        wide_config(m);
    })
    .await;
    let (client, peer) = loopback.client().await;
    let script = script(
        &client,
        vec![
            ("assign", vec![("name", "x"), ("select", "count(//leaf)")]),
            ("fail", vec![("message", "boom")]),
        ],
    )
    .await;

    match peer.execute(&mut Scope::new(), &[], script).await {
        Err(SyncError::Remote {
            code,
            message,
            context,
        }) => {
            assert_eq!(code, ErrorCode::ExecutionFailed);
            assert_eq!(message, "boom");
            assert_eq!(context, "script/fail[1]");
        }
        other => panic!("expected remote error, got {:?}", other),
    }
    // Non-fatal: the connection stays usable.
    assert!(peer.is_connected());
    assert_eq!(peer.bind("/config").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unbound_variable_fails_before_sending() {
    let loopback = Loopback::start(|_| {}).await;
    let (client, peer) = loopback.client().await;
    let script = script(&client, vec![("return", vec![("select", "true()")])]).await;

    let err = peer
        .execute(&mut Scope::new(), &["missing"], script)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Model(_)));
    assert_eq!(peer.session().pending_count(), 0);
}

#[tokio::test]
async fn test_execute_with_callback() {
    let loopback = Loopback::start(|m| {
        wide_config(m);
    })
    .await;
    let (client, peer) = loopback.client().await;
    let script = script(
        &client,
        vec![("assign", vec![("name", "n"), ("select", "count(//section)")])],
    )
    .await;

    let (tx, rx) = tokio::sync::oneshot::channel::<canopy_sync::Result<Execution>>();
    let handle = peer.execute_with(Scope::new(), Vec::new(), script, move |outcome| {
        let _ = tx.send(outcome);
    });

    let execution = tokio::time::timeout(TEST_TIMEOUT, rx).await.unwrap().unwrap().unwrap();
    handle.await.unwrap();
    assert!(execution.results.is_empty());
    assert_eq!(execution.scope.get("n"), Some(&Value::Number(8.0)));
}

#[tokio::test]
async fn test_detached_temporaries_are_released() {
    let loopback = Loopback::start(|m| {
        wide_config(m);
    })
    .await;
    let (client, peer) = loopback.client().await;
    let script = script(&client, vec![("return", vec![("select", "$input")])]).await;
    let input = client
        .with_model(|m| {
            let item = m.create_node("item");
            m.set_attribute(item, "id", "local").unwrap();
            item
        })
        .await
        .unwrap();

    let before = loopback.with_model(|m: &mut Model| m.len()).await;
    let mut scope = Scope::new();
    scope.set("input", Value::Nodes(vec![input]));
    let results = peer
        .execute_timeout(&mut scope, &["input"], script, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(results[0].as_nodes().map(<[NodeKey]>::len), Some(1));

    let after = loopback.with_model(|m: &mut Model| m.len()).await;
    assert_eq!(before, after);
}
