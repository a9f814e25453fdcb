use std::sync::Arc;

use strata_cache::{CancellationToken, SessionError, ViewState};
use strata_test_utils::TodoAnalyzer;

use super::{check, id, quiet, Workspace};

const WORKSPACE: &str = r#"
//- /ws/p1/lib.src
export F
todo
//- /ws/p2/lib.src
import p1
use F
"#;

#[test]
fn views_load_ready() {
    let ws = Workspace::new(WORKSPACE);
    let (view, snapshot) = ws.view("ws", "/ws");

    assert_eq!(view.state(), ViewState::Ready);
    assert_eq!(view.name(), "ws");
    assert_eq!(view.folder(), std::path::Path::new("/ws"));
    assert_eq!(snapshot.generation(), 0);
    assert_eq!(snapshot.view_id(), view.id());
    assert!(Arc::ptr_eq(&view.snapshot().unwrap(), &snapshot));
    let mut packages = snapshot.workspace_packages();
    packages.sort();
    assert_eq!(packages, vec![id("p1"), id("p2")]);
    assert_eq!(ws.session.views().len(), 1);
    assert!(Arc::ptr_eq(&ws.session.view("ws").unwrap(), &view));
}

#[test]
fn relative_folders_are_rejected() {
    let ws = Workspace::new(WORKSPACE);
    let err = ws.session.new_view("ws", "ws", quiet()).unwrap_err();
    assert!(matches!(err, SessionError::RelativeFolder { .. }), "{err:?}");
    assert!(ws.session.views().is_empty());
}

#[test]
fn generations_increase_with_every_change() {
    let ws = Workspace::new(WORKSPACE);
    let (view, s0) = ws.view("ws", "/ws");

    let mut last = s0.generation();
    for round in 0..5 {
        let text = format!("export F\nexport R{round}\n");
        let snapshot = ws.write("/ws/p1/lib.src", &text).remove(0);
        assert!(snapshot.generation() > last);
        last = snapshot.generation();
    }
    assert_eq!(view.snapshot().unwrap().generation(), last);
}

#[tokio::test]
async fn set_options_rebuilds_the_view() {
    let ws = Workspace::new(WORKSPACE);
    let (old, s0) = ws.view("ws", "/ws");
    let (_other, _) = ws.view("other", "/elsewhere");
    check(&s0, "p2").await.unwrap();

    let mut options = quiet();
    options
        .disabled_analyzers
        .insert(TodoAnalyzer::NAME.to_string());
    let (view, snapshot) = old.set_options(options).unwrap();

    assert_eq!(old.state(), ViewState::Shutdown);
    assert!(matches!(old.snapshot(), Err(SessionError::ViewShutdown { .. })));
    assert_eq!(view.state(), ViewState::Ready);
    assert_ne!(view.id(), old.id());
    assert_eq!(view.name(), "ws");
    assert!(view.options().disabled_analyzers.contains(TodoAnalyzer::NAME));

    let views = ws.session.views();
    assert_eq!(views.len(), 2);
    assert!(Arc::ptr_eq(&views[0], &view));
    assert_eq!(views[1].name(), "other");

    // Every handle belongs to the rebuilt view, and the old snapshot keeps working.
    assert!(snapshot
        .action_handle(&id("p1"), TodoAnalyzer::NAME)
        .is_none());
    assert!(s0.action_handle(&id("p1"), TodoAnalyzer::NAME).is_some());
    let results = snapshot.analyze(&id("p1"), &CancellationToken::new()).await;
    assert_eq!(results.len(), 1);
    check(&s0, "p1").await.unwrap();

    assert!(matches!(
        old.set_options(quiet()),
        Err(SessionError::ViewNotFound { .. })
    ));
}

#[test]
fn build_options_change_package_keys() {
    let ws = Workspace::new(WORKSPACE);
    let (view, s0) = ws.view("ws", "/ws");
    let mut options = quiet();
    options.build_flags.push("-tags=integration".to_string());
    let (_view, s1) = view.set_options(options).unwrap();
    assert_ne!(s0.package_key(&id("p1")), s1.package_key(&id("p1")));
}

#[test]
fn removing_a_view_shuts_it_down() {
    let ws = Workspace::new(WORKSPACE);
    let (view, _) = ws.view("ws", "/ws");

    ws.session.remove_view(&view).unwrap();
    assert_eq!(view.state(), ViewState::Shutdown);
    assert!(ws.session.views().is_empty());
    assert!(matches!(
        ws.session.remove_view(&view),
        Err(SessionError::ViewNotFound { .. })
    ));
    // Shutting down twice is harmless.
    view.shutdown();
    assert_eq!(view.state(), ViewState::Shutdown);
}

#[test]
fn session_shutdown_stops_every_view() {
    let ws = Workspace::new(WORKSPACE);
    let (a, _) = ws.view("a", "/ws");
    let (b, _) = ws.view("b", "/ws/p1");

    ws.session.shutdown();
    assert_eq!(a.state(), ViewState::Shutdown);
    assert_eq!(b.state(), ViewState::Shutdown);
    assert!(ws.session.views().is_empty());
    assert!(matches!(
        ws.session.view_of(&strata_test_utils::uri("/ws/p1/lib.src")),
        Err(SessionError::NoViews)
    ));
}

#[test]
fn dropping_the_session_detaches_its_views() {
    let ws = Workspace::new(WORKSPACE);
    let (view, _) = ws.view("ws", "/ws");
    let Workspace { session, .. } = ws;
    drop(session);

    assert!(matches!(
        view.set_options(quiet()),
        Err(SessionError::SessionClosed { .. })
    ));
}

#[tokio::test]
async fn preload_warms_workspace_packages() {
    let ws = Workspace::new(WORKSPACE);
    let (_view, snapshot) = ws
        .session
        .new_view("ws", "/ws", strata_cache::Options::default())
        .unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let warmed = ["p1", "p2"].iter().all(|package| {
                snapshot
                    .package_handle(&id(package))
                    .is_some_and(|handle| handle.cached().is_some())
            });
            if warmed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(ws.fakes.checker.calls("p1"), 1);
    assert_eq!(ws.fakes.checker.calls("p2"), 1);
}
