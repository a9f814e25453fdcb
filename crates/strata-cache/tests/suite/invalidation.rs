use std::sync::Arc;

use pretty_assertions::assert_eq;
use strata_cache::{FileModification, PackageId};
use strata_test_utils::{exported_symbols, uri, FakeBuildSystem, FakeToolchain};

use super::{check, id, Workspace};

const CHAIN: &str = r#"
//- /ws/p1/lib.src
export F
//- /ws/p2/lib.src
import p1
use F
export G
//- /ws/p3/lib.src
import p2
use G
//- /ws/p4/lib.src
export H
"#;

fn same_handle(a: &strata_cache::Snapshot, b: &strata_cache::Snapshot, package: &str) -> bool {
    let package = id(package);
    match (a.package_handle(&package), b.package_handle(&package)) {
        (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
        _ => false,
    }
}

#[tokio::test]
async fn editing_a_package_invalidates_its_importers_only() {
    let ws = Workspace::new(CHAIN);
    let (view, s0) = ws.view("ws", "/ws");
    for package in ["p1", "p2", "p3", "p4"] {
        check(&s0, package).await.unwrap();
    }

    let snapshots = ws.write("/ws/p2/lib.src", "import p1\nuse F\nexport G\nexport G2\n");
    assert_eq!(snapshots.len(), 1);
    let s1 = view.snapshot().unwrap();
    assert!(Arc::ptr_eq(&snapshots[0], &s1));
    assert_eq!(s1.generation(), s0.generation() + 1);

    assert!(same_handle(&s0, &s1, "p1"));
    assert!(same_handle(&s0, &s1, "p4"));
    assert!(!same_handle(&s0, &s1, "p2"));
    assert!(!same_handle(&s0, &s1, "p3"));

    // Retained handles keep their results; invalidated ones recompute.
    ws.fakes.checker.reset_calls();
    let p2 = check(&s1, "p2").await.unwrap();
    check(&s1, "p3").await.unwrap();
    check(&s1, "p1").await.unwrap();
    check(&s1, "p4").await.unwrap();
    assert_eq!(exported_symbols(&p2.export_data), vec!["G", "G2"]);
    assert_eq!(ws.fakes.checker.calls("p1"), 0);
    assert_eq!(ws.fakes.checker.calls("p2"), 1);
    assert_eq!(ws.fakes.checker.calls("p3"), 1);
    assert_eq!(ws.fakes.checker.calls("p4"), 0);
}

#[tokio::test]
async fn published_snapshots_never_change() {
    let ws = Workspace::new(CHAIN);
    let (_view, s0) = ws.view("ws", "/ws");
    let before: Vec<_> = ["p1", "p2", "p3", "p4"]
        .iter()
        .map(|package| s0.package_handle(&id(package)).unwrap())
        .collect();
    let file = uri("/ws/p1/lib.src");
    let text_before = s0.get_file(&file).read().unwrap();

    ws.write("/ws/p1/lib.src", "export F\nexport F2\n");
    ws.write("/ws/p4/lib.src", "export H\ntodo\n");

    for (package, handle) in ["p1", "p2", "p3", "p4"].iter().zip(&before) {
        assert!(Arc::ptr_eq(&s0.package_handle(&id(package)).unwrap(), handle));
    }
    assert_eq!(s0.get_file(&file).read().unwrap(), text_before);
    assert_eq!(s0.generation(), 0);
    let p1 = check(&s0, "p1").await.unwrap();
    assert_eq!(exported_symbols(&p1.export_data), vec!["F"]);
}

#[tokio::test]
async fn editing_a_file_then_reverting_restores_the_keys() {
    let ws = Workspace::new(CHAIN);
    let (_view, s0) = ws.view("ws", "/ws");
    let original = ws.session.get_file(&uri("/ws/p1/lib.src")).read().unwrap();
    let original = String::from_utf8(original.to_vec()).unwrap();
    let p3_before = check(&s0, "p3").await.unwrap();

    let file = uri("/ws/p1/lib.src");
    ws.session
        .did_modify_file(FileModification::open(file.clone(), 1, original.clone()))
        .unwrap();
    let edited = ws
        .session
        .did_modify_file(FileModification::change(file.clone(), 2, "export F\nexport Z\n"))
        .unwrap();
    assert_ne!(
        edited[0].package_key(&id("p1")),
        s0.package_key(&id("p1"))
    );
    assert_ne!(
        edited[0].package_key(&id("p3")),
        s0.package_key(&id("p3"))
    );

    let reverted = ws
        .session
        .did_modify_file(FileModification::change(file, 3, original))
        .unwrap();
    let s3 = &reverted[0];
    for package in ["p1", "p2", "p3", "p4"] {
        assert_eq!(s3.package_key(&id(package)), s0.package_key(&id(package)));
    }
    let p3_after = check(s3, "p3").await.unwrap();
    assert_eq!(*p3_after, *p3_before);
}

/// P1 has no imports, P2 imports P1. Editing P1 without touching its API recomputes both,
/// and P2's new result equals the old one.
#[tokio::test]
async fn dependents_recompute_to_equal_results_when_the_api_is_unchanged() {
    let ws = Workspace::new(
        r#"
        //- /ws/p1/lib.src
        export F
        //- /ws/p2/lib.src
        import p1
        use F
        "#,
    );
    let (_view, s0) = ws.view("ws", "/ws");
    let p1_before = check(&s0, "p1").await.unwrap();
    let p2_before = check(&s0, "p2").await.unwrap();

    let s1 = ws.write("/ws/p1/lib.src", "export F\n// reworded\n").remove(0);
    assert!(!Arc::ptr_eq(
        &s0.package_handle(&id("p1")).unwrap(),
        &s1.package_handle(&id("p1")).unwrap()
    ));
    assert!(!Arc::ptr_eq(
        &s0.package_handle(&id("p2")).unwrap(),
        &s1.package_handle(&id("p2")).unwrap()
    ));

    ws.fakes.checker.reset_calls();
    let p1_after = check(&s1, "p1").await.unwrap();
    let p2_after = check(&s1, "p2").await.unwrap();
    assert_eq!(ws.fakes.checker.calls("p1"), 1);
    assert_eq!(ws.fakes.checker.calls("p2"), 1);
    assert_eq!(p1_after.export_data, p1_before.export_data);
    assert_eq!(*p2_after, *p2_before);
}

#[tokio::test]
async fn import_edits_requery_the_directory() {
    let ws = Workspace::new(CHAIN);
    let (_view, s0) = ws.view("ws", "/ws");
    ws.fakes.build.reset_queries();

    // Body-only edits leave the graph alone.
    let s1 = ws.write("/ws/p4/lib.src", "export H\nexport I\n").remove(0);
    assert!(ws.fakes.build.queries().is_empty());
    assert!(Arc::ptr_eq(s0.metadata(), s1.metadata()));

    let s2 = ws.write("/ws/p4/lib.src", "import p3\nexport H\n").remove(0);
    assert_eq!(ws.fakes.build.query_count("/ws/p4"), 1);
    assert_eq!(s2.metadata().imported_by(&id("p3")), &[id("p4")]);
    assert!(same_handle(&s1, &s2, "p3"));
    assert!(!same_handle(&s1, &s2, "p4"));
}

#[tokio::test]
async fn new_and_deleted_files_update_the_graph() {
    let ws = Workspace::new(CHAIN);
    let (_view, s0) = ws.view("ws", "/ws");

    let s1 = ws.write("/ws/p5/lib.src", "import p4\nuse H\n").remove(0);
    assert!(!s0.metadata().contains(&id("p5")));
    assert!(s1.metadata().contains(&id("p5")));
    assert!(check(&s1, "p5").await.unwrap().diagnostics.is_empty());
    assert!(same_handle(&s0, &s1, "p4"));

    ws.fs.remove(std::path::Path::new("/ws/p5/lib.src"));
    let s2 = ws
        .session
        .did_modify_file(FileModification::on_disk(
            uri("/ws/p5/lib.src"),
            strata_cache::FileAction::Delete,
        ))
        .unwrap()
        .remove(0);
    assert!(!s2.metadata().contains(&id("p5")));
    assert!(s2.package_handle(&id("p5")).is_none());
    assert!(s2.package_ids_for_file(&uri("/ws/p5/lib.src")).is_empty());
}

#[tokio::test]
async fn manifest_changes_requery_every_directory() {
    let ws = Workspace::new(CHAIN);
    let (_view, _s0) = ws.view("ws", "/ws");
    ws.fakes.build.reset_queries();

    ws.write("/ws/strata.toml", "[workspace]\n");
    for dir in ["/ws/p1", "/ws/p2", "/ws/p3", "/ws/p4"] {
        assert_eq!(ws.fakes.build.query_count(dir), 1, "{dir}");
    }
}

#[tokio::test]
async fn dependency_roots_are_checked_in_exported_mode() {
    let fakes = FakeToolchain::with_build(FakeBuildSystem::new().with_dependency_root("/std"));
    let ws = Workspace::with_fakes(
        r#"
        //- /std/fmt/lib.src
        export Println
        todo
        //- /ws/app/lib.src
        import fmt
        use Println
        todo
        "#,
        fakes,
    );
    let (_view, snapshot) = ws.view("ws", "/ws");

    assert_eq!(snapshot.workspace_packages(), vec![id("app")]);
    assert!(snapshot.metadata().contains(&id("fmt")));

    let fmt = check(&snapshot, "fmt").await.unwrap();
    assert_eq!(fmt.mode, strata_cache::CheckMode::Exported);
    assert!(fmt.diagnostics.is_empty(), "{:?}", fmt.diagnostics);

    let app = check(&snapshot, "app").await.unwrap();
    assert_eq!(app.mode, strata_cache::CheckMode::Full);
    let messages: Vec<&str> = app.diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(messages, vec!["unfinished code"]);
}

#[tokio::test]
async fn missing_imports_and_cycles_fail_only_their_slice() {
    let ws = Workspace::new(
        r#"
        //- /ws/a/lib.src
        import b
        //- /ws/b/lib.src
        import a
        //- /ws/lonely/lib.src
        import ghost
        //- /ws/fine/lib.src
        export Ok
        "#,
    );
    let (_view, snapshot) = ws.view("ws", "/ws");

    assert!(matches!(
        check(&snapshot, "lonely").await,
        Err(strata_cache::CheckError::UnresolvedImport { ref import, .. }) if *import == PackageId::new("ghost")
    ));
    let a = check(&snapshot, "a").await.unwrap_err();
    let b = check(&snapshot, "b").await.unwrap_err();
    assert!(
        [&a, &b]
            .iter()
            .any(|err| matches!(err, strata_cache::CheckError::ImportCycle { .. })),
        "{a:?} / {b:?}"
    );
    check(&snapshot, "fine").await.unwrap();
}

#[tokio::test]
async fn an_edit_rebinds_only_its_slice_of_a_large_workspace() {
    let mut fixture = String::new();
    for n in 0..200 {
        fixture.push_str(&format!("//- /ws/q{n}/lib.src\nexport S{n}\n"));
    }
    fixture.push_str("//- /ws/q7/extra.src\nexport Extra\n");
    fixture.push_str("//- /ws/user/lib.src\nimport q7\nuse Extra\n");
    let ws = Workspace::new(&fixture);
    let (_view, s0) = ws.view("ws", "/ws");
    let extra = uri("/ws/q7/extra.src");
    let before = s0.get_file(&extra);

    ws.fs.remove(std::path::Path::new("/ws/q7/extra.src"));
    let s1 = ws
        .session
        .did_modify_file(FileModification::on_disk(
            extra.clone(),
            strata_cache::FileAction::Delete,
        ))
        .unwrap()
        .remove(0);

    let rebound: Vec<String> = s1
        .metadata()
        .package_ids()
        .filter(|package| !same_handle(&s0, &s1, package.as_str()))
        .map(|package| package.to_string())
        .collect();
    assert_eq!(rebound, vec!["q7".to_string(), "user".to_string()]);
    for analyzer in ["exports", "todos"] {
        assert!(Arc::ptr_eq(
            &s0.action_handle(&id("q8"), analyzer).unwrap(),
            &s1.action_handle(&id("q8"), analyzer).unwrap()
        ));
        assert!(!Arc::ptr_eq(
            &s0.action_handle(&id("q7"), analyzer).unwrap(),
            &s1.action_handle(&id("q7"), analyzer).unwrap()
        ));
    }

    // The dropped file is no longer pinned by the package map.
    assert!(before.exists());
    assert!(!s1.get_file(&extra).exists());
    let other = uri("/ws/q8/lib.src");
    assert!(strata_cache::FileHandle::ptr_eq(
        &s0.get_file(&other),
        &s1.get_file(&other)
    ));
    assert_eq!(ws.fakes.build.query_count("/ws/q8"), 1);
}
