use std::sync::Arc;

use strata_cache::{CheckError, PackageId};

use super::{check, id, Workspace};

#[tokio::test]
async fn failed_directories_become_stub_packages() {
    let ws = Workspace::new(
        r#"
        //- /ws/bad/lib.src
        !load-error
        //- /ws/good/lib.src
        export F
        "#,
    );
    let (_view, snapshot) = ws.view("ws", "/ws");

    let stub = PackageId::new("/ws/bad");
    let node = snapshot.metadata().get(&stub).unwrap();
    let error = node.load_error.as_ref().unwrap();
    assert_eq!(error.dir, std::path::Path::new("/ws/bad"));
    assert!(error.message.contains("malformed package clause"), "{}", error.message);

    match check(&snapshot, "/ws/bad").await {
        Err(CheckError::Load { package, .. }) => assert_eq!(package, stub),
        other => panic!("expected a load error, got {other:?}"),
    }
    check(&snapshot, "good").await.unwrap();
}

#[tokio::test]
async fn importers_report_the_upstream_load_failure() {
    let ws = Workspace::new(
        r#"
        //- /ws/p1/lib.src
        export F
        //- /ws/p2/lib.src
        import p1
        use F
        //- /ws/p3/lib.src
        export G
        "#,
    );
    let (_view, s0) = ws.view("ws", "/ws");
    check(&s0, "p3").await.unwrap();

    let s1 = ws.write("/ws/p1/lib.src", "!load-error\nexport F\n").remove(0);
    assert!(s1.metadata().get(&id("p1")).unwrap().load_error.is_some());
    assert!(matches!(
        check(&s1, "p1").await,
        Err(CheckError::Load { ref package, .. }) if *package == id("p1")
    ));
    assert_eq!(
        check(&s1, "p2").await.unwrap_err(),
        CheckError::UpstreamLoad {
            package: id("p2"),
            upstream: id("p1"),
        }
    );
    assert!(Arc::ptr_eq(
        &s0.package_handle(&id("p3")).unwrap(),
        &s1.package_handle(&id("p3")).unwrap()
    ));

    // Any later change in the directory retries the query.
    let s2 = ws.write("/ws/p1/lib.src", "export F\n").remove(0);
    assert!(s2.metadata().get(&id("p1")).unwrap().load_error.is_none());
    assert!(check(&s2, "p2").await.unwrap().diagnostics.is_empty());
}

#[tokio::test]
async fn a_stub_is_replaced_once_the_directory_loads() {
    let ws = Workspace::new(
        r#"
        //- /ws/bad/lib.src
        !load-error
        "#,
    );
    let (_view, s0) = ws.view("ws", "/ws");
    assert!(s0.metadata().contains(&PackageId::new("/ws/bad")));

    let s1 = ws.write("/ws/bad/lib.src", "package fixed\nexport F\n").remove(0);
    assert!(!s1.metadata().contains(&PackageId::new("/ws/bad")));
    let fixed = check(&s1, "fixed").await.unwrap();
    assert_eq!(fixed.id, id("fixed"));
}
