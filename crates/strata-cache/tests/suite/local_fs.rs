use std::fs;

use strata_cache::{Cache, FileAction, FileModification, FileUri, Session};
use strata_test_utils::{exported_symbols, FakeToolchain, Fixture};

use super::{check, quiet};

#[tokio::test]
async fn a_view_over_the_local_file_system() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    Fixture::parse(
        r#"
        //- /p1/lib.src
        export F
        //- /p2/lib.src
        import p1
        use F
        //- /.hidden/lib.src
        export Secret
        "#,
    )
    .write_to(&root);

    let fakes = FakeToolchain::new();
    let session = Session::new(Cache::local(), fakes.toolchain());
    let (view, snapshot) = session.new_view("tmp", &root, quiet()).unwrap();
    assert_eq!(view.folder(), root.as_path());

    let p2 = check(&snapshot, "p2").await.unwrap();
    assert!(p2.diagnostics.is_empty(), "{:?}", p2.diagnostics);
    assert!(!snapshot
        .metadata()
        .contains(&strata_cache::PackageId::new("hidden")));
    assert!(!snapshot
        .metadata()
        .contains(&strata_cache::PackageId::new(".hidden")));

    let lib = root.join("p1").join("lib.src");
    fs::write(&lib, "export F\nexport Longer\n").unwrap();
    let snapshots = session
        .did_modify_file(FileModification::on_disk(
            FileUri::from_path(&lib).unwrap(),
            FileAction::DiskChange,
        ))
        .unwrap();
    let p1 = check(&snapshots[0], "p1").await.unwrap();
    assert_eq!(exported_symbols(&p1.export_data), vec!["F", "Longer"]);
    assert_eq!(fakes.checker.calls("p1"), 2);
}
