use std::collections::BTreeSet;
use std::sync::Arc;

use strata_cache::{AnalysisError, CancellationToken, CheckError, Severity};
use strata_test_utils::{ExportsAnalyzer, TodoAnalyzer, EXPORTS_FACT};

use super::{id, quiet, Workspace};

const FACTS: &str = r#"
//- /ws/p1/lib.src
export X
//- /ws/p2/lib.src
import p1
use X
//- /ws/p3/lib.src
export Y
todo
//- /ws/p4/lib.src
import p2
"#;

fn infos(result: &strata_cache::ActionResult) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity == Severity::Info)
        .map(|diagnostic| diagnostic.message.clone())
        .collect()
}

#[tokio::test]
async fn facts_flow_to_importers_only() {
    let ws = Workspace::new(FACTS);
    let (_view, snapshot) = ws.view("ws", "/ws");
    let cancel = CancellationToken::new();

    let p1 = snapshot
        .analyze_with(&id("p1"), ExportsAnalyzer::NAME, &cancel)
        .await
        .unwrap();
    let exported: Option<Vec<String>> = p1.exported.get(&id("p1"), EXPORTS_FACT).unwrap();
    assert_eq!(exported, Some(vec!["X".to_string()]));
    assert!(infos(&p1).is_empty());

    let p2 = snapshot
        .analyze_with(&id("p2"), ExportsAnalyzer::NAME, &cancel)
        .await
        .unwrap();
    assert_eq!(infos(&p2), vec!["visible: p1 [X]"]);
    assert!(p2.diagnostics.iter().all(|d| d.source == ExportsAnalyzer::NAME));

    let p3 = snapshot
        .analyze_with(&id("p3"), ExportsAnalyzer::NAME, &cancel)
        .await
        .unwrap();
    assert!(infos(&p3).is_empty(), "{:?}", p3.diagnostics);
    assert!(!p3.facts.contains(&id("p1"), EXPORTS_FACT));
}

#[tokio::test]
async fn facts_are_inherited_transitively() {
    let ws = Workspace::new(FACTS);
    let (_view, snapshot) = ws.view("ws", "/ws");

    let p4 = snapshot
        .analyze_with(&id("p4"), ExportsAnalyzer::NAME, &CancellationToken::new())
        .await
        .unwrap();
    let visible: BTreeSet<String> = infos(&p4).into_iter().collect();
    assert_eq!(
        visible,
        BTreeSet::from(["visible: p1 [X]".to_string(), "visible: p2 []".to_string()])
    );
    let packages: BTreeSet<_> = p4.facts.packages().into_iter().collect();
    assert_eq!(packages, BTreeSet::from([id("p1"), id("p2"), id("p4")]));
    assert_eq!(ws.fakes.exports.runs("p1"), 1);
}

#[tokio::test]
async fn analyzers_without_facts_skip_their_imports() {
    let ws = Workspace::new(FACTS);
    let (_view, snapshot) = ws.view("ws", "/ws");
    let cancel = CancellationToken::new();

    let p3 = snapshot
        .analyze_with(&id("p3"), TodoAnalyzer::NAME, &cancel)
        .await
        .unwrap();
    assert_eq!(p3.diagnostics.len(), 1);
    assert_eq!(p3.diagnostics[0].message, "1 todo(s)");
    assert_eq!(p3.diagnostics[0].source, TodoAnalyzer::NAME);

    snapshot
        .analyze_with(&id("p4"), TodoAnalyzer::NAME, &cancel)
        .await
        .unwrap();
    assert_eq!(ws.fakes.exports.runs("p2"), 0);
    assert_eq!(ws.fakes.exports.runs("p4"), 0);
}

#[tokio::test]
async fn analyze_runs_every_enabled_analyzer() {
    let ws = Workspace::new(FACTS);
    let mut options = quiet();
    options
        .disabled_analyzers
        .insert(TodoAnalyzer::NAME.to_string());
    let (_view, snapshot) = ws.session.new_view("ws", "/ws", options).unwrap();
    let cancel = CancellationToken::new();

    let results = snapshot.analyze(&id("p3"), &cancel).await;
    assert_eq!(results.len(), 1);
    assert_eq!(&*results[0].as_ref().unwrap().analyzer, ExportsAnalyzer::NAME);

    assert_eq!(
        snapshot
            .analyze_with(&id("p3"), TodoAnalyzer::NAME, &cancel)
            .await
            .unwrap_err(),
        AnalysisError::UnknownAnalyzer {
            analyzer: TodoAnalyzer::NAME.to_string()
        }
    );
}

#[tokio::test]
async fn action_results_survive_unrelated_edits() {
    let ws = Workspace::new(FACTS);
    let (_view, s0) = ws.view("ws", "/ws");
    let cancel = CancellationToken::new();
    let before = s0
        .analyze_with(&id("p2"), ExportsAnalyzer::NAME, &cancel)
        .await
        .unwrap();

    let s1 = ws.write("/ws/p3/lib.src", "export Y\nexport Z\n").remove(0);
    let p2 = s1.action_handle(&id("p2"), ExportsAnalyzer::NAME).unwrap();
    assert!(Arc::ptr_eq(
        &p2,
        &s0.action_handle(&id("p2"), ExportsAnalyzer::NAME).unwrap()
    ));
    let after = s1
        .analyze_with(&id("p2"), ExportsAnalyzer::NAME, &cancel)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    let s2 = ws.write("/ws/p1/lib.src", "export X\nexport W\n").remove(0);
    assert!(!Arc::ptr_eq(
        &p2,
        &s2.action_handle(&id("p2"), ExportsAnalyzer::NAME).unwrap()
    ));
    let p2 = s2
        .analyze_with(&id("p2"), ExportsAnalyzer::NAME, &cancel)
        .await
        .unwrap();
    assert_eq!(infos(&p2), vec!["visible: p1 [W,X]"]);
}

#[tokio::test]
async fn analysis_reports_package_failures() {
    let ws = Workspace::new(
        r#"
        //- /ws/broken/lib.src
        error
        "#,
    );
    let (_view, snapshot) = ws.view("ws", "/ws");

    let err = snapshot
        .analyze_with(&id("broken"), ExportsAnalyzer::NAME, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, AnalysisError::Package(CheckError::TypeCheck { .. })),
        "{err:?}"
    );
    assert_eq!(ws.fakes.exports.runs("broken"), 0);

    let unknown = snapshot
        .analyze_with(&id("nope"), ExportsAnalyzer::NAME, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        unknown,
        AnalysisError::Package(CheckError::UnknownPackage {
            package: id("nope")
        })
    );
}
