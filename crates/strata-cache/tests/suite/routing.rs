use std::sync::Arc;

use proptest::prelude::*;
use strata_cache::{FileUri, SessionError};
use strata_test_utils::uri;

use super::Workspace;

const NESTED: &str = r#"
//- /a/y.src
export Y
//- /a/b/x.src
export X
//- /ab/z.src
export Z
"#;

#[test]
fn longest_folder_prefix_wins() {
    let ws = Workspace::new(NESTED);
    let (a, _) = ws.view("a", "/a");
    let (b, _) = ws.view("b", "/a/b");

    assert!(Arc::ptr_eq(&ws.session.view_of(&uri("/a/b/x.src")).unwrap(), &b));
    assert!(Arc::ptr_eq(&ws.session.view_of(&uri("/a/y.src")).unwrap(), &a));
}

#[test]
fn registration_order_does_not_matter() {
    let ws = Workspace::new(NESTED);
    let (b, _) = ws.view("b", "/a/b");
    let (a, _) = ws.view("a", "/a");

    assert!(Arc::ptr_eq(&ws.session.view_of(&uri("/a/b/x.src")).unwrap(), &b));
    assert!(Arc::ptr_eq(&ws.session.view_of(&uri("/a/y.src")).unwrap(), &a));
    // Outside every folder: the first registered view. Prefixes match whole components,
    // so `/ab` is not under `/a`.
    assert!(Arc::ptr_eq(&ws.session.view_of(&uri("/elsewhere/w.src")).unwrap(), &b));
    assert!(Arc::ptr_eq(&ws.session.view_of(&uri("/ab/z.src")).unwrap(), &b));
}

#[test]
fn ties_go_to_the_first_view() {
    let ws = Workspace::new(NESTED);
    let (first, _) = ws.view("first", "/a");
    let (_second, _) = ws.view("second", "/a");
    assert!(Arc::ptr_eq(&ws.session.view_of(&uri("/a/y.src")).unwrap(), &first));
}

#[test]
fn routing_follows_changes_to_the_view_set() {
    let ws = Workspace::new(NESTED);
    let (a, _) = ws.view("a", "/a");
    let file = uri("/a/b/x.src");
    assert!(Arc::ptr_eq(&ws.session.view_of(&file).unwrap(), &a));

    let (b, _) = ws.view("b", "/a/b");
    assert!(Arc::ptr_eq(&ws.session.view_of(&file).unwrap(), &b));

    ws.session.remove_view(&b).unwrap();
    assert!(Arc::ptr_eq(&ws.session.view_of(&file).unwrap(), &a));

    let (replacement, _) = a.set_options(super::quiet()).unwrap();
    assert!(Arc::ptr_eq(&ws.session.view_of(&file).unwrap(), &replacement));
}

#[test]
fn an_empty_session_has_no_view() {
    let ws = Workspace::new(NESTED);
    assert!(matches!(
        ws.session.view_of(&uri("/a/y.src")),
        Err(SessionError::NoViews)
    ));
}

fn segment() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn files_route_to_the_deepest_containing_view(
        under_b in proptest::bool::ANY,
        segments in proptest::collection::vec(segment(), 1..4),
    ) {
        let ws = Workspace::new(NESTED);
        let (a, _) = ws.view("a", "/a");
        let (b, _) = ws.view("b", "/a/b");

        // `b` is reserved for the nested view's folder.
        let first = if segments[0] == "b" { "bb".to_string() } else { segments[0].clone() };
        let rest = segments[1..].join("/");
        let path = match (under_b, rest.is_empty()) {
            (true, true) => format!("/a/b/{first}.src"),
            (true, false) => format!("/a/b/{first}/{rest}.src"),
            (false, true) => format!("/a/{first}.src"),
            (false, false) => format!("/a/{first}/{rest}.src"),
        };
        let file = FileUri::parse(&path).unwrap();
        let expected = if under_b { &b } else { &a };
        prop_assert!(Arc::ptr_eq(&ws.session.view_of(&file).unwrap(), expected));
        // Memoized answers agree with fresh ones.
        prop_assert!(Arc::ptr_eq(&ws.session.view_of(&file).unwrap(), expected));
    }
}
