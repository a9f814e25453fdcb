use strata_config::{ConfigError, OptionError, OptionState, Options};
use tempfile::tempdir;

#[test]
fn loads_options_from_toml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("strata.toml");
    std::fs::write(
        &path,
        r#"
build_flags = ["-tags", "integration"]
disabled_analyzers = ["shadow"]
preload_workspace = false

[env]
GOOS = "linux"

[logging]
level = "strata.cache=debug"
json = true
"#,
    )
    .unwrap();

    let (options, results) = Options::load_from_path(&path).unwrap();
    assert!(results.is_ok(), "{results:?}");
    assert_eq!(options.build_flags, vec!["-tags", "integration"]);
    assert!(!options.analyzer_enabled("shadow"));
    assert!(options.analyzer_enabled("facts"));
    assert!(!options.preload_workspace);
    assert_eq!(options.env.get("GOOS").map(String::as_str), Some("linux"));
    assert_eq!(options.logging.level, "strata.cache=debug");
    assert!(options.logging.json);
    assert!(options.logging.stderr);
}

#[test]
fn toml_values_of_the_wrong_type_are_reported_per_option() {
    let (options, results) = Options::from_toml_str(
        r#"
verbose_output = 1
build_flags = ["-v"]
verbose = true
"#,
    )
    .unwrap();

    let errors: Vec<_> = results.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0].error,
        Some(OptionError::WrongType { name, found: "number", .. }) if name == "verbose_output"
    ));
    assert_eq!(options.build_flags, vec!["-v"]);
    assert_eq!(
        results.get("verbose").unwrap().state,
        OptionState::Deprecated {
            replacement: Some("verbose_output")
        }
    );
}

#[test]
fn unknown_logging_keys_are_rejected() {
    let (options, results) = Options::from_toml_str("[logging]\nlevle = \"debug\"\n").unwrap();
    assert!(matches!(
        results.get("logging").unwrap().error,
        Some(OptionError::InvalidValue { .. })
    ));
    assert_eq!(options.logging.level, "info");
}

#[test]
fn malformed_toml_and_missing_files_fail_to_load() {
    assert!(matches!(
        Options::from_toml_str("build_flags = ["),
        Err(ConfigError::Toml(_))
    ));

    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        Options::load_from_path(&missing),
        Err(ConfigError::Io { .. })
    ));
}
