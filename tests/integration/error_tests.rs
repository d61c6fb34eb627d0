//! Error handling tests

use std::fs;

use countae::{prepare, run, Error, OptimizerKind, PreprocessConfig, Result, TrainParams};

use super::fixtures::*;

#[test]
fn test_unknown_optimizer_name() {
    let err = "lbfgs".parse::<OptimizerKind>().unwrap_err();
    assert!(matches!(err, Error::UnknownOptimizer(ref name) if name == "lbfgs"));

    let err = TrainParams::default().optimizer_named("Momentum").unwrap_err();
    assert!(matches!(err, Error::UnknownOptimizer(_)));
    assert!(err.to_string().contains("Momentum"));
}

#[test]
fn test_optimizer_names_are_case_insensitive() -> Result<()> {
    let params = TrainParams::default().optimizer_named("  NAdam ")?;
    assert_eq!(params.optimizer, OptimizerKind::Nadam);
    Ok(())
}

#[test]
fn test_all_zero_table_is_degenerate() {
    let (_dir, path) = create_test_dir();
    let table = path.join("zeros.csv");
    fs::write(&table, "gene,c1,c2\ng1,0,0\ng2,0,0\n").unwrap();

    let err = prepare(&table, &PreprocessConfig::default()).unwrap_err();
    assert!(matches!(err, Error::DegenerateMatrix { .. }));
}

#[test]
fn test_non_numeric_entry_reports_location() {
    let (_dir, path) = create_test_dir();
    let table = path.join("bad.csv");
    fs::write(&table, "gene,c1,c2\ng1,1,2\ng2,3,many\n").unwrap();

    let err = prepare(&table, &PreprocessConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Parse { .. }), "got {:?}", err);
}

#[test]
fn test_missing_input_fails_to_open() {
    let (_dir, path) = create_test_dir();
    let err = run(&quick_config(1), &path.join("absent.csv")).unwrap_err();
    assert!(matches!(err, Error::Io(_) | Error::Csv(_)), "got {:?}", err);
}

#[test]
fn test_invalid_training_params_are_rejected_before_loading() {
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);

    let mut config = quick_config(1);
    config.training.batch_size = 0;
    assert!(run(&config, &table).is_err());

    let mut config = quick_config(1);
    config.training.validation_split = 1.0;
    assert!(run(&config, &table).is_err());
}
