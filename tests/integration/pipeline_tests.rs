//! Full pipeline tests: table on disk → prepared matrix → trained model

use countae::data::{self, SIZE_FACTORS_KEY, SPLIT_KEY, TEST_LABEL, TRAIN_LABEL};
use countae::training::trainer::EVENT_LOG_DIR;
use countae::{prepare, run, OptimizerKind, Result};

use super::fixtures::*;
use super::init_test_logging;

#[test]
fn test_prepare_drops_unexpressed_gene_and_splits() -> Result<()> {
    init_test_logging();
    let (_dir, path) = create_test_dir();

    for (n_genes, n_features) in [(100, 99), (50, 49)] {
        let table = path.join(format!("counts_{}.csv", n_genes));
        write_counts(&table, n_genes, 50);

        let adata = prepare(&table, &quick_config(1).data)?;
        assert_eq!(adata.n_obs(), 50);
        assert_eq!(adata.n_vars(), n_features);
        assert!(!adata.var_names().iter().any(|name| name == "gene0"));

        let train = adata.subset(SPLIT_KEY, TRAIN_LABEL)?;
        let test = adata.subset(SPLIT_KEY, TEST_LABEL)?;
        assert_eq!(train.n_obs(), 45);
        assert_eq!(test.n_obs(), 5);

        let raw = adata.raw().expect("raw counts are kept");
        assert_eq!(raw.dim(), (50, n_features));
        assert!(raw.iter().all(|v| v.fract() == 0.0 && *v >= 0.0));
    }
    Ok(())
}

#[test]
fn test_prepare_reads_10x_h5_like_the_table() -> Result<()> {
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);
    let h5 = path.join("counts.h5");
    data::write_10x_h5(&data::load_counts(&table)?, &h5)?;

    let config = quick_config(1).data;
    let from_table = prepare(&table, &config)?;
    let from_h5 = prepare(&h5, &config)?;
    assert_eq!(from_h5.n_obs(), 50);
    assert_eq!(from_h5.n_vars(), 99);
    assert_eq!(from_h5.obs_names(), from_table.obs_names());
    assert_eq!(from_h5.raw(), from_table.raw());
    assert_eq!(from_h5.obs().get(SPLIT_KEY), from_table.obs().get(SPLIT_KEY));
    Ok(())
}

#[test]
fn test_prepare_is_deterministic_for_seed() -> Result<()> {
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);
    let config = quick_config(1).data;

    let first = prepare(&table, &config)?;
    let second = prepare(&table, &config)?;
    assert_eq!(first, second);

    let mut reseeded = config.clone();
    reseeded.seed = config.seed + 1;
    let third = prepare(&table, &reseeded)?;
    assert_ne!(
        first.obs().get(SPLIT_KEY),
        third.obs().get(SPLIT_KEY),
        "a different seed should draw a different test set"
    );
    Ok(())
}

#[test]
fn test_scaling_uses_statistics_of_all_cells() -> Result<()> {
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);

    let adata = prepare(&table, &quick_config(1).data)?;
    let train = adata.subset(SPLIT_KEY, TRAIN_LABEL)?;

    // Centered over all 50 cells, so the 45 training cells alone are off-center
    let train_means = train.x().mean_axis(ndarray::Axis(0)).unwrap();
    assert!(train_means.iter().any(|m| m.abs() > 1e-3));

    let all_means = adata.x().mean_axis(ndarray::Axis(0)).unwrap();
    assert!(all_means.iter().all(|m| m.abs() < 1e-4));

    let mut train_only = train.clone();
    data::preprocess::scale(&mut train_only)?;
    let refit = train_only.x().mean_axis(ndarray::Axis(0)).unwrap();
    assert!(refit.iter().all(|m| m.abs() < 1e-4));
    Ok(())
}

#[test]
fn test_size_factors_follow_library_size() -> Result<()> {
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);

    let adata = prepare(&table, &quick_config(1).data)?;
    let size_factors = adata.obs().numeric(SIZE_FACTORS_KEY)?;
    let totals: Vec<f64> = (0..50)
        .map(|c| (0..100).map(|g| count(g, c) as f64).sum())
        .collect();

    let ratios: Vec<f64> = adata
        .obs_names()
        .iter()
        .zip(size_factors)
        .map(|(name, sf)| {
            let cell: usize = name.trim_start_matches("cell").parse().unwrap();
            sf / totals[cell]
        })
        .collect();
    for ratio in &ratios[1..] {
        approx::assert_relative_eq!(*ratio, ratios[0], max_relative = 1e-6);
    }
    Ok(())
}

#[test]
fn test_run_trains_on_train_partition() -> Result<()> {
    init_test_logging();
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);

    let config = quick_config(3);
    let outcome = run(&config, &table)?;

    assert_eq!(outcome.history.len(), 3);
    assert!(outcome.history.loss().iter().all(|l| l.is_finite()));
    // 45 training cells, the last 10% of which are held out
    assert_eq!(outcome.history.val_loss().map(|v| v.len()), Some(3));
    assert_eq!(outcome.model.config().input_size, 99);
    Ok(())
}

#[test]
fn test_early_stopping_on_flat_validation_loss() -> Result<()> {
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);

    let mut config = quick_config(50);
    config.model.batchnorm = false;
    config.training.optimizer = OptimizerKind::Sgd;
    config.training.learning_rate = Some(0.0);
    config.training.early_stop = Some(2);

    let history = run(&config, &table)?.history;
    assert_eq!(history.len(), 3);
    assert_eq!(history.stopped_epoch, Some(2));

    let val = history.val_loss().expect("validation loss recorded");
    assert_eq!(val[0], val[1]);
    assert_eq!(val[1], val[2]);
    Ok(())
}

#[test]
fn test_save_weights_writes_checkpoint_and_events() -> Result<()> {
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);
    let output = path.join("result");

    let mut config = quick_config(2);
    config.training.save_weights = true;
    config.training.tensorboard = true;
    config.training.output_dir = Some(output.clone());

    let outcome = run(&config, &table)?;
    let checkpoint = output.join("weights.hdf5");
    assert!(checkpoint.exists());
    assert!(output.join(EVENT_LOG_DIR).exists());

    let mut reloaded = outcome.model;
    reloaded.load_weights(&checkpoint)?;
    Ok(())
}

#[test]
fn test_no_output_dir_writes_nothing() -> Result<()> {
    let (_dir, path) = create_test_dir();
    let table = standard_table(&path);

    let mut config = quick_config(1);
    config.training.save_weights = true;
    config.training.output_dir = None;

    run(&config, &table)?;
    let entries: Vec<_> = std::fs::read_dir(&path)?.collect();
    assert_eq!(entries.len(), 1, "only the input table should exist");
    Ok(())
}
