//! Property-based checks of the preprocessing invariants

use countae::data::{N_COUNTS_KEY, SIZE_FACTORS_KEY};
use countae::{prepare, PreprocessConfig};
use proptest::prelude::*;

use super::fixtures::create_test_dir;

fn write_matrix(path: &std::path::Path, genes: &[Vec<u32>]) {
    let n_cells = genes[0].len();
    let mut table = String::from("gene");
    for c in 0..n_cells {
        table.push_str(&format!(",c{}", c));
    }
    table.push('\n');
    for (g, row) in genes.iter().enumerate() {
        table.push_str(&format!("g{}", g));
        for v in row {
            table.push_str(&format!(",{}", v));
        }
        table.push('\n');
    }
    std::fs::write(path, table).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_prepared_cells_have_positive_size_factors(
        genes in prop::collection::vec(prop::collection::vec(0u32..20, 12), 3..15),
        seed in any::<u64>(),
    ) {
        // one fully expressed gene guarantees every cell survives filtering
        let mut genes = genes;
        genes.push(vec![1; 12]);

        let (_dir, path) = create_test_dir();
        let table = path.join("counts.csv");
        write_matrix(&table, &genes);

        let config = PreprocessConfig { seed, ..PreprocessConfig::default() };
        let adata = prepare(&table, &config).unwrap();

        prop_assert_eq!(adata.n_obs(), 12);
        prop_assert!(adata.var_totals().len() <= genes.len());
        let totals = adata.obs().numeric(N_COUNTS_KEY).unwrap();
        prop_assert!(totals.iter().all(|&t| t > 0.0));
        let size_factors = adata.obs().numeric(SIZE_FACTORS_KEY).unwrap();
        prop_assert!(size_factors.iter().all(|&s| s > 0.0 && s.is_finite()));
        let mut sorted = size_factors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = (sorted[5] + sorted[6]) / 2.0;
        prop_assert!((median - 1.0).abs() < 1e-9, "median size factor {}", median);

        let raw = adata.raw().unwrap();
        let raw_totals = raw.sum_axis(ndarray::Axis(0));
        prop_assert!(raw_totals.iter().all(|&t| t > 0.0));
        prop_assert!(adata.x().iter().all(|v| v.is_finite()));
    }
}
