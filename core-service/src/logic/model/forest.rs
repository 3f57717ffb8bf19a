//! Extremely Randomized Trees
//!
//! Binary classifier (evil = 1). Each split draws a random threshold per
//! candidate feature and keeps the one with the lowest weighted Gini
//! impurity. Classes are weighted `n / (2 * n_c)`. Trees grow until pure.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_N_ESTIMATORS;
use crate::logic::error::{PipelineError, Result};
use crate::logic::features::layout::LayoutInfo;

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_estimators: usize,
    /// Candidate features per split; `None` = sqrt(n_features)
    pub max_features: Option<usize>,
    pub min_samples_split: usize,
    /// Fixed seed for reproducible fits; entropy otherwise
    pub seed: Option<u64>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_features: None,
            min_samples_split: 2,
            seed: None,
        }
    }
}

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        p_evil: f32,
    },
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f32]) -> f32 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { p_evil } => return *p_evil,
                Node::Split { feature, threshold, left, right } => {
                    i = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((i, d)) = stack.pop() {
            deepest = deepest.max(d);
            if let Node::Split { left, right, .. } = &self.nodes[i] {
                stack.push((*left, d + 1));
                stack.push((*right, d + 1));
            }
        }
        deepest
    }
}

struct Builder<'a> {
    x: ArrayView2<'a, f32>,
    y: &'a [u8],
    weights: [f32; 2],
    max_features: usize,
    min_samples_split: usize,
}

impl Builder<'_> {
    fn class_weight(&self, samples: &[usize]) -> [f32; 2] {
        let mut w = [0.0f32; 2];
        for &s in samples {
            let c = self.y[s] as usize;
            w[c] += self.weights[c];
        }
        w
    }

    /// Iterative so degenerate data cannot overflow the stack
    fn build(&self, rng: &mut StdRng) -> Tree {
        let mut nodes = vec![Node::Leaf { p_evil: 0.0 }];
        let mut stack: Vec<(usize, Vec<usize>)> = vec![(0, (0..self.y.len()).collect())];
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();

        while let Some((slot, samples)) = stack.pop() {
            let w = self.class_weight(&samples);
            let total = w[0] + w[1];
            let p_evil = if total > 0.0 { w[1] / total } else { 0.0 };

            let pure = w[0] == 0.0 || w[1] == 0.0;
            if pure || samples.len() < self.min_samples_split {
                nodes[slot] = Node::Leaf { p_evil };
                continue;
            }

            let Some((feature, threshold)) = self.best_split(&samples, &mut features, rng) else {
                nodes[slot] = Node::Leaf { p_evil };
                continue;
            };

            let (left, right): (Vec<usize>, Vec<usize>) =
                samples.into_iter().partition(|&s| self.x[[s, feature]] <= threshold);

            let l = nodes.len();
            nodes.push(Node::Leaf { p_evil: 0.0 });
            let r = nodes.len();
            nodes.push(Node::Leaf { p_evil: 0.0 });
            nodes[slot] = Node::Split { feature, threshold, left: l, right: r };

            stack.push((l, left));
            stack.push((r, right));
        }

        Tree { nodes }
    }

    /// Draw features until `max_features` non-constant ones were tried
    fn best_split(&self, samples: &[usize], features: &mut [usize], rng: &mut StdRng) -> Option<(usize, f32)> {
        features.shuffle(rng);

        let mut best: Option<(f32, usize, f32)> = None;
        let mut tried = 0;

        for &f in features.iter() {
            if tried >= self.max_features {
                break;
            }

            let (lo, hi) = samples.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
                let v = self.x[[s, f]];
                (lo.min(v), hi.max(v))
            });
            if hi <= lo {
                continue;
            }
            tried += 1;

            let threshold = rng.gen_range(lo..hi);
            let mut left = [0.0f32; 2];
            let mut right = [0.0f32; 2];
            for &s in samples {
                let c = self.y[s] as usize;
                if self.x[[s, f]] <= threshold {
                    left[c] += self.weights[c];
                } else {
                    right[c] += self.weights[c];
                }
            }

            let impurity = weighted_gini(left) + weighted_gini(right);
            if best.map_or(true, |(b, _, _)| impurity < b) {
                best = Some((impurity, f, threshold));
            }
        }

        best.map(|(_, f, t)| (f, t))
    }
}

/// Gini impurity scaled by the node's total weight
fn weighted_gini(w: [f32; 2]) -> f32 {
    let total = w[0] + w[1];
    if total <= 0.0 {
        return 0.0;
    }
    let p0 = w[0] / total;
    let p1 = w[1] / total;
    total * (1.0 - p0 * p0 - p1 * p1)
}

// ============================================================================
// ENSEMBLE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraTreesClassifier {
    pub config: ForestConfig,
    pub layout: LayoutInfo,
    pub n_samples: usize,
    trees: Vec<Tree>,
}

impl ExtraTreesClassifier {
    /// Fit on a feature matrix and 0/1 labels
    pub fn fit<'a>(x: ArrayView2<'a, f32>, y: &'a [u8], config: &ForestConfig) -> Result<Self> {
        let (n, n_features) = x.dim();
        if n == 0 || n_features == 0 {
            return Err(PipelineError::Model("cannot fit on an empty matrix".to_string()));
        }
        if n != y.len() {
            return Err(PipelineError::Model(format!("{} rows but {} labels", n, y.len())));
        }
        if let Some(bad) = y.iter().find(|&&c| c > 1) {
            return Err(PipelineError::Model(format!("label {} is not binary", bad)));
        }

        let n_evil = y.iter().filter(|&&c| c == 1).count();
        let counts = [n - n_evil, n_evil];
        let weights = counts.map(|c| if c > 0 { n as f32 / (2.0 * c as f32) } else { 0.0 });

        let max_features = config
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt() as usize)
            .clamp(1, n_features);

        let builder = Builder {
            x,
            y,
            weights,
            max_features,
            min_samples_split: config.min_samples_split.max(2),
        };

        let mut master = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let trees: Vec<Tree> = (0..config.n_estimators.max(1))
            .map(|_| {
                let mut rng = StdRng::seed_from_u64(master.gen());
                builder.build(&mut rng)
            })
            .collect();

        log::info!(
            "Fitted {} trees on {} rows ({} evil), max depth {}",
            trees.len(),
            n,
            n_evil,
            trees.iter().map(Tree::depth).max().unwrap_or(0)
        );

        Ok(Self {
            config: config.clone(),
            layout: LayoutInfo::current(),
            n_samples: n,
            trees,
        })
    }

    /// P(evil), averaged over trees
    pub fn predict_proba(&self, row: &[f32]) -> f32 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.trees.iter().map(|t| t.predict(row)).sum();
        sum / self.trees.len() as f32
    }

    pub fn predict_proba_batch(&self, x: ArrayView2<f32>) -> Vec<f32> {
        x.outer_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.predict_proba(slice),
                None => self.predict_proba(&row.to_vec()),
            })
            .collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn config(n: usize) -> ForestConfig {
        ForestConfig {
            n_estimators: n,
            seed: Some(42),
            ..Default::default()
        }
    }

    /// Evil iff feature 0 > 5; feature 1 is noise
    fn separable() -> (Array2<f32>, Vec<u8>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let v = (i % 10) as f32;
            rows.extend_from_slice(&[v, (i * 7 % 13) as f32]);
            labels.push(u8::from(v > 5.0));
        }
        (Array2::from_shape_vec((40, 2), rows).unwrap(), labels)
    }

    #[test]
    fn test_fit_separable() {
        let (x, y) = separable();
        let model = ExtraTreesClassifier::fit(x.view(), &y, &config(50)).unwrap();
        assert_eq!(model.n_trees(), 50);
        assert!(model.predict_proba(&[9.0, 3.0]) > 0.8);
        assert!(model.predict_proba(&[1.0, 3.0]) < 0.2);
    }

    #[test]
    fn test_probability_bounds() {
        let (x, y) = separable();
        let model = ExtraTreesClassifier::fit(x.view(), &y, &config(20)).unwrap();
        for p in model.predict_proba_batch(x.view()) {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let (x, y) = separable();
        let a = ExtraTreesClassifier::fit(x.view(), &y, &config(10)).unwrap();
        let b = ExtraTreesClassifier::fit(x.view(), &y, &config(10)).unwrap();
        let probe = [5.5f32, 2.0];
        assert_eq!(a.predict_proba(&probe), b.predict_proba(&probe));
    }

    #[test]
    fn test_single_class_predicts_constant() {
        let x = Array2::from_shape_vec((3, 1), vec![1.0, 2.0, 3.0]).unwrap();
        let model = ExtraTreesClassifier::fit(x.view(), &[0, 0, 0], &config(5)).unwrap();
        assert_eq!(model.predict_proba(&[2.0]), 0.0);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        let x = Array2::<f32>::zeros((0, 3));
        assert!(ExtraTreesClassifier::fit(x.view(), &[], &config(5)).is_err());

        let x = Array2::<f32>::zeros((2, 3));
        assert!(ExtraTreesClassifier::fit(x.view(), &[1], &config(5)).is_err());
        assert!(ExtraTreesClassifier::fit(x.view(), &[0, 2], &config(5)).is_err());
    }

    #[test]
    fn test_serde_round_trip_keeps_predictions() {
        let (x, y) = separable();
        let model = ExtraTreesClassifier::fit(x.view(), &y, &config(10)).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: ExtraTreesClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predict_proba(&[7.0, 1.0]), model.predict_proba(&[7.0, 1.0]));
        assert!(back.layout.validate().is_ok());
    }

    #[test]
    fn test_balanced_weights_favor_minority() {
        // 1 evil among 9; identical features so no split is possible
        let x = Array2::<f32>::ones((10, 2));
        let mut y = vec![0u8; 10];
        y[0] = 1;
        let model = ExtraTreesClassifier::fit(x.view(), &y, &config(3)).unwrap();
        assert!((model.predict_proba(&[1.0, 1.0]) - 0.5).abs() < 1e-6);
    }
}
