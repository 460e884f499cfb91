//! Pure split planning.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::Split;
use crate::config::SplitConfig;

/// Crop names of one identity, by split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityAssignment {
    pub global_id: u32,
    pub train: Vec<String>,
    pub query: Vec<String>,
    pub gallery: Vec<String>,
}

impl IdentityAssignment {
    pub fn split(&self, split: Split) -> &[String] {
        match split {
            Split::Train => &self.train,
            Split::Query => &self.query,
            Split::Gallery => &self.gallery,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.query.len() + self.gallery.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(split, crop name)` pairs in split order.
    pub fn iter(&self) -> impl Iterator<Item = (Split, &str)> {
        Split::ALL
            .into_iter()
            .flat_map(move |split| self.split(split).iter().map(move |name| (split, name.as_str())))
    }
}

/// Split assignment for a whole dataset, ordered by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionPlan {
    pub identities: Vec<IdentityAssignment>,
}

impl PartitionPlan {
    /// Plan every non-empty identity of `crops` (global id -> crop names).
    pub fn build(crops: &BTreeMap<u32, Vec<String>>, config: &SplitConfig) -> Self {
        let identities = crops
            .iter()
            .filter(|(global_id, names)| {
                if names.is_empty() {
                    log::debug!("Identity {} has no crops, skipping", global_id);
                }
                !names.is_empty()
            })
            .map(|(&global_id, names)| partition_identity(global_id, names, config))
            .collect();
        Self { identities }
    }

    pub fn num_crops(&self) -> usize {
        self.identities.iter().map(|a| a.len()).sum()
    }

    pub fn split_len(&self, split: Split) -> usize {
        self.identities.iter().map(|a| a.split(split).len()).sum()
    }
}

// Guards against 0.1 * 30 landing just above 3.0.
const FRACTION_EPSILON: f64 = 1e-9;

pub(crate) fn ceil_fraction(n: usize, fraction: f64) -> usize {
    let exact = n as f64 * fraction;
    ((exact - FRACTION_EPSILON).ceil().max(0.0) as usize).min(n)
}

/// `(train, query, gallery)` sizes for an identity with `n` crops.
///
/// The held-out count is `ceil(n * held_out_fraction)` and the gallery count
/// `ceil(held_out * gallery_fraction)`; the sizes always sum to `n`.
pub fn split_counts(n: usize, held_out_fraction: f64, gallery_fraction: f64) -> (usize, usize, usize) {
    let held_out = ceil_fraction(n, held_out_fraction);
    let gallery = ceil_fraction(held_out, gallery_fraction);
    (n - held_out, held_out - gallery, gallery)
}

/// Split one identity's crops.
///
/// The input order does not matter: names are sorted before the seeded
/// shuffle, and the RNG is seeded per identity so adding identities does not
/// change the split of existing ones.
pub fn partition_identity(global_id: u32, crops: &[String], config: &SplitConfig) -> IdentityAssignment {
    let mut names = crops.to_vec();
    names.sort();
    names.dedup();

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed ^ u64::from(global_id).rotate_left(32));
    names.shuffle(&mut rng);

    let (_, query_len, gallery_len) =
        split_counts(names.len(), config.held_out_fraction, config.gallery_fraction);
    let mut train = names.split_off(query_len + gallery_len);
    let mut query = names.split_off(gallery_len);
    let mut gallery = names;

    train.sort();
    query.sort();
    gallery.sort();

    IdentityAssignment {
        global_id,
        train,
        query,
        gallery,
    }
}
