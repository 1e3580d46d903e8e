//! Random, reproducible subsets of a two-sided stereo dataset.
//!
//! The source directory keeps left and right views apart, linked by a key in
//! the file name (`<key>_left.jpg`, `<key>_right.jpg`):
//!
//! ```text
//! source/
//! ├── left/<key>_left.jpg
//! └── right/<key>_right.jpg
//! ```
//!
//! Each sampled key becomes its own directory in the output, holding
//! `left.jpg` and `right.jpg`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::pipeline::{LEFT_IMAGE, RIGHT_IMAGE};

pub const DEFAULT_SEED: u64 = 1_189_998_819_991_197_253;
pub const DEFAULT_NUM_SAMPLES: usize = 20;

const SIDES: [&str; 2] = ["left", "right"];

fn side_file(key: &str, side: &str) -> String {
    format!("{key}_{side}.jpg")
}

fn check_source(source_dir: &Path) -> Result<()> {
    for side in SIDES {
        if !source_dir.join(side).is_dir() {
            return Err(Error::DirectoryStructure {
                path: source_dir.to_path_buf(),
                missing: side,
            });
        }
    }
    Ok(())
}

fn keys_in(dir: &Path, side: &str) -> Result<BTreeSet<String>> {
    let suffix = format!("_{side}.jpg");
    let mut keys = BTreeSet::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name();
        if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(&suffix)) {
            if !key.is_empty() {
                keys.insert(key.to_string());
            }
        }
    }
    Ok(keys)
}

/// Lists the keys that have both a left and a right image, sorted.
///
/// Keys present on only one side are reported and left out.
pub fn find_image_keys(source_dir: &Path) -> Result<Vec<String>> {
    check_source(source_dir)?;
    let left = keys_in(&source_dir.join("left"), "left")?;
    let right = keys_in(&source_dir.join("right"), "right")?;
    for key in left.symmetric_difference(&right) {
        warn!(key = %key, "image key has no counterpart on the other side, skipping");
    }
    Ok(left.intersection(&right).cloned().collect())
}

/// Draws `num_samples` distinct keys, deterministically for a given seed and
/// key list. The result is sorted.
pub fn sample_keys(keys: &[String], num_samples: usize, seed: u64) -> Result<Vec<String>> {
    if num_samples > keys.len() {
        return Err(Error::Configuration(format!(
            "cannot sample {num_samples} keys from {} available",
            keys.len()
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked: Vec<String> = index::sample(&mut rng, keys.len(), num_samples)
        .into_iter()
        .map(|i| keys[i].clone())
        .collect();
    picked.sort();
    Ok(picked)
}

/// Copies the pairs of `image_keys` into one directory per key under
/// `out_dir`, which must already exist.
#[instrument(skip(image_keys))]
pub fn copy_data(image_keys: &[String], source_dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    check_source(source_dir)?;
    if !out_dir.is_dir() {
        return Err(Error::DirectoryNotFound(out_dir.to_path_buf()));
    }
    let mut created = Vec::with_capacity(image_keys.len());
    for key in image_keys {
        let key_dir = out_dir.join(key);
        fs::create_dir(&key_dir).map_err(|e| Error::io(&key_dir, e))?;
        for (side, canonical) in SIDES.into_iter().zip([LEFT_IMAGE, RIGHT_IMAGE]) {
            let from = source_dir.join(side).join(side_file(key, side));
            let to = key_dir.join(canonical);
            fs::copy(&from, &to).map_err(|source| Error::Copy {
                from: from.clone(),
                to: to.clone(),
                source,
            })?;
        }
        created.push(key_dir);
    }
    Ok(created)
}

/// Samples `num_samples` pairs from `source_dir` into `out_dir`.
///
/// Both directories are checked before anything is written.
pub fn make_data_split(
    source_dir: &Path,
    out_dir: &Path,
    num_samples: usize,
    seed: u64,
) -> Result<Vec<String>> {
    check_source(source_dir)?;
    if !out_dir.is_dir() {
        return Err(Error::DirectoryNotFound(out_dir.to_path_buf()));
    }
    let image_keys = find_image_keys(source_dir)?;
    let subset = sample_keys(&image_keys, num_samples, seed)?;
    info!(available = image_keys.len(), keys = ?image_keys, "found image keys");
    info!(sampled = ?subset, "sampled image keys");
    copy_data(&subset, source_dir, out_dir)?;
    Ok(subset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sampling_is_reproducible_for_a_seed() {
        let all = keys(&["A", "B", "C", "D", "E", "F", "G", "H"]);
        let a = sample_keys(&all, 3, DEFAULT_SEED).unwrap();
        let b = sample_keys(&all, 3, DEFAULT_SEED).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        let distinct: BTreeSet<_> = a.iter().collect();
        assert_eq!(distinct.len(), 3);
        assert!(a.iter().all(|k| all.contains(k)));
    }

    #[test]
    fn cannot_sample_more_than_available() {
        let all = keys(&["A", "B"]);
        assert!(matches!(sample_keys(&all, 3, DEFAULT_SEED), Err(Error::Configuration(_))));
    }

    #[test]
    fn sampling_everything_returns_every_key() {
        let all = keys(&["C", "A", "B"]);
        assert_eq!(sample_keys(&all, 3, 7).unwrap(), keys(&["A", "B", "C"]));
    }
}
