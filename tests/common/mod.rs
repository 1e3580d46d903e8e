#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{Rgb, RgbImage};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Fresh empty directory under the system temp dir, removed on drop.
pub struct Scratch {
    path: PathBuf,
}

impl Scratch {
    pub fn new(tag: &str) -> Self {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "stereo-batch-{tag}-{}-{n}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("create scratch dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, rel: &str) -> PathBuf {
        self.path.join(rel)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

fn hash(x: u32, y: u32, salt: u32) -> u8 {
    let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ salt.wrapping_mul(2_246_822_519);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    (h ^ (h >> 16)) as u8
}

/// Blocky random texture and the same scene seen `shift` pixels further right.
pub fn stereo_pair(w: u32, h: u32, shift: u32) -> (RgbImage, RgbImage) {
    let texture = |x: u32, y: u32| {
        let (bx, by) = (x / 3, y / 3);
        Rgb([hash(bx, by, 1), hash(bx, by, 2), hash(bx, by, 3)])
    };
    let left = RgbImage::from_fn(w, h, texture);
    let right = RgbImage::from_fn(w, h, |x, y| texture(x + shift, y));
    (left, right)
}

/// Writes `left.jpg` and `right.jpg` into `dir`.
pub fn write_pair(dir: &Path, w: u32, h: u32) {
    std::fs::create_dir_all(dir).expect("create pair dir");
    let (left, right) = stereo_pair(w, h, 4);
    left.save(dir.join("left.jpg")).expect("save left");
    right.save(dir.join("right.jpg")).expect("save right");
}
