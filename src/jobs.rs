//! Batch-scheduler job files generated from a template script.
//!
//! Every `image_*.txt` list found in the search directory gets its own job
//! file `run_NN.sh`, a copy of the template with these tokens replaced:
//!
//! | token         | value                              |
//! |---------------|------------------------------------|
//! | `<INDEX>`     | job index, starting at 0           |
//! | `<IMAGELIST>` | absolute path of the image list    |
//! | `<WALLTIME>`  | requested wall time                |
//! | `<MEMORY>`    | requested memory                   |
//! | `<NCPUS>`     | requested CPU count                |

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

pub const INDEX_TOKEN: &str = "<INDEX>";
pub const IMAGELIST_TOKEN: &str = "<IMAGELIST>";
pub const WALLTIME_TOKEN: &str = "<WALLTIME>";
pub const MEMORY_TOKEN: &str = "<MEMORY>";
pub const NCPUS_TOKEN: &str = "<NCPUS>";

pub const IMAGE_LIST_PATTERN: &str = "image_*.txt";

pub const DEFAULT_NCPUS: u32 = 1;
pub const DEFAULT_WALLTIME: &str = "00:10:00";
pub const DEFAULT_MEMORY: &str = "1GB";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResources {
    pub ncpus: u32,
    pub walltime: String,
    pub memory: String,
}

impl Default for JobResources {
    fn default() -> Self {
        Self {
            ncpus: DEFAULT_NCPUS,
            walltime: DEFAULT_WALLTIME.to_string(),
            memory: DEFAULT_MEMORY.to_string(),
        }
    }
}

impl JobResources {
    pub fn validate(&self) -> Result<()> {
        if self.ncpus < 1 {
            return Err(Error::Argument(format!("need at least one cpu, got {}", self.ncpus)));
        }
        if !(self.memory.ends_with("MB") || self.memory.ends_with("GB")) {
            return Err(Error::Argument(format!("incorrect memory spec {}", self.memory)));
        }
        if self.walltime.matches(':').count() < 2 {
            return Err(Error::Argument(format!("incorrect walltime spec {}", self.walltime)));
        }
        Ok(())
    }
}

fn require_absolute(path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(Error::Argument(format!(
            "need to specify abs path, error {}",
            path.display()
        )))
    }
}

/// Absolute paths of the image lists in `search_dir`, sorted.
pub fn discover_image_lists(search_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = search_dir.join(IMAGE_LIST_PATTERN);
    let pattern = pattern.to_str().ok_or_else(|| {
        Error::Argument(format!("search directory is not valid UTF-8: {}", search_dir.display()))
    })?;
    let paths = glob::glob(pattern).map_err(|e| Error::Argument(format!("bad list pattern: {e}")))?;
    let mut lists = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            Error::io(path, std::io::Error::from(e))
        })?;
        if path.is_file() {
            lists.push(std::path::absolute(&path).map_err(|e| Error::io(&path, e))?);
        }
    }
    lists.sort();
    Ok(lists)
}

/// Replaces every occurrence of every token, line by line, leaving the rest
/// of the template untouched.
pub fn render_job(template: &str, index: usize, image_list: &Path, resources: &JobResources) -> String {
    let index = index.to_string();
    let image_list = image_list.display().to_string();
    let ncpus = resources.ncpus.to_string();
    let replacements = [
        (INDEX_TOKEN, index.as_str()),
        (IMAGELIST_TOKEN, image_list.as_str()),
        (WALLTIME_TOKEN, resources.walltime.as_str()),
        (MEMORY_TOKEN, resources.memory.as_str()),
        (NCPUS_TOKEN, ncpus.as_str()),
    ];
    template
        .split_inclusive('\n')
        .map(|line| {
            replacements
                .iter()
                .fold(line.to_string(), |acc, (token, value)| acc.replace(token, value))
        })
        .collect()
}

pub fn job_file_name(index: usize) -> String {
    format!("run_{index:02}.sh")
}

/// Writes one job file per image list found in `search_dir` into `out_dir`.
///
/// All arguments are checked before the first file is written.
pub fn create_job_files(
    template_path: &Path,
    out_dir: &Path,
    resources: &JobResources,
    search_dir: &Path,
) -> Result<Vec<PathBuf>> {
    require_absolute(template_path)?;
    require_absolute(out_dir)?;
    resources.validate()?;

    let template = fs::read_to_string(template_path).map_err(|e| Error::io(template_path, e))?;
    let image_lists = discover_image_lists(search_dir)?;

    let mut written = Vec::with_capacity(image_lists.len());
    for (i, list) in image_lists.iter().enumerate() {
        info!(index = i, list = %list.display(), "writing job file");
        let job = render_job(&template, i, list, resources);
        let path = out_dir.join(job_file_name(i));
        fs::write(&path, job).map_err(|e| Error::io(&path, e))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(memory: &str, walltime: &str) -> JobResources {
        JobResources {
            ncpus: 4,
            walltime: walltime.to_string(),
            memory: memory.to_string(),
        }
    }

    #[test]
    fn tokens_are_replaced_everywhere() {
        let template = "#!/bin/bash\n#PBS -N job_<INDEX>\n#PBS -l mem=<MEMORY>\necho <INDEX>\n# untouched line\n";
        let out = render_job(template, 3, Path::new("/lists/image_03.txt"), &resources("4GB", "01:00:00"));
        assert_eq!(
            out,
            "#!/bin/bash\n#PBS -N job_3\n#PBS -l mem=4GB\necho 3\n# untouched line\n"
        );
    }

    #[test]
    fn all_five_tokens_are_substituted() {
        let template = "<INDEX> <IMAGELIST> <WALLTIME> <MEMORY> <NCPUS>";
        let out = render_job(template, 0, Path::new("/a/image_0.txt"), &resources("500MB", "00:10:00"));
        assert_eq!(out, "0 /a/image_0.txt 00:10:00 500MB 4");
    }

    #[test]
    fn resource_specs_are_checked() {
        assert!(resources("4GB", "00:10:00").validate().is_ok());
        assert!(resources("512MB", "1:2:3").validate().is_ok());
        assert!(matches!(resources("4TB", "00:10:00").validate(), Err(Error::Argument(_))));
        assert!(resources("4GB", "10:00").validate().is_err());
        assert!(JobResources {
            ncpus: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn discovery_keeps_sorted_absolute_files_only() {
        let dir = std::env::temp_dir().join(format!("stereo-batch-discover-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("image_dir.txt")).unwrap();
        for name in ["image_2.txt", "image_1.txt", "other.txt"] {
            std::fs::write(dir.join(name), "a b\n").unwrap();
        }
        let found = discover_image_lists(&dir);
        std::fs::remove_dir_all(&dir).unwrap();

        let found = found.unwrap();
        let names: Vec<_> = found.iter().filter_map(|p| p.file_name()).collect();
        assert_eq!(names, ["image_1.txt", "image_2.txt"]);
        assert!(found.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn job_files_are_zero_padded() {
        assert_eq!(job_file_name(0), "run_00.sh");
        assert_eq!(job_file_name(7), "run_07.sh");
        assert_eq!(job_file_name(123), "run_123.sh");
    }
}
