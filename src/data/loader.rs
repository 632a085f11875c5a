// ============================================================
// Layer 4 — AFLW Loader
// ============================================================
// Reads the sample manifest and the per-sample pose annotations
// of a dataset laid out like AFLW:
//
//   data_dir/
//     face_0001.jpg    ← image
//     face_0001.txt    ← "<name> <yaw> <pitch> <roll> ..." (radians)
//     ...
//
//   filename_list.txt  ← one relative path per line, no extension
//
// Annotations are small, so they are all parsed up front, and
// every image header is read once: a broken dataset fails at
// startup instead of in the middle of an epoch. Pixels are only
// decoded later, per item.

use anyhow::{bail, Context, Result};
use std::{fs, path::{Path, PathBuf}};

use crate::domain::pose::HeadPose;

/// One annotated sample, image not yet decoded.
#[derive(Debug, Clone)]
pub struct PoseRecord {
    /// Relative path from the manifest, used as the sample name
    pub name:       String,
    pub image_path: PathBuf,
    pub pose:       HeadPose,
}

pub struct AflwLoader {
    data_dir:      PathBuf,
    filename_list: PathBuf,
    img_ext:       String,
    annot_ext:     String,
}

impl AflwLoader {
    pub fn new(data_dir: impl AsRef<Path>, filename_list: impl AsRef<Path>) -> Self {
        Self {
            data_dir:      data_dir.as_ref().to_path_buf(),
            filename_list: filename_list.as_ref().to_path_buf(),
            img_ext:       "jpg".to_string(),
            annot_ext:     "txt".to_string(),
        }
    }

    /// Load every manifest entry with its parsed annotation.
    pub fn load_all(&self) -> Result<Vec<PoseRecord>> {
        let names = read_manifest(&self.filename_list)?;
        tracing::info!(
            "Manifest '{}' lists {} samples",
            self.filename_list.display(),
            names.len()
        );

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let base       = self.data_dir.join(&name);
            let image_path = with_ext(&base, &self.img_ext);
            let annot_path = with_ext(&base, &self.annot_ext);

            if !image_path.is_file() {
                bail!("Missing image for sample '{}': '{}'", name, image_path.display());
            }
            image::image_dimensions(&image_path)
                .with_context(|| format!("Unreadable image '{}'", image_path.display()))?;

            let text = fs::read_to_string(&annot_path)
                .with_context(|| format!("Cannot read annotation '{}'", annot_path.display()))?;
            let pose = parse_annotation(&text)
                .with_context(|| format!("Bad annotation '{}'", annot_path.display()))?;

            records.push(PoseRecord { name, image_path, pose });
        }
        Ok(records)
    }
}

/// Read the manifest: one relative path per non-empty line.
pub fn read_manifest(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read filename list '{}'", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parse the first line of an AFLW annotation.
/// Fields 1..=3 are yaw, pitch, roll in radians; field 0 is the name.
pub fn parse_annotation(text: &str) -> Result<HeadPose> {
    let line = text.lines().next().unwrap_or_default();
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        bail!("expected at least 4 fields, found {}", fields.len());
    }

    let mut radians = [0.0f32; 3];
    for (slot, field) in radians.iter_mut().zip(&fields[1..4]) {
        *slot = field
            .parse::<f32>()
            .with_context(|| format!("'{field}' is not a number"))?;
    }
    Ok(HeadPose::from_aflw_radians(radians[0], radians[1], radians[2]))
}

// Appends the extension instead of replacing one, so names with
// dots in them ("img_1.2") survive.
fn with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annotation() {
        let pose = parse_annotation("img 0.0 0.5 -0.5 extra\nignored").unwrap();
        assert!(pose.yaw.abs() < 1e-6);
        assert!((pose.pitch - 28.6479).abs() < 1e-3);
        // roll sign is flipped
        assert!((pose.roll - 28.6479).abs() < 1e-3);
    }

    #[test]
    fn test_parse_annotation_rejects_short_lines() {
        assert!(parse_annotation("img 0.1 0.2").is_err());
        assert!(parse_annotation("").is_err());
        assert!(parse_annotation("img a b c").is_err());
    }

    #[test]
    fn test_load_all() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        image::RgbImage::new(8, 8).save(dir.path().join("sub/a.jpg")).unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), "a 0.1 0.2 0.3\n").unwrap();

        let list = dir.path().join("list.txt");
        std::fs::write(&list, "sub/a\n\n").unwrap();

        let records = AflwLoader::new(dir.path(), &list).load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "sub/a");
        assert!(records[0].image_path.ends_with("sub/a.jpg"));
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let dir  = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "nope\n").unwrap();
        assert!(AflwLoader::new(dir.path(), &list).load_all().is_err());
    }

    #[test]
    fn test_corrupt_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::new(8, 8).save(dir.path().join("good.jpg")).unwrap();
        std::fs::write(dir.path().join("good.txt"), "good 0.1 0.2 0.3\n").unwrap();
        std::fs::write(dir.path().join("bad.jpg"), "not a jpeg").unwrap();
        std::fs::write(dir.path().join("bad.txt"), "bad 0.1 0.2 0.3\n").unwrap();

        let list = dir.path().join("list.txt");
        std::fs::write(&list, "good\nbad\n").unwrap();
        let err = AflwLoader::new(dir.path(), &list).load_all().unwrap_err();
        assert!(format!("{err:#}").contains("bad.jpg"));
    }
}
