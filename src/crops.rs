//! Crop extraction.
//!
//! Every accepted box becomes one image file under
//! `<output_root>/<global_id>/`. File names follow the Market-1501
//! convention so that the flattened dataset still carries the identity:
//!
//! ```text
//! {global_id:04}_c1s{folder_ordinal}_{crop_index:06}_00.{ext}
//! ```
//!
//! `crop_index` is a run-wide counter, so names never collide inside an
//! identity directory even when several raw labels map to it.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use rayon::prelude::*;

use crate::geometry::BBox;
use crate::utils::ensure_dir;
use crate::{Error, Result};

/// One crop to cut from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropJob {
    pub global_id: u32,
    pub raw_label: u32,
    pub folder_ordinal: u32,
    pub crop_index: u64,
    pub bbox: BBox,
}

impl CropJob {
    pub fn file_name(&self, ext: &str) -> String {
        format!(
            "{:04}_c1s{}_{:06}_00.{}",
            self.global_id, self.folder_ordinal, self.crop_index, ext
        )
    }

    /// Destination of the crop below `output_root`.
    pub fn path(&self, output_root: &Path, ext: &str) -> PathBuf {
        output_root
            .join(self.global_id.to_string())
            .join(self.file_name(ext))
    }
}

/// All crops of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameCrops {
    pub image: PathBuf,
    pub jobs: Vec<CropJob>,
}

/// Cuts boxes out of frames and writes them to per-identity directories.
#[derive(Debug, Clone)]
pub struct CropExtractor {
    output_root: PathBuf,
    ext: String,
    min_size: i64,
}

impl CropExtractor {
    /// # Arguments
    /// * `output_root` - Directory receiving one subdirectory per identity
    /// * `ext` - Extension of written crops, also selects the encoder
    /// * `min_size` - Minimum width and height of a crop after clipping
    pub fn new<P: AsRef<Path>>(output_root: P, ext: &str, min_size: i64) -> Self {
        Self {
            output_root: output_root.as_ref().to_path_buf(),
            ext: ext.trim_start_matches('.').to_string(),
            min_size: min_size.max(1),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Where `job` is written.
    pub fn crop_path(&self, job: &CropJob) -> PathBuf {
        job.path(&self.output_root, &self.ext)
    }

    /// The `[y1:y2, x1:x2]` region of `image`, clipped to the image bounds.
    pub fn crop(&self, image: &DynamicImage, bbox: &BBox) -> Result<DynamicImage> {
        let clipped = bbox.clamp_to(image.width(), image.height());
        if clipped.width() < self.min_size || clipped.height() < self.min_size {
            return Err(Error::DegenerateGeometry(format!(
                "{} is {}x{} inside a {}x{} image",
                bbox,
                clipped.width(),
                clipped.height(),
                image.width(),
                image.height()
            )));
        }
        // Clipped coordinates lie within [0, u32::MAX].
        Ok(image.crop_imm(
            clipped.x1 as u32,
            clipped.y1 as u32,
            clipped.width() as u32,
            clipped.height() as u32,
        ))
    }

    /// Crop and save one job, creating the identity directory if needed.
    pub fn write_crop(&self, image: &DynamicImage, job: &CropJob) -> Result<PathBuf> {
        let mut crop = self.crop(image, &job.bbox)?;
        if matches!(self.ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg") {
            // The JPEG encoder has no alpha channel.
            crop = DynamicImage::ImageRgb8(crop.to_rgb8());
        }

        let path = self.crop_path(job);
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        crop.save(&path)?;
        Ok(path)
    }

    /// Decode one frame and write all its crops.
    ///
    /// A frame that cannot be decoded produces no output at all. Crops that
    /// are too small after clipping are skipped individually.
    pub fn extract_frame(&self, frame: &FrameCrops) -> Result<Vec<PathBuf>> {
        if !frame.image.is_file() {
            return Err(Error::MissingAsset(format!("{}", frame.image.display())));
        }
        let image = image::open(&frame.image)?;

        let mut written = Vec::with_capacity(frame.jobs.len());
        for job in &frame.jobs {
            match self.write_crop(&image, job) {
                Ok(path) => written.push(path),
                Err(Error::DegenerateGeometry(msg)) => {
                    log::warn!("{}: skipping crop: {}", frame.image.display(), msg);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// Write the crops of many frames in parallel on the current rayon pool.
    ///
    /// Failed frames are logged and skipped. Paths are returned in frame order.
    pub fn extract_all(&self, frames: &[FrameCrops]) -> Vec<PathBuf> {
        frames
            .par_iter()
            .map(|frame| match self.extract_frame(frame) {
                Ok(paths) => paths,
                Err(e) => {
                    log::warn!("Skipping frame {}: {}", frame.image.display(), e);
                    Vec::new()
                }
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn job(global_id: u32, crop_index: u64, bbox: BBox) -> CropJob {
        CropJob {
            global_id,
            raw_label: global_id % 13,
            folder_ordinal: 1,
            crop_index,
            bbox,
        }
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([x as u8, y as u8, 0])
        }))
    }

    #[test]
    fn test_file_name() {
        let job = job(17, 42, BBox::from_corners((0, 0), (10, 10)));
        assert_eq!(job.file_name("jpg"), "0017_c1s1_000042_00.jpg");
        assert_eq!(
            job.path(Path::new("out"), "png"),
            PathBuf::from("out/17/0017_c1s1_000042_00.png")
        );
    }

    #[test]
    fn test_crop_region() {
        let extractor = CropExtractor::new("unused", "png", 2);
        let image = gradient(64, 48);
        let crop = extractor
            .crop(&image, &BBox::from_corners((10, 5), (30, 25)))
            .unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 20));
        let rgb = crop.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 5, 0]));
        assert_eq!(rgb.get_pixel(19, 19), &Rgb([29, 24, 0]));
    }

    #[test]
    fn test_crop_is_clipped() {
        let extractor = CropExtractor::new("unused", "png", 2);
        let image = gradient(64, 48);
        let crop = extractor
            .crop(&image, &BBox::from_corners((50, 40), (100, 100)))
            .unwrap();
        assert_eq!((crop.width(), crop.height()), (14, 8));
    }

    #[test]
    fn test_crop_outside_image_is_degenerate() {
        let extractor = CropExtractor::new("unused", "png", 2);
        let image = gradient(64, 48);
        let result = extractor.crop(&image, &BBox::from_corners((70, 10), (90, 20)));
        assert!(matches!(result, Err(Error::DegenerateGeometry(_))));

        let sliver = extractor.crop(&image, &BBox::from_corners((63, 10), (90, 20)));
        assert!(matches!(sliver, Err(Error::DegenerateGeometry(_))));
    }

    #[test]
    fn test_extract_frame_writes_into_identity_dirs() {
        let dir = TempDir::new().unwrap();
        let frame_path = dir.path().join("000001.png");
        gradient(64, 48).save(&frame_path).unwrap();

        let out = dir.path().join("crops");
        let extractor = CropExtractor::new(&out, "jpg", 2);
        let frame = FrameCrops {
            image: frame_path,
            jobs: vec![
                job(3, 0, BBox::from_corners((0, 0), (20, 20))),
                job(3, 1, BBox::from_corners((20, 20), (40, 40))),
                job(16, 2, BBox::from_corners((100, 100), (120, 120))),
            ],
        };

        let written = extractor.extract_frame(&frame).unwrap();
        assert_eq!(written.len(), 2);
        assert!(out.join("3/0003_c1s1_000000_00.jpg").is_file());
        assert!(out.join("3/0003_c1s1_000001_00.jpg").is_file());
        assert!(!out.join("16").exists());

        // Rewriting is idempotent.
        let again = extractor.extract_frame(&frame).unwrap();
        assert_eq!(again, written);
    }

    #[test]
    fn test_rgba_frame_saved_as_jpeg() {
        let dir = TempDir::new().unwrap();
        let frame_path = dir.path().join("000001.png");
        RgbaImage::from_pixel(32, 32, Rgba([255, 0, 0, 128]))
            .save(&frame_path)
            .unwrap();

        let extractor = CropExtractor::new(dir.path().join("crops"), "jpg", 2);
        let frame = FrameCrops {
            image: frame_path,
            jobs: vec![job(1, 0, BBox::from_corners((0, 0), (16, 16)))],
        };
        assert_eq!(extractor.extract_frame(&frame).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_frame_produces_nothing() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("crops");
        let extractor = CropExtractor::new(&out, "jpg", 2);
        let frame = FrameCrops {
            image: dir.path().join("missing.jpg"),
            jobs: vec![job(1, 0, BBox::from_corners((0, 0), (16, 16)))],
        };

        assert!(matches!(
            extractor.extract_frame(&frame),
            Err(Error::MissingAsset(_))
        ));
        assert!(extractor.extract_all(&[frame]).is_empty());
        assert!(!out.exists());
    }
}
