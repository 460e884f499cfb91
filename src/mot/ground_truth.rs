//! MOTChallenge ground-truth files (`gt/gt.txt`).
//!
//! One line per detection, space separated:
//! `frame label bb_left bb_top bb_width bb_height 0 1 0 0`

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::annotation::{parse_label, AnnotationRecord};
use crate::config::{LabelPolicy, MotLabelEncoding};
use crate::{Error, Result};

/// One ground-truth box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotDetection {
    /// 1-based frame index.
    pub frame: usize,
    pub label: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl MotDetection {
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} 0 1 0 0",
            self.frame, self.label, self.x, self.y, self.width, self.height
        )
    }
}

/// Ground-truth boxes of one annotation record at `frame`.
///
/// Every shape with an identity label is emitted; malformed shapes are
/// skipped with a warning.
pub fn frame_detections(
    record: &AnnotationRecord,
    frame: usize,
    policy: LabelPolicy,
    encoding: MotLabelEncoding,
) -> Vec<MotDetection> {
    let mut detections = Vec::new();
    for shape in &record.shapes {
        let Some(value) = parse_label(&shape.label, policy) else {
            continue;
        };
        let bbox = match shape.bbox() {
            Ok(bbox) => bbox,
            Err(e) => {
                log::warn!("frame {}: skipping shape: {}", frame, e);
                continue;
            }
        };
        let label = match encoding {
            MotLabelEncoding::Raw => shape.label.clone(),
            MotLabelEncoding::Absolute => value.to_string(),
        };
        detections.push(MotDetection {
            frame,
            label,
            x: bbox.x1,
            y: bbox.y1,
            width: bbox.width().abs(),
            height: bbox.height().abs(),
        });
    }
    detections
}

/// Writer for `gt.txt`.
///
/// The frame counter advances once per [`update`](Self::update) call whether
/// or not the frame has detections, so unannotated frames keep their slot.
pub struct GroundTruthWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    frame_number: usize,
    lines: usize,
}

impl GroundTruthWriter {
    /// Create `<sequence_dir>/gt/gt.txt`, truncating an existing file.
    pub fn new<P: AsRef<Path>>(sequence_dir: P) -> Result<Self> {
        let gt_folder = sequence_dir.as_ref().join("gt");
        fs::create_dir_all(&gt_folder).map_err(|e| {
            Error::IoError(std::io::Error::new(
                e.kind(),
                format!("failed to create gt folder: {}", e),
            ))
        })?;

        let path = gt_folder.join("gt.txt");
        let file = File::create(&path).map_err(|e| {
            Error::IoError(std::io::Error::new(
                e.kind(),
                format!("failed to create '{}': {}", path.display(), e),
            ))
        })?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            frame_number: 1,
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index the next [`update`](Self::update) call writes.
    pub fn frame_number(&self) -> usize {
        self.frame_number
    }

    /// Number of lines written so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Write the detections of the current frame and advance to the next.
    ///
    /// The `frame` field of the detections is overwritten by the counter.
    pub fn update(&mut self, detections: &[MotDetection]) -> Result<()> {
        for detection in detections {
            let line = MotDetection {
                frame: self.frame_number,
                ..detection.clone()
            };
            writeln!(self.writer, "{}", line.to_line())?;
            self.lines += 1;
        }

        self.frame_number += 1;
        Ok(())
    }

    /// Flush the writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(Error::IoError)
    }
}

impl Drop for GroundTruthWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Parsed `gt.txt`, detections grouped by frame.
#[derive(Debug, Clone, Default)]
pub struct GroundTruthFile {
    detections: Vec<Vec<MotDetection>>,
    current_frame: usize,
}

impl GroundTruthFile {
    /// Read a ground-truth file.
    ///
    /// Fields may be separated by spaces or commas. The number of frames is
    /// `num_frames` if given, otherwise the largest frame index found; lines
    /// outside `1..=num_frames` are an error.
    pub fn read<P: AsRef<Path>>(file_path: P, num_frames: Option<usize>) -> Result<Self> {
        let file_path = file_path.as_ref();
        let file = File::open(file_path).map_err(|e| {
            Error::IoError(std::io::Error::new(
                e.kind(),
                format!("failed to open ground truth file: {}", e),
            ))
        })?;

        let mut parsed = Vec::new();
        for (number, line_result) in BufReader::new(file).lines().enumerate() {
            let line = line_result.map_err(Error::IoError)?;
            if line.trim().is_empty() {
                continue;
            }
            parsed.push(parse_line(&line).ok_or_else(|| {
                Error::Mot(format!(
                    "{}:{}: malformed line '{}'",
                    file_path.display(),
                    number + 1,
                    line
                ))
            })?);
        }

        let max_frame = parsed.iter().map(|d| d.frame).max().unwrap_or(0);
        let num_frames = num_frames.unwrap_or(max_frame);
        if max_frame > num_frames {
            return Err(Error::Mot(format!(
                "{}: frame {} beyond sequence length {}",
                file_path.display(),
                max_frame,
                num_frames
            )));
        }

        let mut detections: Vec<Vec<MotDetection>> = vec![Vec::new(); num_frames];
        for detection in parsed {
            detections[detection.frame - 1].push(detection);
        }

        Ok(Self {
            detections,
            current_frame: 0,
        })
    }

    /// Get detections for a specific frame (0-indexed).
    pub fn get_detections(&self, frame: usize) -> Option<&[MotDetection]> {
        self.detections.get(frame).map(|v| v.as_slice())
    }

    /// Get the number of frames.
    pub fn num_frames(&self) -> usize {
        self.detections.len()
    }

    pub fn num_detections(&self) -> usize {
        self.detections.iter().map(|d| d.len()).sum()
    }
}

fn parse_line(line: &str) -> Option<MotDetection> {
    let parts: Vec<&str> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() < 6 {
        return None;
    }

    let frame: usize = parts[0].parse().ok()?;
    if frame == 0 {
        return None;
    }
    Some(MotDetection {
        frame,
        label: parts[1].to_string(),
        x: parts[2].parse().ok()?,
        y: parts[3].parse().ok()?,
        width: parts[4].parse().ok()?,
        height: parts[5].parse().ok()?,
    })
}

impl Iterator for GroundTruthFile {
    type Item = Vec<MotDetection>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_frame >= self.detections.len() {
            return None;
        }

        let frame_detections = self.detections[self.current_frame].clone();
        self.current_frame += 1;
        Some(frame_detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(json: &str) -> AnnotationRecord {
        AnnotationRecord::from_json(json).unwrap()
    }

    #[test]
    fn test_single_box_line() {
        let record = record(
            r#"{"shapes":[{"label":"3","points":[[10,10],[50,90]]}],"imageWidth":640,"imageHeight":480}"#,
        );
        let detections =
            frame_detections(&record, 1, LabelPolicy::Digits, MotLabelEncoding::Absolute);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].to_line(), "1 3 10 10 40 80 0 1 0 0");
    }

    #[test]
    fn test_reversed_corners_and_label_encoding() {
        let record = record(
            r#"{"shapes":[
                {"label":"07","points":[[50.9,90.2],[10.4,10.6]]},
                {"label":"j_7","points":[[0,0],[5,5]]},
                {"label":"8","points":[[0,0]]}
            ]}"#,
        );

        let absolute =
            frame_detections(&record, 4, LabelPolicy::Digits, MotLabelEncoding::Absolute);
        assert_eq!(absolute.len(), 1);
        assert_eq!(absolute[0].to_line(), "4 7 10 10 40 80 0 1 0 0");

        let raw = frame_detections(&record, 4, LabelPolicy::Digits, MotLabelEncoding::Raw);
        assert_eq!(raw[0].to_line(), "4 07 10 10 40 80 0 1 0 0");
    }

    #[test]
    fn test_writer_counts_empty_frames() {
        let dir = TempDir::new().unwrap();
        let detection = MotDetection {
            frame: 0,
            label: "3".to_string(),
            x: 1,
            y: 2,
            width: 3,
            height: 4,
        };

        let path = {
            let mut writer = GroundTruthWriter::new(dir.path()).unwrap();
            writer.update(&[detection.clone()]).unwrap();
            writer.update(&[]).unwrap();
            writer.update(&[]).unwrap();
            writer.update(&[detection.clone(), detection.clone()]).unwrap();
            assert_eq!(writer.frame_number(), 5);
            assert_eq!(writer.lines(), 3);
            writer.path().to_path_buf()
        };

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "1 3 1 2 3 4 0 1 0 0\n4 3 1 2 3 4 0 1 0 0\n4 3 1 2 3 4 0 1 0 0\n"
        );

        let parsed = GroundTruthFile::read(&path, Some(5)).unwrap();
        assert_eq!(parsed.num_frames(), 5);
        assert_eq!(parsed.num_detections(), 3);
        let per_frame: Vec<usize> = parsed.map(|d| d.len()).collect();
        assert_eq!(per_frame, vec![1, 0, 0, 2, 0]);
    }

    #[test]
    fn test_read_comma_separated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gt.txt");
        fs::write(&path, "1,3,10,10,40,80,0,1,0,0\n2,4,0,0,5,5,0,1,0,0\n").unwrap();

        let parsed = GroundTruthFile::read(&path, None).unwrap();
        assert_eq!(parsed.num_frames(), 2);
        assert_eq!(parsed.get_detections(1).unwrap()[0].label, "4");
    }

    #[test]
    fn test_read_rejects_out_of_range_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gt.txt");
        fs::write(&path, "3 1 0 0 5 5 0 1 0 0\n").unwrap();
        assert!(matches!(
            GroundTruthFile::read(&path, Some(2)),
            Err(Error::Mot(_))
        ));

        fs::write(&path, "0 1 0 0 5 5 0 1 0 0\n").unwrap();
        assert!(GroundTruthFile::read(&path, None).is_err());
    }
}
