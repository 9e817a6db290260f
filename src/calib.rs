//! Camera calibration: intrinsic matrix and distortion coefficients.
//!
//! Calibration files come in two formats, both produced by the upstream
//! calibration tooling:
//!
//! - TOML: `[calibration]` table with `camera_matrix = [[..3]; 3]` and
//!   `dist_coeffs = [..4]`
//! - JSON: `{"calibration": {"camera_matrix": [[..3]; 3],
//!   "dist_coeffs": [[c]; 4]}}` (each coefficient wrapped in a 1-element
//!   array)
//!
//! The loader dispatches on file extension.

use anyhow::{anyhow, Context, Result};
use nalgebra::Matrix3;
use serde::Deserialize;
use std::path::Path;

/// Camera intrinsics plus a 4-coefficient distortion model (k1, k2, p1, p2).
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    matrix: Matrix3<f64>,
    dist: [f64; 4],
}

#[derive(Debug, Deserialize)]
struct TomlCalibFile {
    calibration: TomlCalibSection,
}

#[derive(Debug, Deserialize)]
struct TomlCalibSection {
    camera_matrix: Vec<Vec<f64>>,
    dist_coeffs: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct JsonCalibFile {
    calibration: JsonCalibSection,
}

#[derive(Debug, Deserialize)]
struct JsonCalibSection {
    camera_matrix: Vec<Vec<f64>>,
    dist_coeffs: Vec<Vec<f64>>,
}

impl Calibration {
    /// Build a calibration from 3x3 matrix rows and 4 distortion coefficients.
    pub fn new(matrix_rows: [[f64; 3]; 3], dist: [f64; 4]) -> Result<Self> {
        let matrix = Matrix3::from_row_slice(&[
            matrix_rows[0][0],
            matrix_rows[0][1],
            matrix_rows[0][2],
            matrix_rows[1][0],
            matrix_rows[1][1],
            matrix_rows[1][2],
            matrix_rows[2][0],
            matrix_rows[2][1],
            matrix_rows[2][2],
        ]);
        let calib = Self { matrix, dist };
        calib.check_focal()?;
        Ok(calib)
    }

    /// Build from a flat row-major 9-element matrix with zero distortion.
    pub fn from_flat(values: &[f64]) -> Result<Self> {
        if values.len() != 9 {
            return Err(anyhow!("camera matrix must have 9 elements"));
        }
        let calib = Self {
            matrix: Matrix3::from_row_slice(values),
            dist: [0.0; 4],
        };
        calib.check_focal()?;
        Ok(calib)
    }

    /// Replace the distortion coefficients (k1, k2, p1, p2).
    pub fn set_dist_coeffs(&mut self, coeffs: &[f64]) -> Result<()> {
        if coeffs.len() != 4 {
            return Err(anyhow!("distortion coefficients must have 4 elements"));
        }
        self.dist = [coeffs[0], coeffs[1], coeffs[2], coeffs[3]];
        Ok(())
    }

    /// Load a calibration file, dispatching on extension (.toml or .json).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration file {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        match ext {
            "toml" => Self::from_toml_str(&raw)
                .with_context(|| format!("invalid calibration file {}", path.display())),
            "json" => Self::from_json_str(&raw)
                .with_context(|| format!("invalid calibration file {}", path.display())),
            other => Err(anyhow!(
                "unsupported calibration format '{}' (expected .toml or .json)",
                other
            )),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: TomlCalibFile = toml::from_str(raw).context("parse calibration TOML")?;
        let matrix = matrix_from_rows(&file.calibration.camera_matrix)?;
        if file.calibration.dist_coeffs.len() != 4 {
            return Err(anyhow!("invalid distortion coefficients size"));
        }
        let mut dist = [0.0; 4];
        dist.copy_from_slice(&file.calibration.dist_coeffs);
        let calib = Self { matrix, dist };
        calib.check_focal()?;
        Ok(calib)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: JsonCalibFile = serde_json::from_str(raw).context("parse calibration JSON")?;
        let matrix = matrix_from_rows(&file.calibration.camera_matrix)?;
        if file.calibration.dist_coeffs.len() != 4 {
            return Err(anyhow!("invalid distortion coefficients size"));
        }
        let mut dist = [0.0; 4];
        for (i, coeff) in file.calibration.dist_coeffs.iter().enumerate() {
            if coeff.len() != 1 {
                return Err(anyhow!("invalid distortion coefficient format"));
            }
            dist[i] = coeff[0];
        }
        let calib = Self { matrix, dist };
        calib.check_focal()?;
        Ok(calib)
    }

    fn check_focal(&self) -> Result<()> {
        if self.fx().abs() < f64::EPSILON || self.fy().abs() < f64::EPSILON {
            return Err(anyhow!("camera matrix has zero focal length"));
        }
        Ok(())
    }

    pub fn fx(&self) -> f64 {
        self.matrix[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.matrix[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.matrix[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.matrix[(1, 2)]
    }

    /// Row-major copy of the 3x3 camera matrix.
    pub fn matrix_flat(&self) -> [f64; 9] {
        let m = &self.matrix;
        [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
        ]
    }

    pub fn dist_coeffs(&self) -> [f64; 4] {
        self.dist
    }
}

fn matrix_from_rows(rows: &[Vec<f64>]) -> Result<Matrix3<f64>> {
    if rows.len() != 3 {
        return Err(anyhow!("invalid camera matrix structure"));
    }
    let mut flat = [0.0; 9];
    for (i, row) in rows.iter().enumerate() {
        if row.len() != 3 {
            return Err(anyhow!("invalid camera matrix row size"));
        }
        flat[i * 3..i * 3 + 3].copy_from_slice(row);
    }
    Ok(Matrix3::from_row_slice(&flat))
}
