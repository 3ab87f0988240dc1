//! XYZ molecule files.
//!
//! ```text
//! 3
//! water
//! O  0.000  0.000  0.000
//! H  0.757  0.586  0.000
//! H -0.757  0.586  0.000
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};

/// Element channels of the one-hot node features; anything else maps to the last.
pub const ELEMENTS: [&str; 4] = ["H", "C", "N", "O"];
pub const FEATURE_DIM: usize = ELEMENTS.len() + 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Molecule {
    pub comment: String,
    pub symbols: Vec<String>,
    pub coords: Vec<[f64; 3]>,
}

impl Molecule {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to parse XYZ file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let count: usize = lines
            .next()
            .context("missing atom count")?
            .trim()
            .parse()
            .context("atom count is not an integer")?;
        let comment = lines.next().unwrap_or_default().trim().to_string();

        let mut symbols = Vec::with_capacity(count);
        let mut coords = Vec::with_capacity(count);
        for (i, line) in lines.filter(|l| !l.trim().is_empty()).take(count).enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                bail!("atom line {} has {} fields, expected `symbol x y z`", i + 1, fields.len());
            }
            let mut xyz = [0.0; 3];
            for (slot, field) in xyz.iter_mut().zip(&fields[1..4]) {
                *slot = field
                    .parse()
                    .with_context(|| format!("atom line {}: bad coordinate `{field}`", i + 1))?;
            }
            symbols.push(fields[0].to_string());
            coords.push(xyz);
        }
        if symbols.len() != count {
            bail!("header declares {count} atoms but {} were found", symbols.len());
        }
        Ok(Self {
            comment,
            symbols,
            coords,
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// One-hot element features (N, FEATURE_DIM), f32.
    pub fn features(&self, device: &Device) -> Result<Tensor> {
        let mut data = vec![0f32; self.len() * FEATURE_DIM];
        for (i, symbol) in self.symbols.iter().enumerate() {
            data[i * FEATURE_DIM + element_channel(symbol)] = 1.0;
        }
        Ok(Tensor::from_vec(data, (self.len(), FEATURE_DIM), device)?)
    }

    /// Coordinates (N, 3), f32.
    pub fn coords(&self, device: &Device) -> Result<Tensor> {
        let flat: Vec<f32> = self.coords.iter().flatten().map(|&v| v as f32).collect();
        Ok(Tensor::from_vec(flat, (self.len(), 3), device)?)
    }
}

pub fn element_channel(symbol: &str) -> usize {
    ELEMENTS
        .iter()
        .position(|e| e.eq_ignore_ascii_case(symbol))
        .unwrap_or(ELEMENTS.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATER: &str = "3\nwater\nO 0.0 0.0 0.0\nH 0.757 0.586 0.0\nH -0.757 0.586 0.0\n";

    #[test]
    fn test_parse_water() {
        let mol = Molecule::parse(WATER).unwrap();
        assert_eq!(mol.comment, "water");
        assert_eq!(mol.symbols, vec!["O", "H", "H"]);
        assert_eq!(mol.coords[1], [0.757, 0.586, 0.0]);
    }

    #[test]
    fn test_features_one_hot() {
        let mol = Molecule::parse("2\n\nS 0 0 0\nc 1 0 0\n").unwrap();
        let f = mol.features(&Device::Cpu).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(f[0], vec![0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(f[1], vec![0.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_short_file() {
        let err = Molecule::parse("3\nshort\nH 0 0 0\n").unwrap_err();
        assert!(err.to_string().contains("3 atoms"));
    }

    #[test]
    fn test_rejects_bad_coordinate() {
        assert!(Molecule::parse("1\n\nH 0 zero 0\n").is_err());
        assert!(Molecule::parse("x\n").is_err());
    }
}
