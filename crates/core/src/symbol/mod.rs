use std::{fmt, str::FromStr};

use qrcode::{Color, EcLevel, QrCode};
use rxing::{BarcodeFormat, MultiFormatWriter, Writer};
use serde::{Deserialize, Serialize};

use crate::{FramecastError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeFamily {
    #[default]
    Qr,
    Aztec,
    DataMatrix,
}

impl CodeFamily {
    pub const ALL: [CodeFamily; 3] = [CodeFamily::Qr, CodeFamily::Aztec, CodeFamily::DataMatrix];

    pub fn as_str(self) -> &'static str {
        match self {
            CodeFamily::Qr => "qr",
            CodeFamily::Aztec => "aztec",
            CodeFamily::DataMatrix => "datamatrix",
        }
    }
}

impl fmt::Display for CodeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeFamily {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "qr" | "qrcode" => Ok(CodeFamily::Qr),
            "aztec" => Ok(CodeFamily::Aztec),
            "datamatrix" | "dm" => Ok(CodeFamily::DataMatrix),
            other => Err(format!(
                "unknown code family `{other}` (expected qr, aztec or datamatrix)"
            )),
        }
    }
}

/// Row-major grid of modules; `true` means a dark module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMatrix {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl BitMatrix {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    /// Builds a matrix from row-major bits. Returns `None` when the length
    /// does not match the dimensions.
    pub fn from_bits(width: usize, height: usize, bits: Vec<bool>) -> Option<Self> {
        (bits.len() == width * height).then_some(Self {
            width,
            height,
            bits,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.bits[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        if x < self.width && y < self.height {
            self.bits[y * self.width + x] = value;
        }
    }

    /// Iterates the coordinates of every dark module.
    pub fn dark_modules(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, dark)| **dark)
            .map(move |(index, _)| (index % self.width, index / self.width))
    }
}

/// Narrow seam to the external symbol libraries.
pub trait SymbolEncoder: Send + Sync {
    fn family(&self) -> CodeFamily;

    /// Encodes the payload, failing when it exceeds the family's capacity.
    fn encode(&self, payload: &str) -> Result<BitMatrix>;
}

/// QR encoder at medium error correction.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrEncoder;

impl SymbolEncoder for QrEncoder {
    fn family(&self) -> CodeFamily {
        CodeFamily::Qr
    }

    fn encode(&self, payload: &str) -> Result<BitMatrix> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
            .map_err(|err| FramecastError::symbol(CodeFamily::Qr, err))?;
        let width = code.width();
        let bits = code
            .to_colors()
            .into_iter()
            .map(|color| color == Color::Dark)
            .collect();
        BitMatrix::from_bits(width, width, bits)
            .ok_or_else(|| FramecastError::symbol(CodeFamily::Qr, "module count mismatch"))
    }
}

/// Aztec and Data Matrix encoder backed by rxing.
#[derive(Debug, Clone, Copy)]
pub struct MatrixEncoder {
    family: CodeFamily,
}

impl MatrixEncoder {
    pub fn aztec() -> Self {
        Self {
            family: CodeFamily::Aztec,
        }
    }

    pub fn data_matrix() -> Self {
        Self {
            family: CodeFamily::DataMatrix,
        }
    }

    fn format(&self) -> BarcodeFormat {
        match self.family {
            CodeFamily::Aztec => BarcodeFormat::AZTEC,
            CodeFamily::DataMatrix | CodeFamily::Qr => BarcodeFormat::DATA_MATRIX,
        }
    }
}

impl SymbolEncoder for MatrixEncoder {
    fn family(&self) -> CodeFamily {
        self.family
    }

    #[allow(deprecated)]
    fn encode(&self, payload: &str) -> Result<BitMatrix> {
        // Zero dimensions ask the writer for the minimal symbol, one pixel per module.
        let encoded = MultiFormatWriter::default()
            .encode(payload, &self.format(), 0, 0)
            .map_err(|err| FramecastError::symbol(self.family, err))?;

        let width = encoded.getWidth();
        let height = encoded.getHeight();
        let mut matrix = BitMatrix::new(width as usize, height as usize);
        for y in 0..height {
            for x in 0..width {
                if encoded.get(x, y) {
                    matrix.set(x as usize, y as usize, true);
                }
            }
        }
        Ok(matrix)
    }
}

/// Returns the encoder for the given family.
pub fn encoder_for(family: CodeFamily) -> Box<dyn SymbolEncoder> {
    match family {
        CodeFamily::Qr => Box::new(QrEncoder),
        CodeFamily::Aztec => Box::new(MatrixEncoder::aztec()),
        CodeFamily::DataMatrix => Box::new(MatrixEncoder::data_matrix()),
    }
}
