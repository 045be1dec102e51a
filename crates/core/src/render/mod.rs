use std::collections::HashMap;

use crate::{
    chunker::Envelope,
    playback::FrameSnapshot,
    symbol::{encoder_for, BitMatrix, CodeFamily, SymbolEncoder},
    FramecastError, Result,
};

pub const WHITE: u8 = 255;
pub const BLACK: u8 = 0;

/// 8-bit grayscale canvas, row-major.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u8> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }

    fn resize_and_clear(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width * height, WHITE);
    }
}

/// Integer scale that fits the larger matrix side into `target_size`, never
/// below one pixel per module.
pub fn scale_for(matrix: &BitMatrix, target_size: usize) -> usize {
    let side = matrix.width().max(matrix.height()).max(1);
    (target_size / side).max(1)
}

/// Paints `matrix` into `canvas` with crisp `scale x scale` blocks.
pub fn rasterize(matrix: &BitMatrix, target_size: usize, canvas: &mut PixelBuffer) {
    let scale = scale_for(matrix, target_size);
    let width = matrix.width() * scale;
    canvas.resize_and_clear(width, matrix.height() * scale);

    for (mx, my) in matrix.dark_modules() {
        for row in my * scale..(my + 1) * scale {
            let start = row * width + mx * scale;
            canvas.pixels[start..start + scale].fill(BLACK);
        }
    }
}

/// What the presentation layer should show for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameView {
    /// No envelopes: nothing to stream.
    Empty,
    /// The payload did not parse as an envelope; the frame is skipped.
    Unparseable,
    /// The encoder rejected the payload; nothing is drawn for this frame.
    Skipped,
    /// The canvas holds the symbol for this envelope.
    Ready {
        seq: usize,
        total: usize,
        stream_id: String,
    },
}

/// Turns envelope payloads into pixels. Owns nothing but its canvas and the
/// encoder table.
pub struct SymbolRenderer {
    target_size: usize,
    canvas: PixelBuffer,
    encoders: HashMap<CodeFamily, Box<dyn SymbolEncoder>>,
}

impl SymbolRenderer {
    pub fn new(target_size: usize) -> Result<Self> {
        if target_size == 0 {
            return Err(FramecastError::InvalidTargetSize);
        }
        let encoders = CodeFamily::ALL
            .into_iter()
            .map(|family| (family, encoder_for(family)))
            .collect();
        Ok(Self {
            target_size,
            canvas: PixelBuffer::default(),
            encoders,
        })
    }

    /// Replaces the encoder used for the encoder's family.
    pub fn with_encoder(mut self, encoder: Box<dyn SymbolEncoder>) -> Self {
        self.encoders.insert(encoder.family(), encoder);
        self
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    pub fn canvas(&self) -> &PixelBuffer {
        &self.canvas
    }

    /// Encodes `payload` with the family's encoder and rasterizes it.
    pub fn render(&mut self, payload: &str, family: CodeFamily) -> Result<&PixelBuffer> {
        let encoder = self
            .encoders
            .get(&family)
            .ok_or_else(|| FramecastError::symbol(family, "no encoder registered"))?;
        let matrix = encoder.encode(payload)?;
        rasterize(&matrix, self.target_size, &mut self.canvas);
        Ok(&self.canvas)
    }

    /// Renders the envelope selected in `snapshot`. Failures are logged and
    /// reported as a view; they never reach the scheduler.
    pub fn render_frame(&mut self, snapshot: &FrameSnapshot, family: CodeFamily) -> FrameView {
        let Some(payload) = snapshot.payload.as_deref() else {
            return FrameView::Empty;
        };

        let envelope = match Envelope::from_payload(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "cannot parse chunk");
                return FrameView::Unparseable;
            }
        };

        match self.render(payload, family) {
            Ok(_) => FrameView::Ready {
                seq: envelope.seq,
                total: envelope.total,
                stream_id: envelope.id.to_string(),
            },
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    %family,
                    seq = envelope.seq,
                    payload_len = payload.len(),
                    "symbol encoding failed, skipping frame"
                );
                FrameView::Skipped
            }
        }
    }
}

impl std::fmt::Debug for SymbolRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolRenderer")
            .field("target_size", &self.target_size)
            .field("canvas", &(self.canvas.width, self.canvas.height))
            .finish()
    }
}
