//! CPU heuristics for faces and on-screen text.
//!
//! These are cheap stand-ins for model-backed providers: good enough to reject obvious
//! talking-head and captioned videos without shipping model weights. Both work on a
//! coarse block grid and never keep pixel data past the call.

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionKind, DetectionResult, Region};
use crate::error::DetectionError;
use crate::frame::{luma, FrameView};

// -------------------- Faces --------------------

const SKIN_BLOCK_RATIO: f32 = 0.6;
const MIN_FACE_BLOCKS: usize = 6;

/// Skin-tone block clustering.
///
/// A block is skin when most of its pixels fall in the YCbCr skin box. Connected skin
/// blocks whose bounding box is roughly face-shaped are reported.
#[derive(Default)]
pub struct HeuristicFaceBackend;

impl HeuristicFaceBackend {
    pub fn new() -> Self {
        Self
    }
}

fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let cb = 128.0 - 0.168_736 * rf - 0.331_264 * gf + 0.5 * bf;
    let cr = 128.0 + 0.5 * rf - 0.418_688 * gf - 0.081_312 * bf;
    luma(r, g, b) > 60.0 && (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
}

fn block_size(width: usize, height: usize) -> usize {
    (width.min(height) / 32).clamp(4, 16)
}

struct Grid {
    cols: usize,
    rows: usize,
    cells: Vec<bool>,
}

impl Grid {
    fn build(
        pixels: &[u8],
        width: usize,
        height: usize,
        block: usize,
        mut cell: impl FnMut(&[u8], usize, usize, usize) -> bool,
    ) -> Self {
        let cols = width / block;
        let rows = height / block;
        let mut cells = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                cells.push(cell(pixels, width, col * block, row * block));
            }
        }
        Self { cols, rows, cells }
    }

    fn get(&self, col: usize, row: usize) -> bool {
        self.cells[row * self.cols + col]
    }
}

impl DetectorBackend for HeuristicFaceBackend {
    fn name(&self) -> &'static str {
        "heuristic-face"
    }

    fn supports(&self, kind: DetectionKind) -> bool {
        kind == DetectionKind::Face
    }

    fn detect(
        &self,
        _kind: DetectionKind,
        frame: &FrameView<'_>,
    ) -> Result<Vec<DetectionResult>, DetectionError> {
        let pixels = frame.rgb24()?;
        let (width, height) = (frame.width() as usize, frame.height() as usize);
        let block = block_size(width, height);
        let grid = Grid::build(pixels, width, height, block, |px, stride, x0, y0| {
            let mut skin = 0usize;
            for y in y0..y0 + block {
                for x in x0..x0 + block {
                    let i = (y * stride + x) * 3;
                    if is_skin(px[i], px[i + 1], px[i + 2]) {
                        skin += 1;
                    }
                }
            }
            skin as f32 / (block * block) as f32 >= SKIN_BLOCK_RATIO
        });

        let mut seen = vec![false; grid.cells.len()];
        let mut detections = Vec::new();
        for start in 0..grid.cells.len() {
            if seen[start] || !grid.cells[start] {
                continue;
            }
            // flood fill one component
            let (mut min_c, mut max_c) = (usize::MAX, 0usize);
            let (mut min_r, mut max_r) = (usize::MAX, 0usize);
            let mut size = 0usize;
            let mut stack = vec![start];
            seen[start] = true;
            while let Some(idx) = stack.pop() {
                let (col, row) = (idx % grid.cols, idx / grid.cols);
                size += 1;
                min_c = min_c.min(col);
                max_c = max_c.max(col);
                min_r = min_r.min(row);
                max_r = max_r.max(row);
                let neighbours = [
                    (col > 0).then(|| idx - 1),
                    (col + 1 < grid.cols).then(|| idx + 1),
                    (row > 0).then(|| idx - grid.cols),
                    (row + 1 < grid.rows).then(|| idx + grid.cols),
                ];
                for next in neighbours.into_iter().flatten() {
                    if !seen[next] && grid.get(next % grid.cols, next / grid.cols) {
                        seen[next] = true;
                        stack.push(next);
                    }
                }
            }
            if size < MIN_FACE_BLOCKS {
                continue;
            }
            let box_w = max_c - min_c + 1;
            let box_h = max_r - min_r + 1;
            let aspect = box_h as f32 / box_w as f32;
            let fill = size as f32 / (box_w * box_h) as f32;
            let coverage = (box_w * box_h) as f32 / (grid.cols * grid.rows) as f32;
            if !(0.8..=2.2).contains(&aspect) || fill < 0.5 || !(0.002..=0.6).contains(&coverage) {
                continue;
            }
            let size_score = (size as f32 / 12.0).min(1.0);
            let confidence = (0.3 + 0.5 * fill + 0.2 * size_score).min(0.99);
            let region = Region::new(
                (min_c * block) as f32 / width as f32,
                (min_r * block) as f32 / height as f32,
                (box_w * block) as f32 / width as f32,
                (box_h * block) as f32 / height as f32,
            );
            detections.push(DetectionResult::face(confidence, region));
        }
        Ok(detections)
    }
}

// -------------------- Text --------------------

const TEXT_BLOCK: usize = 8;
const EDGE_DELTA: f32 = 40.0;
const MIN_RUN_BLOCKS: usize = 3;

/// Edge-density text finder.
///
/// Caption glyphs produce dense, short horizontal luminance swings. Blocks with a
/// moderate density of strong horizontal gradients are joined into runs, runs in
/// adjacent block rows into lines, and each line's stroke count estimates its length.
#[derive(Default)]
pub struct HeuristicTextBackend;

impl HeuristicTextBackend {
    pub fn new() -> Self {
        Self
    }
}

struct Line {
    row_start: usize,
    row_end: usize,
    col_start: usize,
    col_end: usize,
    density_sum: f32,
    blocks: usize,
}

fn is_edge(pixels: &[u8], width: usize, x: usize, y: usize) -> bool {
    if x + 1 >= width {
        return false;
    }
    let a = (y * width + x) * 3;
    let b = a + 3;
    let la = luma(pixels[a], pixels[a + 1], pixels[a + 2]);
    let lb = luma(pixels[b], pixels[b + 1], pixels[b + 2]);
    (la - lb).abs() > EDGE_DELTA
}

impl DetectorBackend for HeuristicTextBackend {
    fn name(&self) -> &'static str {
        "heuristic-text"
    }

    fn supports(&self, kind: DetectionKind) -> bool {
        kind == DetectionKind::Text
    }

    fn detect(
        &self,
        _kind: DetectionKind,
        frame: &FrameView<'_>,
    ) -> Result<Vec<DetectionResult>, DetectionError> {
        let pixels = frame.rgb24()?;
        let (width, height) = (frame.width() as usize, frame.height() as usize);
        let cols = width / TEXT_BLOCK;
        let rows = height / TEXT_BLOCK;
        if cols < MIN_RUN_BLOCKS || rows == 0 {
            return Ok(Vec::new());
        }

        let mut density = vec![0f32; cols * rows];
        for row in 0..rows {
            for col in 0..cols {
                let mut edges = 0usize;
                for y in row * TEXT_BLOCK..(row + 1) * TEXT_BLOCK {
                    for x in col * TEXT_BLOCK..(col + 1) * TEXT_BLOCK {
                        if is_edge(pixels, width, x, y) {
                            edges += 1;
                        }
                    }
                }
                density[row * cols + col] = edges as f32 / (TEXT_BLOCK * TEXT_BLOCK) as f32;
            }
        }
        let is_text = |d: f32| (0.15..=0.6).contains(&d);

        let mut lines: Vec<Line> = Vec::new();
        for row in 0..rows {
            let mut col = 0;
            while col < cols {
                if !is_text(density[row * cols + col]) {
                    col += 1;
                    continue;
                }
                let start = col;
                let mut sum = 0.0;
                while col < cols && is_text(density[row * cols + col]) {
                    sum += density[row * cols + col];
                    col += 1;
                }
                if col - start < MIN_RUN_BLOCKS {
                    continue;
                }
                let joined = lines.iter_mut().find(|line| {
                    line.row_end == row && line.col_start < col && start < line.col_end
                });
                match joined {
                    Some(line) => {
                        line.row_end = row + 1;
                        line.col_start = line.col_start.min(start);
                        line.col_end = line.col_end.max(col);
                        line.density_sum += sum;
                        line.blocks += col - start;
                    }
                    None => lines.push(Line {
                        row_start: row,
                        row_end: row + 1,
                        col_start: start,
                        col_end: col,
                        density_sum: sum,
                        blocks: col - start,
                    }),
                }
            }
        }

        let mut detections = Vec::new();
        for line in lines {
            let span_cols = line.col_end - line.col_start;
            let span_rows = line.row_end - line.row_start;
            if span_cols < 2 * span_rows {
                continue;
            }
            let mid_y = (line.row_start + line.row_end) * TEXT_BLOCK / 2;
            let strokes = (line.col_start * TEXT_BLOCK..line.col_end * TEXT_BLOCK)
                .filter(|&x| is_edge(pixels, width, x, mid_y.min(height - 1)))
                .count();
            let glyphs = (strokes / 4).max(1);
            let mean_density = line.density_sum / line.blocks as f32;
            let confidence = (0.45 + mean_density).min(0.95);
            let region = Region::new(
                (line.col_start * TEXT_BLOCK) as f32 / width as f32,
                (line.row_start * TEXT_BLOCK) as f32 / height as f32,
                (span_cols * TEXT_BLOCK) as f32 / width as f32,
                (span_rows * TEXT_BLOCK) as f32 / height as f32,
            );
            detections.push(DetectionResult::text(confidence, glyphs, region));
        }
        Ok(detections)
    }
}
