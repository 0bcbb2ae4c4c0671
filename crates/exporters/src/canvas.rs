use media_io::RgbaFrame;

/// Offscreen RGBA8 surface at the export resolution.
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        for px in pixels.chunks_exact_mut(4) { px[3] = 255; }
        Self { width, height, pixels }
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn pixels(&self) -> &[u8] { &self.pixels }

    /// Draws `frame` stretched over the whole canvas (nearest neighbour when sizes differ).
    pub fn draw(&mut self, frame: &RgbaFrame) {
        let expected = RgbaFrame::byte_len(frame.width, frame.height);
        if frame.width == 0 || frame.height == 0 || frame.data.len() < expected { return; }
        if frame.width == self.width && frame.height == self.height {
            self.pixels.copy_from_slice(&frame.data[..expected]);
            return;
        }
        let (sw, sh) = (frame.width as usize, frame.height as usize);
        let (dw, dh) = (self.width as usize, self.height as usize);
        for y in 0..dh {
            let sy = y * sh / dh;
            for x in 0..dw {
                let sx = x * sw / dw;
                let s = (sy * sw + sx) * 4;
                let d = (y * dw + x) * 4;
                self.pixels[d..d + 4].copy_from_slice(&frame.data[s..s + 4]);
            }
        }
    }
}
