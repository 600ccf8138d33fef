//! The PPU: scanline renderer for the tile modes 0-2 and bitmap modes 3-5,
//! 128 sprites with affine matrices, windows and color special effects.
//!
//! The line state machine itself (hdraw/hblank events, vcount) is driven by
//! the scheduler, see [`Gba::dispatch`](crate::gba::Gba). This module only
//! holds the LCD registers, the video memories and the per-scanline
//! rendering into the RGB555 frame buffer.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::bitwise::{sign_extend, Bits};

pub const DISPLAY_WIDTH: usize = 240;
pub const DISPLAY_HEIGHT: usize = 160;

/// Scanlines per frame, vblank included.
pub const TOTAL_LINES: u16 = 228;

/// One rendered frame, RGB555 per pixel.
pub type FrameBuffer = [[u16; DISPLAY_WIDTH]; DISPLAY_HEIGHT];

/// Start of the sprite tile area inside VRAM.
const OBJ_TILE_BASE: usize = 0x1_0000;

#[derive(Debug, Clone, Copy, Default)]
struct ObjPixel {
    color: Option<u16>,
    priority: u8,
    semi_transparent: bool,
    /// Pixel belongs to the object window rather than the visible layer.
    window: bool,
}

#[derive(Debug, Clone, Copy)]
struct LayerPixel {
    color: u16,
    priority: u8,
    /// 0-3 backgrounds, 4 sprites, 5 backdrop.
    layer: u8,
}

#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct Lcd {
    /// LCD Control
    pub dispcnt: u16,
    /// Undocumented - Green Swap
    pub green_swap: u16,
    /// General LCD Status (vblank/hblank/vcount flags and IRQ enables)
    pub dispstat: u16,
    /// Current scanline
    pub vcount: u16,
    /// BG0-BG3 Control
    pub bgcnt: [u16; 4],
    /// BG0-BG3 horizontal scroll
    pub bghofs: [u16; 4],
    /// BG0-BG3 vertical scroll
    pub bgvofs: [u16; 4],
    /// BG2/BG3 affine matrix (pa, pb, pc, pd each)
    pub bg2p: [u16; 4],
    pub bg3p: [u16; 4],
    /// BG2/BG3 reference points, 28-bit signed 19.8 fixed point
    pub bg2x: u32,
    pub bg2y: u32,
    pub bg3x: u32,
    pub bg3y: u32,
    /// Window bounds
    pub win0h: u16,
    pub win1h: u16,
    pub win0v: u16,
    pub win1v: u16,
    /// Layer enables inside/outside the windows
    pub winin: u16,
    pub winout: u16,
    /// Mosaic Size
    pub mosaic: u16,
    /// Color Special Effects Selection
    pub bldcnt: u16,
    /// Alpha Blending Coefficients
    pub bldalpha: u16,
    /// Brightness Coefficient
    pub bldy: u16,

    /// From 0x05000000, BG palette then OBJ palette (512 bytes each).
    #[serde_as(as = "Box<[_; 1024]>")]
    pub palette_ram: Box<[u8; 0x400]>,
    /// From 0x06000000 (96 KiB, BG pages then OBJ pages).
    #[serde_as(as = "Box<[_; 98304]>")]
    pub video_ram: Box<[u8; 0x18000]>,
    /// From 0x07000000 (1 KiB of object attributes).
    #[serde_as(as = "Box<[_; 1024]>")]
    pub oam: Box<[u8; 0x400]>,

    #[serde_as(as = "Box<[[_; 240]; 160]>")]
    pub frame: Box<FrameBuffer>,

    /// Affine accumulators, latched from the reference points at the top of
    /// the frame and stepped by pb/pd every line.
    internal_bg2x: i32,
    internal_bg2y: i32,
    internal_bg3x: i32,
    internal_bg3y: i32,
}

impl Default for Lcd {
    fn default() -> Self {
        Self {
            dispcnt: 0,
            green_swap: 0,
            dispstat: 0,
            vcount: 0,
            bgcnt: [0; 4],
            bghofs: [0; 4],
            bgvofs: [0; 4],
            bg2p: [0x100, 0, 0, 0x100],
            bg3p: [0x100, 0, 0, 0x100],
            bg2x: 0,
            bg2y: 0,
            bg3x: 0,
            bg3y: 0,
            win0h: 0,
            win1h: 0,
            win0v: 0,
            win1v: 0,
            winin: 0,
            winout: 0,
            mosaic: 0,
            bldcnt: 0,
            bldalpha: 0,
            bldy: 0,
            palette_ram: Box::new([0; 0x400]),
            video_ram: Box::new([0; 0x18000]),
            oam: Box::new([0; 0x400]),
            frame: Box::new([[0; DISPLAY_WIDTH]; DISPLAY_HEIGHT]),
            internal_bg2x: 0,
            internal_bg2y: 0,
            internal_bg3x: 0,
            internal_bg3y: 0,
        }
    }
}

// DISPSTAT plumbing.
impl Lcd {
    #[must_use]
    pub fn bg_mode(&self) -> u8 {
        self.dispcnt.get_bits(0..=2) as u8
    }

    fn bg_enabled(&self, bg: usize) -> bool {
        self.dispcnt.get_bit(8 + bg as u8)
    }

    fn obj_enabled(&self) -> bool {
        self.dispcnt.get_bit(12)
    }

    pub fn set_vblank_flag(&mut self, value: bool) {
        self.dispstat.set_bit(0, value);
    }

    pub fn set_hblank_flag(&mut self, value: bool) {
        self.dispstat.set_bit(1, value);
    }

    pub fn set_vcounter_flag(&mut self, value: bool) {
        self.dispstat.set_bit(2, value);
    }

    #[must_use]
    pub fn vblank_irq_enabled(&self) -> bool {
        self.dispstat.get_bit(3)
    }

    #[must_use]
    pub fn hblank_irq_enabled(&self) -> bool {
        self.dispstat.get_bit(4)
    }

    #[must_use]
    pub fn vcounter_irq_enabled(&self) -> bool {
        self.dispstat.get_bit(5)
    }

    #[must_use]
    pub fn vcount_setting(&self) -> u16 {
        u16::from(self.dispstat.get_byte(1))
    }

    /// Latches the affine reference points into the line accumulators.
    /// Happens at the top of every frame.
    pub fn latch_affine_references(&mut self) {
        self.internal_bg2x = sign_extend(self.bg2x, 28) as i32;
        self.internal_bg2y = sign_extend(self.bg2y, 28) as i32;
        self.internal_bg3x = sign_extend(self.bg3x, 28) as i32;
        self.internal_bg3y = sign_extend(self.bg3y, 28) as i32;
    }

    /// Steps the affine accumulators by pb/pd at the end of a visible line.
    pub fn step_affine_references(&mut self) {
        self.internal_bg2x += i32::from(self.bg2p[1] as i16);
        self.internal_bg2y += i32::from(self.bg2p[3] as i16);
        self.internal_bg3x += i32::from(self.bg3p[1] as i16);
        self.internal_bg3y += i32::from(self.bg3p[3] as i16);
    }
}

// Rendering.
impl Lcd {
    fn palette_color(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.palette_ram[index * 2], self.palette_ram[index * 2 + 1]])
    }

    fn obj_palette_color(&self, index: usize) -> u16 {
        self.palette_color(0x100 + index)
    }

    fn vram_half(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.video_ram[offset], self.video_ram[offset + 1]])
    }

    /// Renders the scanline `vcount` into the frame buffer.
    pub fn render_scanline(&mut self) {
        let y = usize::from(self.vcount);
        if y >= DISPLAY_HEIGHT {
            return;
        }

        if self.dispcnt.get_bit(7) {
            // Forced blank shows a white screen.
            self.frame[y].fill(0x7FFF);
            return;
        }

        let obj_line = if self.obj_enabled() {
            self.render_sprites_line(y)
        } else {
            [ObjPixel::default(); DISPLAY_WIDTH]
        };

        let backdrop = LayerPixel {
            color: self.palette_color(0),
            priority: 4,
            layer: 5,
        };

        let windows_active = self.dispcnt.get_bits(13..=15) != 0;

        for x in 0..DISPLAY_WIDTH {
            let (layer_mask, effects_allowed) = if windows_active {
                self.window_control(x, y, obj_line[x].window)
            } else {
                (0x1F, true)
            };

            let mut first = backdrop;
            let mut second = backdrop;
            let mut first_semi = false;

            let mut consider = |pixel: LayerPixel, semi: bool| {
                if pixel.priority < first.priority {
                    second = first;
                    first = pixel;
                    first_semi = semi;
                } else if pixel.priority < second.priority {
                    second = pixel;
                }
            };

            if let Some(color) = obj_line[x].color {
                if layer_mask.get_bit(4) {
                    consider(
                        LayerPixel {
                            color,
                            priority: obj_line[x].priority,
                            layer: 4,
                        },
                        obj_line[x].semi_transparent,
                    );
                }
            }

            for bg in 0..4 {
                if self.bg_enabled(bg) && layer_mask.get_bit(bg as u8) {
                    if let Some((color, priority)) = self.bg_pixel(bg, x, y) {
                        consider(LayerPixel { color, priority, layer: bg as u8 }, false);
                    }
                }
            }

            self.frame[y][x] = self.apply_color_effects(first, second, first_semi, effects_allowed);
        }
    }

    /// Resolves the layer mask and effect gate at (x, y): WIN0 beats WIN1
    /// beats the object window beats outside.
    fn window_control(&self, x: usize, y: usize, in_obj_window: bool) -> (u16, bool) {
        let in_window = |h: u16, v: u16| {
            let left = usize::from(h.get_byte(1));
            let right = usize::from(h.get_byte(0));
            let top = usize::from(v.get_byte(1));
            let bottom = usize::from(v.get_byte(0));

            // Coordinates wrap when the right edge is left of the left edge.
            let horizontal = if left <= right {
                (left..right).contains(&x)
            } else {
                x >= left || x < right
            };
            let vertical = if top <= bottom {
                (top..bottom).contains(&y)
            } else {
                y >= top || y < bottom
            };
            horizontal && vertical
        };

        let control = if self.dispcnt.get_bit(13) && in_window(self.win0h, self.win0v) {
            self.winin.get_bits(0..=5)
        } else if self.dispcnt.get_bit(14) && in_window(self.win1h, self.win1v) {
            self.winin.get_bits(8..=13)
        } else if self.dispcnt.get_bit(15) && in_obj_window {
            self.winout.get_bits(8..=13)
        } else {
            self.winout.get_bits(0..=5)
        };

        (control.get_bits(0..=4), control.get_bit(5))
    }

    fn apply_color_effects(
        &self,
        first: LayerPixel,
        second: LayerPixel,
        first_semi: bool,
        effects_allowed: bool,
    ) -> u16 {
        if !effects_allowed {
            return first.color;
        }

        let first_target = self.bldcnt.get_bit(first.layer);
        let second_target = self.bldcnt.get_bit(8 + second.layer);

        // A semi-transparent sprite forces alpha blending onto whatever is
        // behind it, regardless of the selected effect.
        if first_semi && second_target {
            return alpha_blend(first.color, second.color, self.bldalpha);
        }

        match self.bldcnt.get_bits(6..=7) {
            1 if first_target && second_target => {
                alpha_blend(first.color, second.color, self.bldalpha)
            }
            2 if first_target => brightness(first.color, self.bldy, true),
            3 if first_target => brightness(first.color, self.bldy, false),
            _ => first.color,
        }
    }

    fn bg_pixel(&self, bg: usize, x: usize, y: usize) -> Option<(u16, u8)> {
        let priority = self.bgcnt[bg].get_bits(0..=1) as u8;
        let color = match (self.bg_mode(), bg) {
            (0, _) | (1, 0 | 1) => self.text_bg_pixel(bg, x, y),
            (1 | 2, 2) | (2, 3) => self.affine_bg_pixel(bg, x),
            (3, 2) => self.bitmap_pixel_mode3(x),
            (4, 2) => self.bitmap_pixel_mode4(x),
            (5, 2) => self.bitmap_pixel_mode5(x),
            _ => None,
        }?;
        Some((color, priority))
    }

    /// Regular (text) background: scrolled, tiled, 4 or 8 bpp.
    fn text_bg_pixel(&self, bg: usize, x: usize, y: usize) -> Option<u16> {
        let control = self.bgcnt[bg];
        let (width_tiles, height_tiles) = match control.get_bits(14..=15) {
            0 => (32, 32),
            1 => (64, 32),
            2 => (32, 64),
            _ => (64, 64),
        };

        let scroll_x = (x + usize::from(self.bghofs[bg]) % (width_tiles * 8)) % (width_tiles * 8);
        let scroll_y = (y + usize::from(self.bgvofs[bg]) % (height_tiles * 8)) % (height_tiles * 8);

        let tile_x = scroll_x / 8;
        let tile_y = scroll_y / 8;

        // 64-wide and 64-tall maps are stitched out of 32x32 screen blocks.
        let quadrant = (tile_x / 32) + (tile_y / 32) * (width_tiles / 32);
        let screen_base = usize::from(control.get_bits(8..=12)) * 0x800 + quadrant * 0x800;

        let entry_offset = screen_base + ((tile_y % 32) * 32 + tile_x % 32) * 2;
        let entry = self.vram_half(entry_offset);

        let tile_number = usize::from(entry.get_bits(0..=9));
        let mut pixel_x = scroll_x % 8;
        let mut pixel_y = scroll_y % 8;
        if entry.get_bit(10) {
            pixel_x = 7 - pixel_x;
        }
        if entry.get_bit(11) {
            pixel_y = 7 - pixel_y;
        }

        let char_base = usize::from(control.get_bits(2..=3)) * 0x4000;
        let palette_index = if control.get_bit(7) {
            // 8bpp: 64 bytes per tile.
            usize::from(self.video_ram[char_base + tile_number * 64 + pixel_y * 8 + pixel_x])
        } else {
            // 4bpp: 32 bytes per tile, two pixels per byte.
            let byte = self.video_ram[char_base + tile_number * 32 + pixel_y * 4 + pixel_x / 2];
            let nibble = if pixel_x % 2 == 0 { byte & 0xF } else { byte >> 4 };
            if nibble == 0 {
                return None;
            }
            return Some(self.palette_color(
                usize::from(entry.get_bits(12..=15)) * 16 + usize::from(nibble),
            ));
        };

        if palette_index == 0 {
            None
        } else {
            Some(self.palette_color(palette_index))
        }
    }

    /// Rotation/scaling background: 8bpp tiles addressed through the affine
    /// accumulators.
    fn affine_bg_pixel(&self, bg: usize, x: usize) -> Option<u16> {
        let control = self.bgcnt[bg];
        let (pa, pc, ref_x, ref_y) = if bg == 2 {
            (self.bg2p[0], self.bg2p[2], self.internal_bg2x, self.internal_bg2y)
        } else {
            (self.bg3p[0], self.bg3p[2], self.internal_bg3x, self.internal_bg3y)
        };

        let size_tiles = 16 << control.get_bits(14..=15); // 16..128
        let size_pixels = size_tiles * 8;

        let tex_x = (ref_x + i32::from(pa as i16) * x as i32) >> 8;
        let tex_y = (ref_y + i32::from(pc as i16) * x as i32) >> 8;

        let (tex_x, tex_y) = if control.get_bit(13) {
            // Wraparound.
            (tex_x.rem_euclid(size_pixels), tex_y.rem_euclid(size_pixels))
        } else {
            if tex_x < 0 || tex_y < 0 || tex_x >= size_pixels || tex_y >= size_pixels {
                return None;
            }
            (tex_x, tex_y)
        };

        let (tex_x, tex_y) = (tex_x as usize, tex_y as usize);
        let screen_base = usize::from(control.get_bits(8..=12)) * 0x800;
        let char_base = usize::from(control.get_bits(2..=3)) * 0x4000;

        // Affine maps are one byte per entry, always 8bpp.
        let tile_number =
            usize::from(self.video_ram[screen_base + (tex_y / 8) * (size_pixels as usize / 8) + tex_x / 8]);
        let palette_index =
            usize::from(self.video_ram[char_base + tile_number * 64 + (tex_y % 8) * 8 + tex_x % 8]);

        if palette_index == 0 {
            None
        } else {
            Some(self.palette_color(palette_index))
        }
    }

    fn bitmap_coords(&self, x: usize) -> (i32, i32) {
        let tex_x = (self.internal_bg2x + i32::from(self.bg2p[0] as i16) * x as i32) >> 8;
        let tex_y = (self.internal_bg2y + i32::from(self.bg2p[2] as i16) * x as i32) >> 8;
        (tex_x, tex_y)
    }

    fn bitmap_pixel_mode3(&self, x: usize) -> Option<u16> {
        let (tex_x, tex_y) = self.bitmap_coords(x);
        if !(0..DISPLAY_WIDTH as i32).contains(&tex_x) || !(0..DISPLAY_HEIGHT as i32).contains(&tex_y)
        {
            return None;
        }
        Some(self.vram_half((tex_y as usize * DISPLAY_WIDTH + tex_x as usize) * 2))
    }

    fn bitmap_pixel_mode4(&self, x: usize) -> Option<u16> {
        let (tex_x, tex_y) = self.bitmap_coords(x);
        if !(0..DISPLAY_WIDTH as i32).contains(&tex_x) || !(0..DISPLAY_HEIGHT as i32).contains(&tex_y)
        {
            return None;
        }

        let page = if self.dispcnt.get_bit(4) { 0xA000 } else { 0 };
        let index = self.video_ram[page + tex_y as usize * DISPLAY_WIDTH + tex_x as usize];
        if index == 0 {
            None
        } else {
            Some(self.palette_color(usize::from(index)))
        }
    }

    fn bitmap_pixel_mode5(&self, x: usize) -> Option<u16> {
        const WIDTH: i32 = 160;
        const HEIGHT: i32 = 128;

        let (tex_x, tex_y) = self.bitmap_coords(x);
        if !(0..WIDTH).contains(&tex_x) || !(0..HEIGHT).contains(&tex_y) {
            return None;
        }

        let page = if self.dispcnt.get_bit(4) { 0xA000 } else { 0 };
        Some(self.vram_half(page + (tex_y as usize * WIDTH as usize + tex_x as usize) * 2))
    }

    fn render_sprites_line(&self, y: usize) -> [ObjPixel; DISPLAY_WIDTH] {
        let mut line = [ObjPixel::default(); DISPLAY_WIDTH];
        let one_dimensional = self.dispcnt.get_bit(6);

        for obj in 0..128 {
            let base = obj * 8;
            let attr0 = u16::from_le_bytes([self.oam[base], self.oam[base + 1]]);
            let attr1 = u16::from_le_bytes([self.oam[base + 2], self.oam[base + 3]]);
            let attr2 = u16::from_le_bytes([self.oam[base + 4], self.oam[base + 5]]);

            let obj_mode = attr0.get_bits(8..=9);
            if obj_mode == 0b10 {
                continue; // disabled
            }
            let gfx_mode = attr0.get_bits(10..=11);
            if gfx_mode == 0b11 {
                continue; // prohibited
            }

            let (width, height): (i32, i32) = match (attr0.get_bits(14..=15), attr1.get_bits(14..=15)) {
                (0b00, 0b00) => (8, 8),
                (0b00, 0b01) => (16, 16),
                (0b00, 0b10) => (32, 32),
                (0b00, 0b11) => (64, 64),
                (0b01, 0b00) => (16, 8),
                (0b01, 0b01) => (32, 8),
                (0b01, 0b10) => (32, 16),
                (0b01, 0b11) => (64, 32),
                (0b10, 0b00) => (8, 16),
                (0b10, 0b01) => (8, 32),
                (0b10, 0b10) => (16, 32),
                _ => (32, 64),
            };

            let affine = obj_mode & 1 != 0;
            let double_size = obj_mode == 0b11;
            let bounds_width = if double_size { width * 2 } else { width };
            let bounds_height = if double_size { height * 2 } else { height };

            let obj_y = i32::from(attr0.get_bits(0..=7));
            let row = ((y as i32) - obj_y).rem_euclid(256);
            if row >= bounds_height {
                continue;
            }

            let obj_x = sign_extend(u32::from(attr1.get_bits(0..=8)), 9) as i32;
            let palette_8bpp = attr0.get_bit(13);
            let priority = attr2.get_bits(10..=11) as u8;
            let tile_number = usize::from(attr2.get_bits(0..=9));

            for column in 0..bounds_width {
                let screen_x = obj_x + column;
                if !(0..DISPLAY_WIDTH as i32).contains(&screen_x) {
                    continue;
                }

                // Texture-space coordinates inside the sprite.
                let (tex_x, tex_y) = if affine {
                    let group = usize::from(attr1.get_bits(9..=13)) * 32;
                    let pa = i32::from(self.oam_half(group + 6) as i16);
                    let pb = i32::from(self.oam_half(group + 14) as i16);
                    let pc = i32::from(self.oam_half(group + 22) as i16);
                    let pd = i32::from(self.oam_half(group + 30) as i16);

                    let center_x = column - bounds_width / 2;
                    let center_y = row - bounds_height / 2;
                    let tex_x = (pa * center_x + pb * center_y) >> 8;
                    let tex_y = (pc * center_x + pd * center_y) >> 8;
                    (tex_x + width / 2, tex_y + height / 2)
                } else {
                    let tex_x = if attr1.get_bit(12) { width - 1 - column } else { column };
                    let tex_y = if attr1.get_bit(13) { height - 1 - row } else { row };
                    (tex_x, tex_y)
                };

                if !(0..width).contains(&tex_x) || !(0..height).contains(&tex_y) {
                    continue;
                }
                let (tex_x, tex_y) = (tex_x as usize, tex_y as usize);

                // 8bpp tiles occupy two 32-byte slots.
                let tile_stride = if one_dimensional {
                    (width as usize / 8) * if palette_8bpp { 2 } else { 1 }
                } else {
                    32
                };
                let tile_index =
                    tile_number + (tex_y / 8) * tile_stride + (tex_x / 8) * if palette_8bpp { 2 } else { 1 };

                let color = if palette_8bpp {
                    let offset =
                        OBJ_TILE_BASE + (tile_index & !1) * 32 + (tex_y % 8) * 8 + tex_x % 8;
                    let index = self.video_ram[offset & 0x17FFF];
                    (index != 0).then(|| self.obj_palette_color(usize::from(index)))
                } else {
                    let offset =
                        OBJ_TILE_BASE + tile_index * 32 + (tex_y % 8) * 4 + (tex_x % 8) / 2;
                    let byte = self.video_ram[offset & 0x17FFF];
                    let nibble = if tex_x % 2 == 0 { byte & 0xF } else { byte >> 4 };
                    (nibble != 0).then(|| {
                        self.obj_palette_color(
                            usize::from(attr2.get_bits(12..=15)) * 16 + usize::from(nibble),
                        )
                    })
                };

                let Some(color) = color else { continue };
                let slot = &mut line[screen_x as usize];

                if gfx_mode == 0b10 {
                    slot.window = true;
                    continue;
                }

                // Earlier OAM entries win ties; later ones only replace a
                // strictly worse priority.
                if slot.color.is_none() || priority < slot.priority {
                    *slot = ObjPixel {
                        color: Some(color),
                        priority,
                        semi_transparent: gfx_mode == 0b01,
                        window: slot.window,
                    };
                }
            }
        }

        line
    }

    fn oam_half(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.oam[offset & 0x3FF], self.oam[(offset + 1) & 0x3FF]])
    }
}

fn alpha_blend(first: u16, second: u16, bldalpha: u16) -> u16 {
    let eva = u32::from(bldalpha.get_bits(0..=4)).min(16);
    let evb = u32::from(bldalpha.get_bits(8..=12)).min(16);

    let mut out = 0u16;
    for shift in [0, 5, 10] {
        let a = u32::from(first >> shift) & 0x1F;
        let b = u32::from(second >> shift) & 0x1F;
        let blended = ((a * eva + b * evb) / 16).min(31) as u16;
        out |= blended << shift;
    }
    out
}

fn brightness(color: u16, bldy: u16, increase: bool) -> u16 {
    let evy = u32::from(bldy.get_bits(0..=4)).min(16);

    let mut out = 0u16;
    for shift in [0, 5, 10] {
        let c = u32::from(color >> shift) & 0x1F;
        let adjusted = if increase {
            c + (31 - c) * evy / 16
        } else {
            c - c * evy / 16
        };
        out |= (adjusted as u16) << shift;
    }
    out
}
