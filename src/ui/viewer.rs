use eframe::egui::{
    self, Color32, ColorImage, Pos2, Rect, RichText, Sense, Stroke, TextureHandle, TextureOptions,
    Ui,
};

use crate::color::display_levels;
use crate::data::model::{Region, Selection};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Viewer state that only exists on the UI side
// ---------------------------------------------------------------------------

/// Cached slide texture plus the in-progress drag.
#[derive(Default)]
pub struct StackViewer {
    texture: Option<(TextureKey, TextureHandle)>,
    drag_origin: Option<(usize, usize)>,
    drag_corner: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextureKey {
    generation: usize,
    slide: usize,
    minmax: bool,
}

/// Pixel `(row, col)` under `pos` for an image of `(height, width)` drawn
/// into `rect`, or None outside it.
pub fn pixel_at(rect: Rect, pos: Pos2, shape: (usize, usize)) -> Option<(usize, usize)> {
    let (height, width) = shape;
    if !rect.contains(pos) || height == 0 || width == 0 {
        return None;
    }
    let fx = (pos.x - rect.min.x) / rect.width();
    let fy = (pos.y - rect.min.y) / rect.height();
    let col = ((fx * width as f32) as usize).min(width - 1);
    let row = ((fy * height as f32) as usize).min(height - 1);
    Some((row, col))
}

/// Screen rectangle covering pixels `region` of an image drawn into `rect`.
fn region_rect(rect: Rect, region: Region, shape: (usize, usize)) -> Rect {
    let (height, width) = shape;
    let sx = rect.width() / width as f32;
    let sy = rect.height() / height as f32;
    let (top, left) = region.top_left();
    let (bottom, right) = region.bottom_right();
    Rect::from_min_max(
        Pos2::new(rect.min.x + left as f32 * sx, rect.min.y + top as f32 * sy),
        Pos2::new(
            rect.min.x + (right + 1) as f32 * sx,
            rect.min.y + (bottom + 1) as f32 * sy,
        ),
    )
}

impl StackViewer {
    /// Render the current slide with its slider.  Clicking picks a pixel,
    /// dragging picks an area; either opens a spectrum window.
    pub fn show(&mut self, ui: &mut Ui, state: &mut AppState) {
        let Some(loaded) = &state.loaded else {
            ui.centered_and_justified(|ui: &mut Ui| {
                ui.heading("Open a stack to view it  (File → Open stack…)");
            });
            return;
        };
        let count = loaded.stack.len();
        let Some(shape) = loaded.stack.shape() else {
            ui.label("The stack has no slides.");
            return;
        };
        state.current_slide = state.current_slide.min(count - 1);

        // ---- Slide slider ----
        ui.horizontal(|ui: &mut Ui| {
            ui.label("Slide");
            ui.add(egui::Slider::new(&mut state.current_slide, 0..=count - 1));
            if let Some(wl) = state.current_wavelength() {
                ui.label(RichText::new(format!("{wl} nm")).strong());
            }
        });
        ui.separator();

        let key = TextureKey {
            generation: state.stack_generation,
            slide: state.current_slide,
            minmax: state.minmax_scaling,
        };
        let texture = self.texture_for(ui.ctx(), state, key, shape);

        // ---- Image, fitted to the available space ----
        let (height, width) = shape;
        let avail = ui.available_size();
        let scale = (avail.x / width as f32).min(avail.y / height as f32).max(0.1);
        let size = egui::vec2(width as f32 * scale, height as f32 * scale);
        let (rect, response) = ui.allocate_exact_size(size, Sense::click_and_drag());
        let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
        ui.painter().image(texture, rect, uv, Color32::WHITE);

        let pointer = response.interact_pointer_pos();

        if response.drag_started() {
            self.drag_origin = pointer.and_then(|p| pixel_at(rect, p, shape));
            self.drag_corner = self.drag_origin;
        }
        if response.dragged() {
            if let Some(pos) = pointer {
                self.drag_corner = pixel_at(rect, rect.clamp(pos), shape).or(self.drag_corner);
            }
        }

        if let (Some(origin), Some(corner)) = (self.drag_origin, self.drag_corner) {
            let region = Region::spanning(origin, corner);
            ui.painter().rect_stroke(
                region_rect(rect, region, shape),
                0.0,
                Stroke::new(1.5, Color32::YELLOW),
                egui::StrokeKind::Inside,
            );
        }

        if response.drag_stopped() {
            if let (Some(origin), Some(corner)) = (self.drag_origin.take(), self.drag_corner.take())
            {
                let region = Region::spanning(origin, corner);
                let selection = if region.is_pixel() {
                    Selection::Point {
                        row: origin.0,
                        col: origin.1,
                    }
                } else {
                    Selection::Area(region)
                };
                state.add_spectrum(selection);
            }
        } else if response.clicked() {
            if let Some((row, col)) = pointer.and_then(|p| pixel_at(rect, p, shape)) {
                state.add_spectrum(Selection::Point { row, col });
            }
        }

        if let Some((row, col)) = response.hover_pos().and_then(|p| pixel_at(rect, p, shape)) {
            if let Some(value) = state
                .loaded
                .as_ref()
                .and_then(|l| l.stack.slide(state.current_slide))
                .map(|s| s[[row, col]])
            {
                response.on_hover_text(format!("({row}, {col}) = {value}"));
            }
        }
    }

    fn texture_for(
        &mut self,
        ctx: &egui::Context,
        state: &AppState,
        key: TextureKey,
        shape: (usize, usize),
    ) -> egui::TextureId {
        if let Some((cached, handle)) = &self.texture {
            if *cached == key {
                return handle.id();
            }
        }
        let (height, width) = shape;
        let levels = state
            .loaded
            .as_ref()
            .and_then(|l| l.stack.slide(key.slide))
            .map(|slide| display_levels(slide, key.minmax))
            .unwrap_or_else(|| vec![0; width * height]);
        let image = ColorImage::from_gray([width, height], &levels);

        match &mut self.texture {
            Some((cached, handle)) => {
                handle.set(image, TextureOptions::NEAREST);
                *cached = key;
                handle.id()
            }
            None => {
                let handle = ctx.load_texture("slide", image, TextureOptions::NEAREST);
                let id = handle.id();
                self.texture = Some((key, handle));
                id
            }
        }
    }
}
