use std::sync::Arc;

use kiln_gfx::backend::GfxBackend;
use kiln_resource::resource::{LoadContext, Resource, ResourceKind};
use kiln_resource::status::LoadStatus;

/// TrueType / OpenType 字体
///
/// 只解析字体文件，不产生 GPU 对象；字形的光栅化和图集由使用者负责
#[derive(Default)]
pub struct Font {
    face: Option<fontdue::Font>,
}
// getters
impl Font {
    #[inline]
    pub fn face(&self) -> Option<&fontdue::Font> {
        self.face.as_ref()
    }

    pub fn glyph_count(&self) -> u16 {
        self.face.as_ref().map_or(0, |f| f.glyph_count())
    }

    /// 字体是否包含这个字符的字形
    pub fn is_glyph_provided(&self, character: char) -> bool {
        self.face.as_ref().is_some_and(|f| f.lookup_glyph_index(character) != 0)
    }

    pub fn glyph_metrics(&self, character: char, px: f32) -> Option<fontdue::Metrics> {
        self.face.as_ref().map(|f| f.metrics(character, px))
    }

    /// 多行文本的宽和高
    pub fn text_dimensions(&self, text: &str, px: f32) -> Option<(f32, f32)> {
        let face = self.face.as_ref()?;
        let line_height = face.horizontal_line_metrics(px).map_or(px, |m| m.new_line_size);

        let mut width: f32 = 0.0;
        let mut lines = 0;
        for line in text.split('\n') {
            let advance: f32 = line.chars().map(|c| face.metrics(c, px).advance_width).sum();
            width = width.max(advance);
            lines += 1;
        }
        Some((width, line_height * lines as f32))
    }
}

impl Resource for Font {
    const KIND: ResourceKind = ResourceKind::Font;

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> LoadStatus {
        let _span = tracy_client::span!("Font::load");
        if self.face.is_some() {
            return LoadStatus::InvalidCall;
        }
        let data = match ctx.source() {
            Ok(data) => data,
            Err(status) => return status,
        };

        match fontdue::Font::from_bytes(data, fontdue::FontSettings::default()) {
            Ok(face) => {
                log::info!("Font ({}) loaded with {} glyphs", ctx.name(), face.glyph_count());
                self.face = Some(face);
                LoadStatus::Ok
            }
            Err(e) => {
                ctx.report_failure(
                    format!("Font ({}) could not be parsed", ctx.name()),
                    "Font Error Log",
                    vec![e.to_string()],
                );
                LoadStatus::InvalidData
            }
        }
    }

    fn unload(&mut self, _gfx: &Arc<dyn GfxBackend>) -> LoadStatus {
        match self.face.take() {
            Some(_) => LoadStatus::Ok,
            None => LoadStatus::InvalidCall,
        }
    }

    fn default_path() -> Option<&'static str> {
        Some("fonts/DejaVuSans.ttf")
    }
}
