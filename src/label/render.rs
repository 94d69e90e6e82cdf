use anyhow::{Context, Result, anyhow};
use resvg::render;
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use super::layout::{LabelLayout, LineRole};

pub fn render_svg(layout: &LabelLayout, font_family: &str) -> String {
    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = layout.width,
        h = layout.height
    ));
    svg.push_str(&format!(
        r##"<rect x="0" y="0" width="{w}" height="{h}" fill="#ffffff"/>"##,
        w = layout.width,
        h = layout.height
    ));

    let bars = &layout.barcode;
    svg.push_str(r##"<g fill="#000000" shape-rendering="crispEdges">"##);
    for (x, width) in bars.bar_rects() {
        svg.push_str(&format!(
            r#"<rect x="{x}" y="{y}" width="{width}" height="{height}"/>"#,
            x = x,
            y = bars.y,
            width = width,
            height = bars.height
        ));
    }
    svg.push_str("</g>");

    for line in &layout.lines {
        let weight = match line.role {
            LineRole::Title => "bold",
            _ => "normal",
        };
        svg.push_str(&format!(
            r##"<text x="{x}" y="{y}" font-size="{size}" font-weight="{weight}" fill="#000000" font-family="{family}" text-anchor="middle">{text}</text>"##,
            x = line.x,
            y = line.baseline,
            size = line.font_size,
            weight = weight,
            family = escape_xml(font_family),
            text = escape_xml(&line.text)
        ));
    }

    svg.push_str("</svg>");
    svg
}

pub fn label_font_database(font_data: Option<&[u8]>) -> Arc<fontdb::Database> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    if let Some(data) = font_data {
        db.load_font_data(data.to_vec());
    }
    Arc::new(db)
}

pub fn render_png(svg: &str, fonts: Arc<fontdb::Database>) -> Result<Vec<u8>> {
    let options = Options {
        fontdb: fonts,
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse label SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty label size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer for label"))?;
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .with_context(|| "failed to encode label PNG")?;
    Ok(bytes)
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
