use anyhow::{Context, Result};
use printpdf::image_crate::DynamicImage;
use printpdf::{Image, ImageTransform, Mm, PdfDocument};

use crate::settings::LabelSettings;

/// Wraps a rendered label PNG into a single-page PDF sized to the label stock.
pub fn label_pdf(png: &[u8], settings: &LabelSettings) -> Result<Vec<u8>> {
    let image = printpdf::image_crate::load_from_memory(png)
        .with_context(|| "failed to decode label image")?;
    // Alpha channels end up as a soft mask some label printers ignore.
    let image = DynamicImage::ImageRgb8(image.to_rgb8());

    let (doc, page, layer) = PdfDocument::new(
        "label",
        Mm(settings.width_mm),
        Mm(settings.height_mm),
        "Label",
    );
    let current_layer = doc.get_page(page).get_layer(layer);
    let transform = ImageTransform {
        translate_x: Some(Mm(0.0)),
        translate_y: Some(Mm(0.0)),
        rotate: None,
        scale_x: Some(1.0),
        scale_y: Some(1.0),
        dpi: Some(settings.dpi as f32),
    };
    Image::from_dynamic_image(&image).add_to_layer(current_layer, transform);

    let mut buffer = Vec::new();
    {
        let mut writer = std::io::BufWriter::new(&mut buffer);
        doc.save(&mut writer)
            .with_context(|| "failed to write label pdf")?;
    }
    Ok(buffer)
}
